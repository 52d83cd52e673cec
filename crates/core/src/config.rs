//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{EngineError, Result};
use crate::types::Target;

/// Backend executing device queue jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceBackend {
    /// Device memory and kernels emulated on the host
    Emulated,
    /// CUDA devices through cudarc (requires the `cuda` feature)
    Cuda,
}

impl FromStr for DeviceBackend {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "emulated" | "host" => Ok(Self::Emulated),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(EngineError::Config(format!("unknown device backend '{}'", other))),
        }
    }
}

/// Batched BLAS primitive used by `Target::HostBatch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchBackend {
    /// Items spread over the task pool
    Parallel,
    /// Items looped in order on the calling thread
    Sequential,
    /// No batched primitive; host batching is refused
    Disabled,
}

impl FromStr for BatchBackend {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "parallel" => Ok(Self::Parallel),
            "sequential" | "looped" => Ok(Self::Sequential),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            other => Err(EngineError::Config(format!("unknown batch backend '{}'", other))),
        }
    }
}

/// Task pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads; 0 lets rayon decide
    pub num_threads: usize,
    pub thread_name_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            thread_name_prefix: "tilegrid-worker".to_string(),
        }
    }
}

/// Accelerator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub num_devices: usize,
    /// Compute queues per device
    pub queues_per_device: usize,
    pub backend: DeviceBackend,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            num_devices: 1,
            queues_per_device: 2,
            backend: DeviceBackend::Emulated,
        }
    }
}

/// Batched kernel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub host_backend: BatchBackend,
    /// Threads per block of the norm reduction kernels
    pub reduction_block_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            host_backend: BatchBackend::Parallel,
            reduction_block_size: 512,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub default_target: Target,
    pub runtime: RuntimeConfig,
    pub devices: DeviceConfig,
    pub batch: BatchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_target: Target::HostTask,
            runtime: RuntimeConfig::default(),
            devices: DeviceConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `TILEGRID_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(threads) = std::env::var("TILEGRID_NUM_THREADS") {
            if let Ok(n) = threads.parse() {
                config.runtime.num_threads = n;
            }
        }
        if let Ok(devices) = std::env::var("TILEGRID_NUM_DEVICES") {
            if let Ok(n) = devices.parse() {
                config.devices.num_devices = n;
            }
        }
        if let Ok(queues) = std::env::var("TILEGRID_QUEUES_PER_DEVICE") {
            if let Ok(n) = queues.parse() {
                config.devices.queues_per_device = n;
            }
        }
        if let Ok(backend) = std::env::var("TILEGRID_DEVICE_BACKEND") {
            if let Ok(b) = backend.parse() {
                config.devices.backend = b;
            }
        }
        if let Ok(backend) = std::env::var("TILEGRID_HOST_BATCH") {
            if let Ok(b) = backend.parse() {
                config.batch.host_backend = b;
            }
        }
        if let Ok(size) = std::env::var("TILEGRID_REDUCTION_BLOCK_SIZE") {
            if let Ok(n) = size.parse() {
                config.batch.reduction_block_size = n;
            }
        }
        if let Ok(target) = std::env::var("TILEGRID_TARGET") {
            if let Ok(t) = target.parse() {
                config.default_target = t;
            }
        }

        config
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.devices.num_devices > 0 && self.devices.queues_per_device == 0 {
            return Err(EngineError::Config(
                "devices need at least one compute queue".into(),
            ));
        }
        if self.batch.reduction_block_size == 0 || !self.batch.reduction_block_size.is_power_of_two() {
            return Err(EngineError::Config(format!(
                "reduction block size {} is not a power of two",
                self.batch.reduction_block_size
            )));
        }
        if self.default_target == Target::Devices && self.devices.num_devices == 0 {
            return Err(EngineError::Config(
                "default target 'devices' with no devices configured".into(),
            ));
        }
        Ok(())
    }
}
