//! Execution engine: task pool, devices and their compute queues

use parking_lot::{Mutex, MutexGuard};

use crate::config::{BatchBackend, EngineConfig};
use crate::error::{EngineError, Result};
use crate::gpu::{DeviceSet, GpuDevice};
use crate::runtime::{ComputeQueue, TaskPool};

/// Everything a block operation needs to run on this process
pub struct Engine {
    config: EngineConfig,
    pool: TaskPool,
    devices: DeviceSet,
    queues: Vec<Vec<Mutex<ComputeQueue>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let pool = TaskPool::new(&config.runtime)?;
        let devices = DeviceSet::new(config.devices.num_devices, config.devices.backend)?;
        let queues = (0..devices.len())
            .map(|d| {
                (0..config.devices.queues_per_device)
                    .map(|q| Mutex::new(ComputeQueue::new(d, q)))
                    .collect()
            })
            .collect();

        tracing::info!(
            threads = pool.num_threads(),
            devices = devices.len(),
            backend = ?config.devices.backend,
            host_batch = ?config.batch.host_backend,
            "engine ready"
        );

        Ok(Self {
            config,
            pool,
            devices,
            queues,
        })
    }

    /// Engine built from `TILEGRID_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(EngineConfig::from_env())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, idx: usize) -> Result<&GpuDevice> {
        self.devices.device(idx)
    }

    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    pub fn batch_backend(&self) -> BatchBackend {
        self.config.batch.host_backend
    }

    /// Exclusive use of compute queue `index` on `device`
    pub fn queue(&self, device: usize, index: usize) -> Result<MutexGuard<'_, ComputeQueue>> {
        let per_device = self.queues.get(device).ok_or_else(|| {
            EngineError::Resource(format!(
                "device {} out of range ({} devices)",
                device,
                self.queues.len()
            ))
        })?;
        let queue = per_device.get(index).ok_or_else(|| {
            EngineError::Resource(format!(
                "queue {} out of range on device {} ({} queues)",
                index,
                device,
                per_device.len()
            ))
        })?;
        Ok(queue.lock())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pool", &self.pool)
            .field("devices", &self.devices)
            .field("host_batch", &self.config.batch.host_backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_queues() {
        let mut config = EngineConfig::default();
        config.devices.num_devices = 2;
        config.devices.queues_per_device = 3;
        config.runtime.num_threads = 2;
        let engine = Engine::new(config).unwrap();
        assert_eq!(engine.num_devices(), 2);
        assert_eq!(engine.queue(1, 2).unwrap().index(), 2);
        assert!(matches!(engine.queue(2, 0), Err(EngineError::Resource(_))));
        assert!(matches!(engine.queue(0, 3), Err(EngineError::Resource(_))));
    }

    #[test]
    fn test_engine_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.devices.queues_per_device = 0;
        assert!(matches!(Engine::new(config), Err(EngineError::Config(_))));
    }
}
