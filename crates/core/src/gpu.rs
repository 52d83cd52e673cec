//! Accelerator devices
//!
//! A [`GpuDevice`] is either a CUDA device opened through cudarc (with the
//! `cuda` feature) or an emulated device whose memory lives on the host. Tile
//! copies for both kinds are managed by the tile store; the CUDA handle is
//! used by kernels that stage a batch onto the device themselves.

#[cfg(feature = "cuda")]
use std::sync::Arc;

use crate::config::DeviceBackend;
use crate::error::{EngineError, Result};

#[cfg(feature = "cuda")]
use cudarc::driver::CudaDevice;

/// One accelerator
#[derive(Clone)]
pub struct GpuDevice {
    pub device_id: usize,
    backend: DeviceBackend,
    #[cfg(feature = "cuda")]
    cuda: Option<Arc<CudaDevice>>,
}

impl GpuDevice {
    pub fn new(device_id: usize, backend: DeviceBackend) -> Result<Self> {
        match backend {
            DeviceBackend::Emulated => Ok(Self {
                device_id,
                backend,
                #[cfg(feature = "cuda")]
                cuda: None,
            }),
            DeviceBackend::Cuda => Self::open_cuda(device_id),
        }
    }

    #[cfg(feature = "cuda")]
    fn open_cuda(device_id: usize) -> Result<Self> {
        let device = CudaDevice::new(device_id)
            .map_err(|e| EngineError::Gpu(format!("Failed to create CUDA device {}: {:?}", device_id, e)))?;
        Ok(Self {
            device_id,
            backend: DeviceBackend::Cuda,
            cuda: Some(device),
        })
    }

    #[cfg(not(feature = "cuda"))]
    fn open_cuda(device_id: usize) -> Result<Self> {
        Err(EngineError::UnsupportedBackend(format!(
            "device {} requested the cuda backend but tilegrid was built without the `cuda` feature",
            device_id
        )))
    }

    pub fn backend(&self) -> DeviceBackend {
        self.backend
    }

    pub fn is_emulated(&self) -> bool {
        self.backend == DeviceBackend::Emulated
    }

    /// Synchronize device
    #[cfg(feature = "cuda")]
    pub fn synchronize(&self) -> Result<()> {
        match &self.cuda {
            Some(device) => device
                .synchronize()
                .map_err(|e| EngineError::Gpu(format!("Failed to synchronize: {:?}", e))),
            None => Ok(()),
        }
    }

    #[cfg(not(feature = "cuda"))]
    pub fn synchronize(&self) -> Result<()> {
        Ok(())
    }

    /// Bind this device to the current thread's CUDA context
    #[cfg(feature = "cuda")]
    pub fn bind_to_thread(&self) -> Result<()> {
        match &self.cuda {
            Some(device) => device
                .bind_to_thread()
                .map_err(|e| EngineError::Gpu(format!("Failed to bind device to thread: {:?}", e))),
            None => Ok(()),
        }
    }

    #[cfg(not(feature = "cuda"))]
    pub fn bind_to_thread(&self) -> Result<()> {
        Ok(())
    }

    /// Get the underlying CudaDevice, if this is a CUDA device
    #[cfg(feature = "cuda")]
    pub fn cuda_device(&self) -> Option<&Arc<CudaDevice>> {
        self.cuda.as_ref()
    }
}

impl std::fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDevice")
            .field("device_id", &self.device_id)
            .field("backend", &self.backend)
            .finish()
    }
}

/// All devices visible to this process
pub struct DeviceSet {
    devices: Vec<GpuDevice>,
}

impl DeviceSet {
    pub fn new(num_devices: usize, backend: DeviceBackend) -> Result<Self> {
        let mut devices = Vec::with_capacity(num_devices);
        for i in 0..num_devices {
            devices.push(GpuDevice::new(i, backend)?);
        }
        Ok(Self { devices })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn device(&self, idx: usize) -> Result<&GpuDevice> {
        self.devices.get(idx).ok_or_else(|| {
            EngineError::Resource(format!(
                "device {} out of range ({} devices)",
                idx,
                self.devices.len()
            ))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &GpuDevice> {
        self.devices.iter()
    }
}

impl std::fmt::Debug for DeviceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.devices.iter()).finish()
    }
}
