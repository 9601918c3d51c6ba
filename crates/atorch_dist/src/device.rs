//! Accelerator binding
//!
//! One device per process, selected by local rank.

use candle_core::Device;
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;

use crate::error::DistError;
use crate::vram;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Cuda,
}

/// Lightweight, comparable handle for the device bound to this process.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    pub kind: DeviceKind,
    pub ordinal: usize,
}

impl DeviceHandle {
    pub fn cuda(ordinal: usize) -> Self {
        Self {
            kind: DeviceKind::Cuda,
            ordinal,
        }
    }

    pub fn cpu() -> Self {
        Self {
            kind: DeviceKind::Cpu,
            ordinal: 0,
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Cuda => write!(f, "cuda:{}", self.ordinal),
        }
    }
}

/// Accelerator runtime consumed by device setup.
pub trait Accelerator {
    /// Construct the handle for the device at `local_index`.
    fn device(&self, local_index: i64) -> Result<DeviceHandle, DistError>;

    /// Make `device` the active device for the rest of the process.
    fn set_device(&self, device: &DeviceHandle) -> Result<(), DistError>;
}

/// Candle-backed accelerator. Keeps the active `candle_core::Device` so the
/// training loop can allocate tensors on it.
#[derive(Default)]
pub struct CandleAccelerator {
    active: Mutex<Option<Device>>,
}

impl CandleAccelerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The device made active by the last successful `set_device`.
    pub fn active_device(&self) -> Option<Device> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn candle_device(handle: &DeviceHandle) -> Result<Device, DistError> {
        match handle.kind {
            DeviceKind::Cpu => Ok(Device::Cpu),
            DeviceKind::Cuda => Device::new_cuda(handle.ordinal).map_err(|e| DistError::Device {
                device: handle.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

impl Accelerator for CandleAccelerator {
    fn device(&self, local_index: i64) -> Result<DeviceHandle, DistError> {
        let ordinal = usize::try_from(local_index).map_err(|_| DistError::InvalidDeviceIndex(local_index))?;
        Ok(DeviceHandle::cuda(ordinal))
    }

    fn set_device(&self, device: &DeviceHandle) -> Result<(), DistError> {
        let candle_device = Self::candle_device(device)?;

        if device.kind == DeviceKind::Cuda {
            match vram::query(device.ordinal) {
                Ok(Some(info)) => tracing::info!("💾 {}: {}", device, info),
                Ok(None) => {}
                Err(e) => tracing::warn!("Could not query VRAM for {}: {}", device, e),
            }
        }

        *self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(candle_device);
        Ok(())
    }
}
