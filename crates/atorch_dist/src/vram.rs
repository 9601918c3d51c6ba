//! Device memory report logged when a rank binds its GPU.

use serde::Serialize;
use std::fmt;

use crate::error::DistError;

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct VramInfo {
    pub free_bytes: usize,
    pub total_bytes: usize,
}

impl VramInfo {
    pub fn used_bytes(&self) -> usize {
        self.total_bytes.saturating_sub(self.free_bytes)
    }
}

impl fmt::Display for VramInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.0} MB free / {:.0} MB total",
            self.free_bytes as f64 / MIB,
            self.total_bytes as f64 / MIB
        )
    }
}

/// Memory of CUDA device `ordinal`. `Ok(None)` when the crate is built
/// without the `cuda` feature or the driver has no such device.
#[cfg(feature = "cuda")]
pub fn query(ordinal: usize) -> Result<Option<VramInfo>, DistError> {
    use cudarc::driver::{result::mem_get_info, CudaDevice};

    // mem_get_info reads the context CudaDevice::new makes current.
    let _ctx = match CudaDevice::new(ordinal) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::warn!("No CUDA context for device {}: {:?}", ordinal, e);
            return Ok(None);
        }
    };
    let (free_bytes, total_bytes) = mem_get_info().map_err(|e| DistError::Device {
        device: format!("cuda:{ordinal}"),
        reason: format!("{e:?}"),
    })?;
    Ok(Some(VramInfo {
        free_bytes,
        total_bytes,
    }))
}

#[cfg(not(feature = "cuda"))]
pub fn query(_ordinal: usize) -> Result<Option<VramInfo>, DistError> {
    Ok(None)
}
