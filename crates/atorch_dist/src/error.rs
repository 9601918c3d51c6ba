//! Distributed setup errors

use std::time::Duration;

/// Failures raised while joining a process group or binding a device.
/// None of them are retried locally.
#[derive(Debug, thiserror::Error)]
pub enum DistError {
    #[error("process group initialization timed out after {0:?}")]
    Timeout(Duration),

    #[error("process group I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid launch environment: {0}")]
    Env(String),

    #[error("rendezvous protocol error: {0}")]
    Protocol(String),

    #[error("process group is not initialized")]
    NotInitialized,

    #[error("invalid device index {0} (LOCAL_RANK unset or negative?)")]
    InvalidDeviceIndex(i64),

    #[error("failed to bind device {device}: {reason}")]
    Device { device: String, reason: String },
}
