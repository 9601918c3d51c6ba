//! Device Setup - lazy process-group and accelerator binding
//!
//! Runs once per process, usually right before training starts. The first
//! successful call joins the process group (if needed), fills the shared
//! `DistributedState`, binds one device by local rank and caches it. Later calls
//! return the cached handle and touch nothing.

use atorch_dist::{Accelerator, DeviceHandle, DistError, DistributedState, DistributedType, LaunchEnv, ProcessGroup};
use tracing::info;

use super::args::AtorchArgs;

/// Collaborators handed to `resolve_device`. The caller owns all of them.
pub struct DeviceContext<'a> {
    pub process_group: &'a mut dyn ProcessGroup,
    pub accelerator: &'a dyn Accelerator,
    pub state: &'a mut DistributedState,
    pub env: &'a LaunchEnv,
}

impl AtorchArgs {
    /// Bind this process to its device. Idempotent: only the first successful
    /// call has side effects. Errors are returned as-is and nothing is cached.
    pub fn resolve_device(&mut self, ctx: &mut DeviceContext<'_>) -> Result<DeviceHandle, DistError> {
        if let Some(device) = self.device {
            return Ok(device);
        }

        info!("Setting up devices");
        let timeout = self.base.ddp_timeout_duration();

        if !ctx.process_group.is_initialized() {
            ctx.process_group.init_process_group(&ctx.env.backend, timeout)?;
        }

        let state = &mut *ctx.state;
        state.backend = self.base.ddp_backend.clone();
        state.timeout = Some(timeout);
        state.distributed_type = DistributedType::MultiGpu;
        state.num_processes = ctx.process_group.world_size()?;
        state.process_index = ctx.process_group.rank()?;
        state.local_process_index = ctx.env.local_rank;

        let device = ctx.accelerator.device(ctx.env.local_rank)?;
        state.device = Some(device);
        ctx.accelerator.set_device(&device)?;

        self.n_gpu = 1;
        self.device = Some(device);
        info!(
            "Device ready: {} (rank {}/{}, local rank {})",
            device, state.process_index, state.num_processes, state.local_process_index
        );
        Ok(device)
    }

    /// The cached device, once `resolve_device` succeeded.
    pub fn device(&self) -> Option<&DeviceHandle> {
        self.device.as_ref()
    }

    /// Accelerators used by this process: 1 after device setup, 0 before.
    pub fn n_gpu(&self) -> usize {
        self.n_gpu
    }
}
