//! ATorch distributed collaborators
//!
//! Everything a training configuration needs to bind itself to a process group
//! and an accelerator, without owning either:
//! - `ProcessGroup`: "is a group active", "initialize", world size, rank
//! - `Accelerator`: build a device handle for a local index and make it active
//! - `DistributedState`: the process-wide record written once at device setup
//! - `LaunchEnv`: launcher-provided environment (backend override, local rank)

pub mod device;
pub mod env;
pub mod error;
pub mod process_group;
pub mod rendezvous;
pub mod state;
pub mod vram;

pub use device::{Accelerator, CandleAccelerator, DeviceHandle, DeviceKind};
pub use env::LaunchEnv;
pub use error::DistError;
pub use process_group::ProcessGroup;
pub use rendezvous::{RendezvousConfig, TcpRendezvous};
pub use state::{DistributedState, DistributedType};
pub use vram::VramInfo;
