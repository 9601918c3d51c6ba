//! Train Module - ATorch training arguments
//!
//! This module provides the argument record driving an ATorch training run:
//! - args: `AtorchArgs`, defaults and construction-time validation
//! - devices: lazy process-group / device binding
//! - serialize: JSON-safe mapping of the arguments
//! - checkpoint: argument persistence and shard size parsing

pub mod args;
pub mod checkpoint;
pub mod devices;
pub mod serialize;

pub use args::{AtorchArgs, AtorchOpt, ModelInputFormat};
pub use checkpoint::{load_saved_args, parse_size, ARGS_FILE_NAME};
pub use devices::DeviceContext;
