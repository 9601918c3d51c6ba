//! ATorch Trainer Arguments
//!
//! The argument record of an ATorch training run: extended options on top of
//! the base training arguments, construction-time validation, lazy device
//! binding and JSON-safe serialization.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod options;
pub mod scheduler;
pub mod train;

pub use config::BaseTrainingArgs;
pub use error::ConfigError;
pub use options::{Callable, ModuleRef, ModuleSeq, OptionMap, OptionValue, SeqKind};
pub use scheduler::{AtorchSchedulerType, LrSchedulerChoice, SchedulerType};
pub use train::{AtorchArgs, DeviceContext};
