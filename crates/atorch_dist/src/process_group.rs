//! Process group abstraction
//!
//! The communication runtime consumed by device setup. Implementations decide
//! how peers find each other; callers only rely on these four operations.

use std::time::Duration;

use crate::error::DistError;

pub trait ProcessGroup {
    /// Whether a process group is already active in this process.
    fn is_initialized(&self) -> bool;

    /// Join the process group. Blocks until every peer arrived or `timeout`
    /// elapsed.
    fn init_process_group(&mut self, backend: &str, timeout: Duration) -> Result<(), DistError>;

    fn world_size(&self) -> Result<usize, DistError>;

    fn rank(&self) -> Result<usize, DistError>;
}
