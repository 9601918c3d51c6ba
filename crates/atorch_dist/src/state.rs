//! Process-wide distributed state
//!
//! Created once at process start by the caller and handed to whoever performs
//! device setup. Downstream collaborators only read it afterwards.

use serde::Serialize;
use std::time::Duration;

use crate::device::DeviceHandle;

#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributedType {
    #[default]
    No,
    MultiGpu,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DistributedState {
    pub backend: Option<String>,
    pub timeout: Option<Duration>,
    pub distributed_type: DistributedType,
    pub num_processes: usize,
    pub process_index: usize,
    pub local_process_index: i64,
    pub device: Option<DeviceHandle>,
}

impl Default for DistributedState {
    fn default() -> Self {
        Self {
            backend: None,
            timeout: None,
            distributed_type: DistributedType::No,
            num_processes: 1,
            process_index: 0,
            local_process_index: -1,
            device: None,
        }
    }
}

impl DistributedState {
    pub fn is_main_process(&self) -> bool {
        self.process_index == 0
    }
}
