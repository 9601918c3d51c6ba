//! Launch Environment - values injected by the process launcher

use std::env;

/// Environment variable selecting the communication backend.
pub const BACKEND_ENV: &str = "TORCH_DISTRIBUTED_BACKEND";
/// Environment variable holding this process's index on its host.
pub const LOCAL_RANK_ENV: &str = "LOCAL_RANK";

pub const DEFAULT_BACKEND: &str = "nccl";
/// Sentinel used when the launcher did not provide a local rank.
pub const UNSET_LOCAL_RANK: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchEnv {
    pub backend: String,
    pub local_rank: i64,
}

impl Default for LaunchEnv {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            local_rank: UNSET_LOCAL_RANK,
        }
    }
}

impl LaunchEnv {
    /// Read backend override and local rank from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, with an injectable lookup (tests, embedded launchers).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = lookup(BACKEND_ENV)
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_BACKEND.to_string());

        let local_rank = match lookup(LOCAL_RANK_ENV) {
            Some(raw) => raw.trim().parse::<i64>().unwrap_or_else(|_| {
                tracing::warn!("{}={:?} is not an integer, using {}", LOCAL_RANK_ENV, raw, UNSET_LOCAL_RANK);
                UNSET_LOCAL_RANK
            }),
            None => UNSET_LOCAL_RANK,
        };

        Self { backend, local_rank }
    }
}
