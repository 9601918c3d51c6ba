//! Configuration error types
//!
//! Every variant is raised synchronously while the arguments are built and is
//! fatal to the run.

/// Configuration error type
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid base option: {0}")]
    BaseOption(#[source] serde_json::Error),

    #[error("Option {field} expects {expected}, got {found}")]
    InvalidType {
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error("AtorchTrainer only support TensorBoard to report the results and logs (report_to={0})")]
    UnsupportedReportTo(String),

    #[error("lr_scheduler_type={value} is invalid, please select one of {valid:?}.")]
    InvalidScheduler { value: String, valid: Vec<String> },

    #[error("{field} has {found} type, required tuple type.")]
    NotSequence { field: &'static str, found: String },

    #[error("Invalid {field}: {value} (must be one of: {choices})")]
    InvalidChoice {
        field: &'static str,
        value: String,
        choices: &'static str,
    },

    #[error("Invalid max_shard_size: {0} (expected e.g. \"10GB\", \"500MiB\" or a byte count)")]
    InvalidShardSize(String),

    #[error("{0}")]
    InvalidBase(String),

    #[error("Invalid override {0:?} (expected key=value)")]
    InvalidOverride(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
