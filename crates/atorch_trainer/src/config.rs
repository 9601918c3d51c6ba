//! Base Training Arguments
//!
//! The generic (seq2seq) training arguments that `AtorchArgs` embeds. Holds the
//! fields the rest of the trainer reads, their defaults, the base validation
//! and the base serialization (field filtering and token redaction).

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::options::{OptionMap, OptionValue};
use crate::scheduler::SchedulerType;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BaseTrainingArgs {
    pub output_dir: String,
    pub overwrite_output_dir: bool,
    pub do_train: bool,
    pub do_eval: bool,
    pub do_predict: bool,
    // Batching
    pub per_device_train_batch_size: usize,
    pub per_device_eval_batch_size: usize,
    pub gradient_accumulation_steps: usize,
    // Optimizer
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub adam_beta1: f64,
    pub adam_beta2: f64,
    pub adam_epsilon: f64,
    pub max_grad_norm: f64,
    // Schedule
    pub num_train_epochs: f64,
    pub max_steps: i64,
    pub lr_scheduler_type: SchedulerType,
    pub warmup_ratio: f64,
    pub warmup_steps: usize,
    // Logging / saving
    pub logging_dir: Option<String>,
    pub logging_steps: usize,
    pub save_steps: usize,
    pub save_total_limit: Option<usize>,
    /// A bare string is shorthand for a one-element list.
    #[serde(deserialize_with = "string_or_list")]
    pub report_to: Option<Vec<String>>,
    // Precision
    pub seed: i64,
    pub fp16: bool,
    pub bf16: bool,
    pub gradient_checkpointing: bool,
    // Distributed
    pub ddp_backend: Option<String>,
    /// Seconds
    pub ddp_timeout: u64,
    // Hub
    pub push_to_hub: bool,
    pub hub_model_id: Option<String>,
    pub hub_token: Option<String>,
    // Seq2seq generation
    pub predict_with_generate: bool,
    pub generation_max_length: Option<usize>,
    pub generation_num_beams: Option<usize>,
}

impl Default for BaseTrainingArgs {
    fn default() -> Self {
        Self {
            output_dir: "output".to_string(),
            overwrite_output_dir: false,
            do_train: false,
            do_eval: false,
            do_predict: false,
            per_device_train_batch_size: 8,
            per_device_eval_batch_size: 8,
            gradient_accumulation_steps: 1,
            learning_rate: 5e-5,
            weight_decay: 0.0,
            adam_beta1: 0.9,
            adam_beta2: 0.999,
            adam_epsilon: 1e-8,
            max_grad_norm: 1.0,
            num_train_epochs: 3.0,
            max_steps: -1,
            lr_scheduler_type: SchedulerType::Linear,
            warmup_ratio: 0.0,
            warmup_steps: 0,
            logging_dir: None,
            logging_steps: 500,
            save_steps: 500,
            save_total_limit: None,
            report_to: None,
            seed: 42,
            fp16: false,
            bf16: false,
            gradient_checkpointing: false,
            ddp_backend: None,
            ddp_timeout: 1800,
            push_to_hub: false,
            hub_model_id: None,
            hub_token: None,
            predict_with_generate: false,
            generation_max_length: None,
            generation_num_beams: None,
        }
    }
}

impl BaseTrainingArgs {
    /// Build from the options that are not ATorch options. Unknown names and
    /// mistyped values are rejected.
    pub fn from_json_map(options: Map<String, Value>) -> Result<Self, ConfigError> {
        serde_json::from_value(Value::Object(options)).map_err(ConfigError::BaseOption)
    }

    pub fn ddp_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.ddp_timeout)
    }

    /// Base post-init checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fp16 && self.bf16 {
            return Err(ConfigError::InvalidBase(
                "At most one of fp16 and bf16 can be True, but not both".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.warmup_ratio) {
            return Err(ConfigError::InvalidBase(format!(
                "warmup_ratio must lie in range [0,1], got {}",
                self.warmup_ratio
            )));
        }
        if self.gradient_accumulation_steps == 0 {
            return Err(ConfigError::InvalidBase(
                "gradient_accumulation_steps must be > 0".to_string(),
            ));
        }
        if self.logging_steps == 0 {
            return Err(ConfigError::InvalidBase("logging_steps must be > 0".to_string()));
        }
        if self.save_steps == 0 {
            return Err(ConfigError::InvalidBase("save_steps must be > 0".to_string()));
        }
        if self.push_to_hub && self.hub_model_id.is_none() && self.output_dir.is_empty() {
            return Err(ConfigError::InvalidBase(
                "push_to_hub needs hub_model_id or a non-empty output_dir".to_string(),
            ));
        }
        Ok(())
    }

    /// Field mapping with enums resolved and set `*_token` fields redacted.
    pub fn to_dict(&self) -> OptionMap {
        let mut map = to_json_object(self);
        redact_tokens(&mut map);
        map.iter()
            .map(|(k, v)| (k.clone(), OptionValue::from_serialized(v)))
            .collect()
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(Option::<OneOrMany>::deserialize(deserializer)?.map(|v| match v {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(list) => list,
    }))
}

/// Serialize a record into a JSON object.
pub(crate) fn to_json_object<T: Serialize>(record: &T) -> Map<String, Value> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::error!("expected a JSON object, got {}", other);
            Map::new()
        }
        Err(e) => {
            tracing::error!("failed to serialize arguments: {}", e);
            Map::new()
        }
    }
}

pub fn is_token_field(name: &str) -> bool {
    name.ends_with("_token")
}

/// Placeholder written instead of a secret: `hub_token` -> `<HUB_TOKEN>`.
pub fn token_placeholder(name: &str) -> String {
    format!("<{}>", name.to_uppercase())
}

/// Replace every set `*_token` value by its placeholder. Unset tokens stay null.
pub(crate) fn redact_tokens(map: &mut Map<String, Value>) {
    for (k, v) in map.iter_mut() {
        if is_token_field(k) && !v.is_null() {
            *v = Value::String(token_placeholder(k));
        }
    }
}
