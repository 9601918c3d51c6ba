//! ATorch Arguments - extended training options
//!
//! `AtorchArgs` embeds the base training arguments and adds the options read by
//! the ATorch trainer: optimizer construction, loss computation, data loading,
//! FSDP wrapping policy, checkpoint sharding and scheduler selection.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use atorch_dist::DeviceHandle;
use serde::Serialize;
use tracing::info;

use super::checkpoint::parse_size;
use crate::config::BaseTrainingArgs;
use crate::error::ConfigError;
use crate::options::{Callable, EnumValue, ModuleSeq, OptionMap, OptionValue};
use crate::scheduler::{all_scheduler_names, LrSchedulerChoice};

pub const DEFAULT_MAX_SHARD_SIZE: &str = "10GB";

/// Training optimization strategy.
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AtorchOpt {
    #[default]
    Fsdp,
    Ddp,
}

impl AtorchOpt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fsdp => "fsdp",
            Self::Ddp => "ddp",
        }
    }

    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "fsdp" => Ok(Self::Fsdp),
            "ddp" => Ok(Self::Ddp),
            other => Err(ConfigError::InvalidChoice {
                field: "atorch_opt",
                value: other.to_string(),
                choices: "fsdp, ddp",
            }),
        }
    }
}

/// How a batch is passed to the model: `model(*data)` or `model(**data)`.
/// Unset means `model(data)`.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelInputFormat {
    UnpackSequence,
    UnpackDict,
}

impl ModelInputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnpackSequence => "unpack_sequence",
            Self::UnpackDict => "unpack_dict",
        }
    }

    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "unpack_sequence" => Ok(Self::UnpackSequence),
            "unpack_dict" => Ok(Self::UnpackDict),
            other => Err(ConfigError::InvalidChoice {
                field: "model_input_format",
                value: other.to_string(),
                choices: "unpack_sequence, unpack_dict",
            }),
        }
    }
}

impl From<AtorchOpt> for OptionValue {
    fn from(v: AtorchOpt) -> Self {
        OptionValue::Enum(EnumValue {
            kind: "AtorchOpt",
            value: v.as_str(),
        })
    }
}

impl From<ModelInputFormat> for OptionValue {
    fn from(v: ModelInputFormat) -> Self {
        OptionValue::Enum(EnumValue {
            kind: "ModelInputFormat",
            value: v.as_str(),
        })
    }
}

impl fmt::Display for AtorchOpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enum options accept either the enum itself or its string value.
fn enum_text(field: &str, value: &OptionValue) -> Result<Option<String>, ConfigError> {
    match value {
        OptionValue::Enum(e) => Ok(Some(e.value.to_string())),
        other => other.opt_string(field),
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct AtorchArgs {
    #[serde(flatten)]
    pub base: BaseTrainingArgs,

    // ATorch config
    pub save_load_by_streaming: bool,
    pub ignore_dryrun_on_load_strategy: bool,
    /// Only used together with auto-accelerate.
    pub atorch_parallel_mode: bool,
    pub atorch_opt: AtorchOpt,
    pub atorch_module_replace: bool,
    /// Only meaningful for PEFT models.
    pub save_base_model: bool,
    pub use_atorch_dataloader: bool,
    pub shuffle: bool,
    /// Called as `optim_func(params, **optim_args)`.
    pub optim_func: Option<Callable>,
    pub optim_args: Option<BTreeMap<String, OptionValue>>,
    pub optim_param_func: Option<Callable>,
    /// Returns a loss, or a sequence whose first element is the loss.
    pub loss_func: Option<Callable>,
    /// Called with (data, device) before each forward pass.
    pub prepare_input: Option<Callable>,
    pub model_input_format: Option<ModelInputFormat>,
    pub distributed_sampler_cls: Option<Callable>,
    pub excluded: Option<Vec<String>>,
    pub included: Option<Vec<String>>,
    pub finetune_strategy: bool,
    pub save_strategy_to_file: Option<String>,
    /// Module classes for gradient checkpointing.
    pub atorch_checkpoint_cls: Option<ModuleSeq>,
    pub use_default_data_collator: bool,
    pub ignore_write_errors: bool,
    pub async_save: bool,
    pub atorch_lr_scheduler_type: Option<LrSchedulerChoice>,

    // ATorch FSDP config
    /// Module classes to wrap with FSDP.
    pub atorch_wrap_cls: Option<ModuleSeq>,
    pub cpu_offload: bool,
    pub use_orig_params: bool,
    pub wrap_trainable_outmost: bool,
    pub sync_module_states: bool,
    pub limit_all_gathers: bool,
    pub forward_prefetch: bool,

    // ATorch amp config
    pub skip_if_nonfinite: bool,

    // Other config
    pub max_shard_size: String,

    // Derived, filled by `resolve_device`
    #[serde(skip)]
    pub(crate) device: Option<DeviceHandle>,
    #[serde(skip)]
    pub(crate) n_gpu: usize,
}

impl Default for AtorchArgs {
    fn default() -> Self {
        Self {
            base: BaseTrainingArgs::default(),
            save_load_by_streaming: false,
            ignore_dryrun_on_load_strategy: true,
            atorch_parallel_mode: true,
            atorch_opt: AtorchOpt::Fsdp,
            atorch_module_replace: true,
            save_base_model: false,
            use_atorch_dataloader: true,
            shuffle: true,
            optim_func: Some(Callable::builtin("AdamW")),
            optim_args: None,
            optim_param_func: None,
            loss_func: None,
            prepare_input: None,
            model_input_format: None,
            distributed_sampler_cls: None,
            excluded: None,
            included: None,
            finetune_strategy: false,
            save_strategy_to_file: None,
            atorch_checkpoint_cls: None,
            use_default_data_collator: false,
            ignore_write_errors: false,
            async_save: false,
            atorch_lr_scheduler_type: None,
            atorch_wrap_cls: None,
            cpu_offload: false,
            use_orig_params: true,
            wrap_trainable_outmost: false,
            sync_module_states: true,
            limit_all_gathers: true,
            forward_prefetch: true,
            skip_if_nonfinite: true,
            max_shard_size: DEFAULT_MAX_SHARD_SIZE.to_string(),
            device: None,
            n_gpu: 0,
        }
    }
}

impl AtorchArgs {
    /// Build from user options merged over the defaults, then validate.
    /// Options that are not ATorch options build the base arguments.
    pub fn from_options(options: OptionMap) -> Result<Self, ConfigError> {
        let mut args = Self::default();
        let mut base_options = serde_json::Map::new();
        for (name, value) in &options {
            if !args.set_atorch_option(name, value)? {
                base_options.insert(name.clone(), value.to_json());
            }
        }
        args.base = BaseTrainingArgs::from_json_map(base_options)?;
        args.validate()?;
        Ok(args)
    }

    /// Load options from a JSON object file, apply `key=value` overrides and
    /// build.
    pub fn from_json_file(path: impl AsRef<Path>, overrides: &[String]) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let json: serde_json::Value = serde_json::from_str(&text)?;

        let mut options = match OptionValue::from_json(&json) {
            OptionValue::Map(map) => map,
            other => {
                return Err(ConfigError::InvalidType {
                    field: path.display().to_string(),
                    expected: "JSON object",
                    found: other.type_name(),
                })
            }
        };

        for raw in overrides {
            let (key, value) = parse_override(raw)?;
            options.insert(key, value);
        }

        info!("Loaded {} options from {}", options.len(), path.display());
        Self::from_options(options)
    }

    /// Assign one ATorch option by name. Returns false for names it does not
    /// own.
    fn set_atorch_option(&mut self, name: &str, value: &OptionValue) -> Result<bool, ConfigError> {
        match name {
            "save_load_by_streaming" => self.save_load_by_streaming = value.expect_bool(name)?,
            "ignore_dryrun_on_load_strategy" => self.ignore_dryrun_on_load_strategy = value.expect_bool(name)?,
            "atorch_parallel_mode" => self.atorch_parallel_mode = value.expect_bool(name)?,
            "atorch_opt" => {
                self.atorch_opt = match enum_text(name, value)? {
                    Some(text) => AtorchOpt::parse(&text)?,
                    None => AtorchOpt::default(),
                }
            }
            "atorch_module_replace" => self.atorch_module_replace = value.expect_bool(name)?,
            "save_base_model" => self.save_base_model = value.expect_bool(name)?,
            "use_atorch_dataloader" => self.use_atorch_dataloader = value.expect_bool(name)?,
            "shuffle" => self.shuffle = value.expect_bool(name)?,
            "optim_func" => self.optim_func = value.opt_callable(name)?,
            "optim_args" => self.optim_args = value.opt_map(name)?,
            "optim_param_func" => self.optim_param_func = value.opt_callable(name)?,
            "loss_func" => self.loss_func = value.opt_callable(name)?,
            "prepare_input" => self.prepare_input = value.opt_callable(name)?,
            "model_input_format" => {
                self.model_input_format = enum_text(name, value)?
                    .map(|text| ModelInputFormat::parse(&text))
                    .transpose()?
            }
            "distributed_sampler_cls" => self.distributed_sampler_cls = value.opt_callable(name)?,
            "excluded" => self.excluded = value.opt_string_list(name)?,
            "included" => self.included = value.opt_string_list(name)?,
            "finetune_strategy" => self.finetune_strategy = value.expect_bool(name)?,
            "save_strategy_to_file" => self.save_strategy_to_file = value.opt_string(name)?,
            "atorch_checkpoint_cls" => {
                self.atorch_checkpoint_cls = ModuleSeq::from_option("atorch_checkpoint_cls", value)?
            }
            "use_default_data_collator" => self.use_default_data_collator = value.expect_bool(name)?,
            "ignore_write_errors" => self.ignore_write_errors = value.expect_bool(name)?,
            "async_save" => self.async_save = value.expect_bool(name)?,
            "atorch_lr_scheduler_type" => {
                self.atorch_lr_scheduler_type = enum_text(name, value)?.map(|text| LrSchedulerChoice::parse(&text))
            }
            "atorch_wrap_cls" => self.atorch_wrap_cls = ModuleSeq::from_option("atorch_wrap_cls", value)?,
            "cpu_offload" => self.cpu_offload = value.expect_bool(name)?,
            "use_orig_params" => self.use_orig_params = value.expect_bool(name)?,
            "wrap_trainable_outmost" => self.wrap_trainable_outmost = value.expect_bool(name)?,
            "sync_module_states" => self.sync_module_states = value.expect_bool(name)?,
            "limit_all_gathers" => self.limit_all_gathers = value.expect_bool(name)?,
            "forward_prefetch" => self.forward_prefetch = value.expect_bool(name)?,
            "skip_if_nonfinite" => self.skip_if_nonfinite = value.expect_bool(name)?,
            "max_shard_size" => self.max_shard_size = value.expect_string(name)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Construction-time checks. ATorch checks run before the base ones.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(report_to) = &self.base.report_to {
            match report_to.as_slice() {
                [target] if target == "tensorboard" => {}
                [target] if target == "all" => {
                    info!("AtorchTrainer only support TensorBoard to report the results and logs.")
                }
                other => return Err(ConfigError::UnsupportedReportTo(format!("{other:?}"))),
            }
        }

        if let Some(scheduler) = &self.atorch_lr_scheduler_type {
            if !scheduler.is_known() {
                return Err(ConfigError::InvalidScheduler {
                    value: scheduler.name().to_string(),
                    valid: all_scheduler_names(),
                });
            }
        }

        self.max_shard_size_bytes()?;

        self.base.validate()
    }

    /// `max_shard_size` in bytes.
    pub fn max_shard_size_bytes(&self) -> Result<u64, ConfigError> {
        parse_size(&self.max_shard_size).ok_or_else(|| ConfigError::InvalidShardSize(self.max_shard_size.clone()))
    }

    pub fn is_fsdp(&self) -> bool {
        self.atorch_opt == AtorchOpt::Fsdp
    }

    /// Class names to wrap with FSDP, empty when unset.
    pub fn wrap_cls_names(&self) -> Vec<String> {
        self.atorch_wrap_cls.as_ref().map(ModuleSeq::names).unwrap_or_default()
    }

    pub fn checkpoint_cls_names(&self) -> Vec<String> {
        self.atorch_checkpoint_cls
            .as_ref()
            .map(ModuleSeq::names)
            .unwrap_or_default()
    }
}

/// Options whose value is text. Overrides for them keep the raw text even when
/// it reads as a JSON number or bool (`max_shard_size=1000000`).
const STRING_OPTIONS: &[&str] = &[
    "output_dir",
    "logging_dir",
    "lr_scheduler_type",
    "ddp_backend",
    "hub_model_id",
    "hub_token",
    "atorch_opt",
    "optim_func",
    "optim_param_func",
    "loss_func",
    "prepare_input",
    "model_input_format",
    "distributed_sampler_cls",
    "save_strategy_to_file",
    "atorch_lr_scheduler_type",
    "max_shard_size",
];

/// `key=value`; the value is read as JSON when possible, else as a string.
pub fn parse_override(raw: &str) -> Result<(String, OptionValue), ConfigError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidOverride(raw.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::InvalidOverride(raw.to_string()));
    }
    let value = match serde_json::from_str::<serde_json::Value>(value) {
        Ok(serde_json::Value::Number(_) | serde_json::Value::Bool(_)) if STRING_OPTIONS.contains(&key) => {
            OptionValue::Str(value.to_string())
        }
        Ok(json) => OptionValue::from_json(&json),
        Err(_) => OptionValue::Str(value.to_string()),
    };
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ModuleRef, SeqKind};
    use crate::scheduler::AtorchSchedulerType;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    fn options(pairs: Vec<(&str, OptionValue)>) -> OptionMap {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_defaults() -> anyhow::Result<()> {
        let args = AtorchArgs::from_options(OptionMap::new())?;
        assert!(args.is_fsdp());
        assert!(args.use_atorch_dataloader);
        assert_eq!(args.optim_func.as_ref().and_then(Callable::name), Some("AdamW"));
        assert_eq!(args.max_shard_size_bytes()?, 10_000_000_000);
        assert_eq!(args.base.ddp_timeout, 1800);
        assert!(args.device().is_none());
        assert_eq!(args.n_gpu(), 0);
        Ok(())
    }

    #[test]
    fn test_unknown_scheduler_lists_registry() {
        let err = AtorchArgs::from_options(options(vec![(
            "atorch_lr_scheduler_type",
            OptionValue::str("bogus_scheduler"),
        )]))
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bogus_scheduler"));
        for name in all_scheduler_names() {
            assert!(msg.contains(&name), "{name} missing from {msg}");
        }
    }

    #[test]
    fn test_scheduler_enum_and_standard_names_accepted() -> anyhow::Result<()> {
        let args = AtorchArgs::from_options(options(vec![(
            "atorch_lr_scheduler_type",
            AtorchSchedulerType::CustomCosine.into(),
        )]))?;
        assert_eq!(
            args.atorch_lr_scheduler_type,
            Some(LrSchedulerChoice::Atorch(AtorchSchedulerType::CustomCosine))
        );

        let args = AtorchArgs::from_options(options(vec![("atorch_lr_scheduler_type", "cosine".into())]))?;
        assert_eq!(args.atorch_lr_scheduler_type.map(|s| s.name().to_string()), Some("cosine".to_string()));
        Ok(())
    }

    #[test]
    fn test_bare_checkpoint_cls_names_type() {
        let some_class = Callable::named("SomeClass", ());
        let err = AtorchArgs::from_options(options(vec![("atorch_checkpoint_cls", some_class.into())])).unwrap_err();
        assert!(matches!(err, ConfigError::NotSequence { field: "atorch_checkpoint_cls", .. }));
        assert!(err.to_string().contains("SomeClass"));
    }

    #[test]
    fn test_bare_wrap_cls_names_type() {
        let err = AtorchArgs::from_options(options(vec![("atorch_wrap_cls", OptionValue::Int(3))])).unwrap_err();
        assert_eq!(err.to_string(), "atorch_wrap_cls has int type, required tuple type.");
    }

    #[test]
    fn test_wrap_cls_tuple_of_classes_and_names() -> anyhow::Result<()> {
        let block = Callable::named("DecoderLayer", ());
        let args = AtorchArgs::from_options(options(vec![(
            "atorch_wrap_cls",
            OptionValue::Tuple(vec![block.clone().into(), "Embedding".into()]),
        )]))?;
        let wrap = args.atorch_wrap_cls.as_ref().expect("wrap cls set");
        assert_eq!(wrap.kind, SeqKind::Tuple);
        assert_eq!(wrap.items[0], ModuleRef::Class(block));
        assert_eq!(args.wrap_cls_names(), vec!["DecoderLayer", "Embedding"]);
        assert!(args.checkpoint_cls_names().is_empty());
        Ok(())
    }

    #[test]
    fn test_report_to_matrix() {
        let build = |v: OptionValue| AtorchArgs::from_options(options(vec![("report_to", v)]));

        assert!(build("tensorboard".into()).is_ok());
        assert!(build(vec!["tensorboard".to_string()].into()).is_ok());
        assert!(build("all".into()).is_ok());
        assert!(build(vec!["all".to_string()].into()).is_ok());

        for bad in [
            OptionValue::from("wandb"),
            vec!["tensorboard".to_string(), "wandb".to_string()].into(),
            OptionValue::List(vec![]),
        ] {
            let err = build(bad).unwrap_err();
            assert!(matches!(err, ConfigError::UnsupportedReportTo(_)));
        }
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` under a scoped subscriber and return what it logged.
    fn captured_logs<F: FnOnce()>(f: F) -> String {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.0.lock().unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn test_report_to_all_logs_tensorboard_caveat() {
        const CAVEAT: &str = "only support TensorBoard";

        for value in [OptionValue::from("all"), vec!["all".to_string()].into()] {
            let logs = captured_logs(|| {
                assert!(AtorchArgs::from_options(options(vec![("report_to", value)])).is_ok());
            });
            assert!(logs.contains(CAVEAT), "missing caveat in: {logs}");
        }

        let logs = captured_logs(|| {
            assert!(AtorchArgs::from_options(options(vec![("report_to", "tensorboard".into())])).is_ok());
        });
        assert!(!logs.contains(CAVEAT), "unexpected caveat in: {logs}");
    }

    #[test]
    fn test_invalid_choices() {
        let err = AtorchArgs::from_options(options(vec![("atorch_opt", "zero3".into())])).unwrap_err();
        assert!(err.to_string().contains("zero3"));

        let err = AtorchArgs::from_options(options(vec![("model_input_format", "unpack_tuple".into())])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidChoice { field: "model_input_format", .. }));
    }

    #[test]
    fn test_invalid_shard_size() {
        let err = AtorchArgs::from_options(options(vec![("max_shard_size", "ten gigs".into())])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidShardSize(_)));
    }

    #[test]
    fn test_base_validation_runs() {
        let err = AtorchArgs::from_options(options(vec![("fp16", true.into()), ("bf16", true.into())])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBase(_)));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = AtorchArgs::from_options(options(vec![("atorch_wrap", OptionValue::None)])).unwrap_err();
        assert!(matches!(err, ConfigError::BaseOption(_)));
        assert!(err.to_string().contains("atorch_wrap"));
    }

    #[test]
    fn test_parse_override() -> anyhow::Result<()> {
        assert_eq!(parse_override("shuffle=false")?, ("shuffle".to_string(), OptionValue::Bool(false)));
        assert_eq!(
            parse_override("max_shard_size=5GB")?,
            ("max_shard_size".to_string(), OptionValue::str("5GB"))
        );
        assert_eq!(
            parse_override("excluded=[\"amp_native\"]")?.1,
            OptionValue::Tuple(vec![OptionValue::str("amp_native")])
        );
        assert!(parse_override("novalue").is_err());

        // Text options keep numeric-looking values as text
        assert_eq!(parse_override("max_shard_size=1000000")?.1, OptionValue::str("1000000"));
        assert_eq!(parse_override("output_dir=2024")?.1, OptionValue::str("2024"));
        assert_eq!(parse_override("ddp_timeout=600")?.1, OptionValue::Int(600));
        Ok(())
    }
}
