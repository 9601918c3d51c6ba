//! Serialization - JSON-safe view of the arguments
//!
//! The whole record goes through serde (base fields flattened in), set tokens
//! are redacted, and every value comes back plain: enums become their value,
//! callables their name (or a rendering of the reference). Fields that hold
//! user sequences are re-inserted afterwards so tuples stay tuples.

use serde_json::Value;

use super::args::AtorchArgs;
use crate::config::{redact_tokens, to_json_object};
use crate::error::ConfigError;
use crate::options::{ModuleSeq, OptionMap, OptionValue};

fn seq_option(seq: Option<&ModuleSeq>) -> OptionValue {
    seq.map_or(OptionValue::None, ModuleSeq::to_option)
}

impl AtorchArgs {
    /// Plain mapping: no enum or callable anywhere in the values.
    pub fn to_dict(&self) -> OptionMap {
        let mut map = to_json_object(self);
        redact_tokens(&mut map);

        let mut d: OptionMap = map
            .iter()
            .map(|(k, v)| (k.clone(), OptionValue::from_serialized(v)))
            .collect();

        // JSON has a single array kind
        d.insert("atorch_wrap_cls".to_string(), seq_option(self.atorch_wrap_cls.as_ref()));
        d.insert("atorch_checkpoint_cls".to_string(), seq_option(self.atorch_checkpoint_cls.as_ref()));
        d.insert("optim_args".to_string(), self.optim_args.clone().into());

        d.into_iter().map(|(k, v)| (k, v.into_plain())).collect()
    }

    pub fn to_json_value(&self) -> Value {
        Value::Object(self.to_dict().iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(&self.to_json_value())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Callable, ModuleRef, ModuleSeq, SeqKind};
    use crate::scheduler::{AtorchSchedulerType, LrSchedulerChoice};

    struct CustomSampler;

    #[test]
    fn test_callables_become_names() {
        let args = AtorchArgs {
            loss_func: Some(Callable::named("cross_entropy", ())),
            prepare_input: Some(Callable::anonymous(|x: u8| x)),
            distributed_sampler_cls: Some(Callable::named("CustomSampler", CustomSampler)),
            ..Default::default()
        };
        let d = args.to_dict();
        assert_eq!(d["optim_func"], OptionValue::str("AdamW"));
        assert_eq!(d["loss_func"], OptionValue::str("cross_entropy"));
        assert_eq!(d["distributed_sampler_cls"], OptionValue::str("CustomSampler"));
        match &d["prepare_input"] {
            OptionValue::Str(s) => assert!(s.starts_with("<callable at ")),
            other => panic!("expected string rendering, got {other:?}"),
        }
        assert_eq!(d["optim_param_func"], OptionValue::None);
    }

    #[test]
    fn test_sequence_kind_is_preserved() {
        let args = AtorchArgs {
            atorch_wrap_cls: Some(ModuleSeq::tuple(vec![
                ModuleRef::Class(Callable::named("LlamaDecoderLayer", ())),
                ModuleRef::Name("Embedding".to_string()),
            ])),
            atorch_checkpoint_cls: Some(ModuleSeq {
                kind: SeqKind::List,
                items: vec![ModuleRef::Class(Callable::named("LlamaAttention", ()))],
            }),
            ..Default::default()
        };
        let d = args.to_dict();
        assert_eq!(
            d["atorch_wrap_cls"],
            OptionValue::Tuple(vec!["LlamaDecoderLayer".into(), "Embedding".into()])
        );
        assert_eq!(d["atorch_checkpoint_cls"], OptionValue::List(vec!["LlamaAttention".into()]));
    }

    #[test]
    fn test_enums_become_values() {
        let args = AtorchArgs {
            atorch_lr_scheduler_type: Some(LrSchedulerChoice::Atorch(AtorchSchedulerType::CustomCosine)),
            ..Default::default()
        };
        let d = args.to_dict();
        assert_eq!(d["atorch_lr_scheduler_type"], OptionValue::str("custom_cosine"));
        assert_eq!(d["atorch_opt"], OptionValue::str("fsdp"));
        assert_eq!(d["lr_scheduler_type"], OptionValue::str("linear"));
    }

    #[test]
    fn test_serialization_does_not_mutate() {
        let args = AtorchArgs {
            loss_func: Some(Callable::named("mse", ())),
            ..Default::default()
        };
        let _ = args.to_dict();
        assert!(matches!(&args.loss_func, Some(c) if c.name() == Some("mse")));
    }

    #[test]
    fn test_json_output() -> anyhow::Result<()> {
        let args = AtorchArgs {
            excluded: Some(vec!["zero2".to_string()]),
            ..Default::default()
        };
        let json: Value = serde_json::from_str(&args.to_json_string()?)?;
        assert_eq!(json["excluded"], serde_json::json!(["zero2"]));
        assert_eq!(json["max_shard_size"], "10GB");
        assert_eq!(json["hub_token"], Value::Null);
        assert!(json.get("device").is_none());
        Ok(())
    }

    #[test]
    fn test_set_tokens_are_redacted() {
        let mut args = AtorchArgs::default();
        args.base.hub_token = Some("hf_secret".to_string());
        let d = args.to_dict();
        assert_eq!(d["hub_token"], OptionValue::str("<HUB_TOKEN>"));
        assert!(!args.to_json_string().unwrap().contains("hf_secret"));
    }

    #[test]
    fn test_nested_optim_args_keep_tuples() {
        let mut optim_args = OptionMap::new();
        optim_args.insert(
            "betas".to_string(),
            OptionValue::Tuple(vec![OptionValue::Float(0.9), OptionValue::Float(0.95)]),
        );
        let args = AtorchArgs {
            optim_args: Some(optim_args),
            ..Default::default()
        };
        let OptionValue::Map(m) = &args.to_dict()["optim_args"] else {
            panic!("expected map");
        };
        assert!(matches!(m["betas"], OptionValue::Tuple(_)));
    }
}
