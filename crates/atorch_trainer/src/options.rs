//! Option Values - user-supplied argument values
//!
//! Arguments arrive as a name -> value mapping. Values are a closed set of
//! shapes; callables and enums are carried opaquely until serialization turns
//! them into plain strings.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::ConfigError;

pub type OptionMap = BTreeMap<String, OptionValue>;

/// Opaque reference to a user function or class (optimizer factory, loss
/// function, sampler class, module class...). Never invoked here.
#[derive(Clone)]
pub struct Callable {
    name: Option<String>,
    target: Arc<dyn Any + Send + Sync>,
}

impl Callable {
    pub fn named<T: Any + Send + Sync>(name: impl Into<String>, target: T) -> Self {
        Self {
            name: Some(name.into()),
            target: Arc::new(target),
        }
    }

    pub fn anonymous<T: Any + Send + Sync>(target: T) -> Self {
        Self {
            name: None,
            target: Arc::new(target),
        }
    }

    /// A reference known only by name (built-in optimizers, registered classes).
    pub fn builtin(name: &str) -> Self {
        Self::named(name, ())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.target.downcast_ref::<T>()
    }

    /// Declared name, or a rendering of the reference itself.
    pub fn render(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("<callable at {:p}>", Arc::as_ptr(&self.target).cast::<()>()),
        }
    }
}

impl Serialize for Callable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.target), Arc::as_ptr(&other.target))
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.render())
    }
}

/// Enumerated value: the enum's type name and its underlying string value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnumValue {
    pub kind: &'static str,
    pub value: &'static str,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<OptionValue>),
    Tuple(Vec<OptionValue>),
    Map(BTreeMap<String, OptionValue>),
    Callable(Callable),
    Enum(EnumValue),
}

impl OptionValue {
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Name of the received shape, used in type errors.
    pub fn type_name(&self) -> String {
        match self {
            Self::None => "NoneType".to_string(),
            Self::Bool(_) => "bool".to_string(),
            Self::Int(_) => "int".to_string(),
            Self::Float(_) => "float".to_string(),
            Self::Str(_) => "str".to_string(),
            Self::List(_) => "list".to_string(),
            Self::Tuple(_) => "tuple".to_string(),
            Self::Map(_) => "dict".to_string(),
            Self::Callable(c) => match c.name() {
                Some(name) => format!("callable '{name}'"),
                None => "callable".to_string(),
            },
            Self::Enum(e) => e.kind.to_string(),
        }
    }

    /// True when no callable or enum appears anywhere in the value.
    pub fn is_plain(&self) -> bool {
        match self {
            Self::Callable(_) | Self::Enum(_) => false,
            Self::List(items) | Self::Tuple(items) => items.iter().all(OptionValue::is_plain),
            Self::Map(map) => map.values().all(OptionValue::is_plain),
            _ => true,
        }
    }

    /// Enums become their value, callables their name (or rendering).
    /// Sequences keep their kind and are converted element by element.
    pub fn into_plain(self) -> Self {
        match self {
            Self::Callable(c) => Self::Str(c.render()),
            Self::Enum(e) => Self::Str(e.value.to_string()),
            Self::List(items) => Self::List(items.into_iter().map(OptionValue::into_plain).collect()),
            Self::Tuple(items) => Self::Tuple(items.into_iter().map(OptionValue::into_plain).collect()),
            Self::Map(map) => Self::Map(map.into_iter().map(|(k, v)| (k, v.into_plain())).collect()),
            other => other,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::None => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Str(s) => Value::String(s.clone()),
            Self::List(items) | Self::Tuple(items) => Value::Array(items.iter().map(OptionValue::to_json).collect()),
            Self::Map(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            Self::Callable(c) => Value::String(c.render()),
            Self::Enum(e) => Value::String(e.value.to_string()),
        }
    }

    /// JSON arrays load as tuples so class-name lists stay sequence-typed.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::None,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::Str(s.clone()),
            Value::Array(items) => Self::Tuple(items.iter().map(OptionValue::from_json).collect()),
            Value::Object(map) => Self::Map(map.iter().map(|(k, v)| (k.clone(), OptionValue::from_json(v))).collect()),
        }
    }

    /// Like [`OptionValue::from_json`], but arrays come back as lists. Used
    /// for values produced by serializing the argument record itself.
    pub fn from_serialized(value: &Value) -> Self {
        match value {
            Value::Array(items) => Self::List(items.iter().map(OptionValue::from_serialized).collect()),
            Value::Object(map) => Self::Map(map.iter().map(|(k, v)| (k.clone(), OptionValue::from_serialized(v))).collect()),
            scalar => Self::from_json(scalar),
        }
    }

    fn mismatch(&self, field: &str, expected: &'static str) -> ConfigError {
        ConfigError::InvalidType {
            field: field.to_string(),
            expected,
            found: self.type_name(),
        }
    }

    pub fn expect_bool(&self, field: &str) -> Result<bool, ConfigError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(other.mismatch(field, "bool")),
        }
    }

    pub fn expect_i64(&self, field: &str) -> Result<i64, ConfigError> {
        match self {
            Self::Int(i) => Ok(*i),
            other => Err(other.mismatch(field, "int")),
        }
    }

    pub fn expect_usize(&self, field: &str) -> Result<usize, ConfigError> {
        match self {
            Self::Int(i) if *i >= 0 => Ok(*i as usize),
            other => Err(other.mismatch(field, "non-negative int")),
        }
    }

    pub fn expect_f64(&self, field: &str) -> Result<f64, ConfigError> {
        match self {
            Self::Float(f) => Ok(*f),
            Self::Int(i) => Ok(*i as f64),
            other => Err(other.mismatch(field, "float")),
        }
    }

    pub fn expect_string(&self, field: &str) -> Result<String, ConfigError> {
        match self {
            Self::Str(s) => Ok(s.clone()),
            other => Err(other.mismatch(field, "str")),
        }
    }

    pub fn opt_string(&self, field: &str) -> Result<Option<String>, ConfigError> {
        match self {
            Self::None => Ok(None),
            other => other.expect_string(field).map(Some),
        }
    }

    pub fn opt_usize(&self, field: &str) -> Result<Option<usize>, ConfigError> {
        match self {
            Self::None => Ok(None),
            other => other.expect_usize(field).map(Some),
        }
    }

    pub fn opt_string_list(&self, field: &str) -> Result<Option<Vec<String>>, ConfigError> {
        match self {
            Self::None => Ok(None),
            Self::List(items) | Self::Tuple(items) => items
                .iter()
                .map(|item| match item {
                    Self::Str(s) => Ok(s.clone()),
                    other => Err(other.mismatch(field, "list of str")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            other => Err(other.mismatch(field, "list of str")),
        }
    }

    pub fn opt_callable(&self, field: &str) -> Result<Option<Callable>, ConfigError> {
        match self {
            Self::None => Ok(None),
            Self::Callable(c) => Ok(Some(c.clone())),
            // Saved arguments carry callables by name only.
            Self::Str(name) => Ok(Some(Callable::builtin(name))),
            other => Err(other.mismatch(field, "callable or name")),
        }
    }

    pub fn opt_map(&self, field: &str) -> Result<Option<BTreeMap<String, OptionValue>>, ConfigError> {
        match self {
            Self::None => Ok(None),
            Self::Map(map) => Ok(Some(map.clone())),
            other => Err(other.mismatch(field, "dict")),
        }
    }
}

impl Serialize for OptionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for OptionValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for OptionValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Callable> for OptionValue {
    fn from(c: Callable) -> Self {
        Self::Callable(c)
    }
}

impl<T: Into<OptionValue>> From<Option<T>> for OptionValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::None, Into::into)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items.into_iter().map(Self::Str).collect())
    }
}

impl From<BTreeMap<String, OptionValue>> for OptionValue {
    fn from(map: BTreeMap<String, OptionValue>) -> Self {
        Self::Map(map)
    }
}

/// Element of `atorch_wrap_cls` / `atorch_checkpoint_cls`.
#[derive(Clone, Debug, PartialEq)]
pub enum ModuleRef {
    Class(Callable),
    Name(String),
}

impl ModuleRef {
    pub fn render(&self) -> String {
        match self {
            Self::Class(c) => c.render(),
            Self::Name(n) => n.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeqKind {
    List,
    Tuple,
}

/// Sequence of module classes or class names.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleSeq {
    pub kind: SeqKind,
    pub items: Vec<ModuleRef>,
}

impl ModuleSeq {
    pub fn tuple(items: Vec<ModuleRef>) -> Self {
        Self {
            kind: SeqKind::Tuple,
            items,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(ModuleRef::render).collect()
    }

    /// Bare values (a single class, a single name...) are rejected with the
    /// received type in the message.
    pub fn from_option(field: &'static str, value: &OptionValue) -> Result<Option<Self>, ConfigError> {
        let (kind, items) = match value {
            OptionValue::None => return Ok(None),
            OptionValue::List(items) => (SeqKind::List, items),
            OptionValue::Tuple(items) => (SeqKind::Tuple, items),
            other => {
                return Err(ConfigError::NotSequence {
                    field,
                    found: other.type_name(),
                })
            }
        };

        let items = items
            .iter()
            .map(|item| match item {
                OptionValue::Callable(c) => Ok(ModuleRef::Class(c.clone())),
                OptionValue::Str(s) => Ok(ModuleRef::Name(s.clone())),
                other => Err(other.mismatch(field, "sequence of classes or class names")),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Self { kind, items }))
    }

    pub fn to_option(&self) -> OptionValue {
        let items = self
            .items
            .iter()
            .map(|item| match item {
                ModuleRef::Class(c) => OptionValue::Callable(c.clone()),
                ModuleRef::Name(n) => OptionValue::Str(n.clone()),
            })
            .collect();
        match self.kind {
            SeqKind::List => OptionValue::List(items),
            SeqKind::Tuple => OptionValue::Tuple(items),
        }
    }
}

/// Serializes as the sequence of class names.
impl Serialize for ModuleSeq {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.iter().map(ModuleRef::render))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DecoderLayer;

    #[test]
    fn test_callable_rendering() {
        let named = Callable::named("DecoderLayer", DecoderLayer);
        assert_eq!(named.render(), "DecoderLayer");

        let anonymous = Callable::anonymous(|x: f32| x * 2.0);
        assert!(anonymous.render().starts_with("<callable at 0x"));
        assert_eq!(anonymous, anonymous.clone());
        assert_ne!(anonymous, Callable::anonymous(()));
    }

    #[test]
    fn test_downcast_keeps_target() {
        let c = Callable::named("scale", 3_u32);
        assert_eq!(c.downcast_ref::<u32>(), Some(&3));
        assert!(c.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_into_plain_is_recursive() {
        let value = OptionValue::Tuple(vec![
            OptionValue::str("Block"),
            OptionValue::Callable(Callable::builtin("Attention")),
            OptionValue::List(vec![OptionValue::Enum(EnumValue {
                kind: "AtorchSchedulerType",
                value: "custom_cosine",
            })]),
        ]);
        assert!(!value.is_plain());

        let plain = value.into_plain();
        assert!(plain.is_plain());
        assert_eq!(
            plain,
            OptionValue::Tuple(vec![
                OptionValue::str("Block"),
                OptionValue::str("Attention"),
                OptionValue::List(vec![OptionValue::str("custom_cosine")]),
            ])
        );
    }

    #[test]
    fn test_module_seq_rejects_bare_values() {
        let bare = OptionValue::Callable(Callable::named("SomeClass", ()));
        let err = ModuleSeq::from_option("atorch_wrap_cls", &bare).unwrap_err();
        assert!(err.to_string().contains("SomeClass"));

        let err = ModuleSeq::from_option("atorch_wrap_cls", &OptionValue::str("Block")).unwrap_err();
        assert!(matches!(err, ConfigError::NotSequence { found, .. } if found == "str"));
    }

    #[test]
    fn test_json_arrays_load_as_tuples() {
        let json = serde_json::json!({"cls": ["A", "B"], "n": 3, "x": 0.5});
        let value = OptionValue::from_json(&json);
        let OptionValue::Map(map) = value else {
            panic!("expected map");
        };
        assert_eq!(map["cls"], OptionValue::Tuple(vec![OptionValue::str("A"), OptionValue::str("B")]));
        assert_eq!(map["n"], OptionValue::Int(3));
        assert_eq!(map["x"], OptionValue::Float(0.5));
    }

    #[test]
    fn test_serialize_renders_names() {
        let seq = ModuleSeq {
            kind: SeqKind::List,
            items: vec![
                ModuleRef::Class(Callable::named("DecoderLayer", DecoderLayer)),
                ModuleRef::Name("Attention".to_string()),
            ],
        };
        assert_eq!(serde_json::to_value(&seq).unwrap(), serde_json::json!(["DecoderLayer", "Attention"]));
        assert_eq!(
            serde_json::to_value(Callable::builtin("seed_fn")).unwrap(),
            serde_json::json!("seed_fn")
        );

        let back = OptionValue::from_serialized(&serde_json::json!({"a": [1, [2.5]]}));
        let OptionValue::Map(map) = back else {
            panic!("expected map");
        };
        assert_eq!(
            map["a"],
            OptionValue::List(vec![OptionValue::Int(1), OptionValue::List(vec![OptionValue::Float(2.5)])])
        );
    }
}
