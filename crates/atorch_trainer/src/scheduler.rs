//! Learning-rate scheduler registry
//!
//! Standard scheduler names plus the ATorch extensions. Both lists are static,
//! `atorch_lr_scheduler_type` is checked against their union.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::options::{EnumValue, OptionValue};

macro_rules! scheduler_enum {
    ($name:ident, $names:ident, { $($variant:ident => $value:literal),+ $(,)? }) => {
        #[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        pub const $names: &[&str] = &[$($value),+];

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($value => Ok($name::$variant),)+
                    other => Err(other.to_string()),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<$name> for OptionValue {
            fn from(v: $name) -> Self {
                OptionValue::Enum(EnumValue {
                    kind: stringify!($name),
                    value: v.as_str(),
                })
            }
        }
    };
}

scheduler_enum!(SchedulerType, SCHEDULER_NAMES, {
    Linear => "linear",
    Cosine => "cosine",
    CosineWithRestarts => "cosine_with_restarts",
    Polynomial => "polynomial",
    Constant => "constant",
    ConstantWithWarmup => "constant_with_warmup",
    InverseSqrt => "inverse_sqrt",
    ReduceLrOnPlateau => "reduce_lr_on_plateau",
    CosineWithMinLr => "cosine_with_min_lr",
    WarmupStableDecay => "warmup_stable_decay",
});

scheduler_enum!(AtorchSchedulerType, ATORCH_SCHEDULER_NAMES, {
    CustomCosine => "custom_cosine",
    CosineWithMinLrRatio => "cosine_with_min_lr_ratio",
    LinearWithMinLr => "linear_with_min_lr",
});

/// Standard names followed by ATorch names.
pub fn all_scheduler_names() -> Vec<String> {
    SCHEDULER_NAMES
        .iter()
        .chain(ATORCH_SCHEDULER_NAMES)
        .map(|s| s.to_string())
        .collect()
}

pub fn is_known_scheduler(name: &str) -> bool {
    SCHEDULER_NAMES.contains(&name) || ATORCH_SCHEDULER_NAMES.contains(&name)
}

/// `atorch_lr_scheduler_type` accepts an ATorch enum, a standard enum or a
/// free-form name. Free-form names are only checked at validation time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LrSchedulerChoice {
    Atorch(AtorchSchedulerType),
    Standard(SchedulerType),
    Named(String),
}

impl LrSchedulerChoice {
    pub fn parse(name: &str) -> Self {
        if let Ok(t) = name.parse::<AtorchSchedulerType>() {
            Self::Atorch(t)
        } else if let Ok(t) = name.parse::<SchedulerType>() {
            Self::Standard(t)
        } else {
            Self::Named(name.to_string())
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Atorch(t) => t.as_str(),
            Self::Standard(t) => t.as_str(),
            Self::Named(n) => n,
        }
    }

    pub fn is_known(&self) -> bool {
        match self {
            Self::Named(n) => is_known_scheduler(n),
            _ => true,
        }
    }

    pub fn to_option(&self) -> OptionValue {
        match self {
            Self::Atorch(t) => (*t).into(),
            Self::Standard(t) => (*t).into(),
            Self::Named(n) => OptionValue::Str(n.clone()),
        }
    }
}

impl Serialize for LrSchedulerChoice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}
