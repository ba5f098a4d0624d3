use serde::{Deserialize, Serialize};

use metrad_types::status_code::{ConfigCode, StatusCode};
use metrad_types::{make_error_msg, ConfigValue, Result};

/// The closed set of value types a rule can demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    String,
    Float,
    Bool,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Integer => "integer",
            ValueType::String => "string",
            ValueType::Float => "float",
            ValueType::Bool => "bool",
        }
    }

    /// Whether a concrete value satisfies this type.
    pub fn accepts(&self, value: &ConfigValue) -> bool {
        self.name() == value.type_name()
    }
}

/// One validation rule: a key name, the type it must carry, whether it is
/// required, and an optional default injected when the key is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub value_type: ValueType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ConfigValue>,
}

impl Rule {
    /// Build a rule. A supplied default must match the declared type.
    pub fn new(
        name: impl Into<String>,
        value_type: ValueType,
        required: bool,
        default: Option<ConfigValue>,
    ) -> Result<Self> {
        let name = name.into();
        if let Some(ref d) = default {
            if !value_type.accepts(d) {
                return make_error_msg(
                    StatusCode::INVALID_ARG,
                    format!(
                        "default for rule {} is {} but rule wants {}",
                        name,
                        d.type_name(),
                        value_type.name()
                    ),
                );
            }
        }
        Ok(Self {
            name,
            value_type,
            required,
            default,
        })
    }

    pub fn required(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            required: true,
            default: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        value_type: ValueType,
        default: Option<ConfigValue>,
    ) -> Self {
        Self {
            name: name.into(),
            value_type,
            required: false,
            default,
        }
    }
}

/// Error kind helper for a missing required key.
pub(crate) fn required_error(key: &str) -> metrad_types::Status {
    metrad_types::Status::with_message(
        ConfigCode::RULE_REQUIRED,
        format!("required key missing: {}", key),
    )
}

/// Error kind helper for a type mismatch.
pub(crate) fn type_error(key: &str, wanted: &str, got: &str) -> metrad_types::Status {
    metrad_types::Status::with_message(
        ConfigCode::TYPE_MISMATCH,
        format!("key {}: wanted {} got {}", key, wanted, got),
    )
}
