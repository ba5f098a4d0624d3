use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A typed configuration value. The set of types is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigValue {
    Integer(i64),
    Str(String),
    Float(f64),
    Bool(bool),
}

impl ConfigValue {
    /// The keyword used by policy rules to name this value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Integer(_) => "integer",
            ConfigValue::Str(_) => "string",
            ConfigValue::Float(_) => "float",
            ConfigValue::Bool(_) => "bool",
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Integer(v) => write!(f, "{}", v),
            ConfigValue::Str(v) => write!(f, "{}", v),
            ConfigValue::Float(v) => write!(f, "{}", v),
            ConfigValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Integer(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Str(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::Str(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

/// A flat mapping of configuration keys to typed values.
///
/// Merging is whole-value per key: the right-hand side wins, a value is never
/// partially combined across types.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDataNode {
    table: BTreeMap<String, ConfigValue>,
}

impl ConfigDataNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.table.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.table.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        self.table.remove(key)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.table.iter()
    }

    /// Merge `other` into this node; on key conflict the value from `other`
    /// wins.
    pub fn merge(&mut self, other: &ConfigDataNode) {
        for (k, v) in other.table.iter() {
            self.table.insert(k.clone(), v.clone());
        }
    }

    /// Merge two nodes into a fresh one, `right` winning per key.
    pub fn merged(left: &ConfigDataNode, right: &ConfigDataNode) -> ConfigDataNode {
        let mut out = left.clone();
        out.merge(right);
        out
    }
}
