use std::fmt;

use serde::{Deserialize, Serialize};

/// The three plugin roles. The manager dispatches on this tag instead of
/// kind-specific subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Collector,
    Processor,
    Publisher,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Collector => write!(f, "collector"),
            PluginKind::Processor => write!(f, "processor"),
            PluginKind::Publisher => write!(f, "publisher"),
        }
    }
}

/// Lifecycle status of a logical plugin in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Loaded,
    Running,
    Unloaded,
}

/// Build the `name:version` fingerprint identifying a plugin.
pub fn plugin_key(name: &str, version: u32) -> String {
    format!("{}:{}", name, version)
}
