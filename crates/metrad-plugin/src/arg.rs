use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The compact JSON object passed to a plugin binary as its single CLI
/// argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginArg {
    #[serde(rename = "RunAsDaemon")]
    pub run_as_daemon: bool,
    #[serde(rename = "ListenPort", default)]
    pub listen_port: String,
    #[serde(rename = "PluginLogPath", default)]
    pub plugin_log_path: String,
    /// Nanoseconds, matching the launch contract.
    #[serde(rename = "PingTimeoutDuration")]
    pub ping_timeout_nanos: u64,
}

impl PluginArg {
    pub fn new(ping_timeout: Duration, log_path: Option<PathBuf>) -> Self {
        Self {
            run_as_daemon: true,
            listen_port: String::new(),
            plugin_log_path: log_path
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            ping_timeout_nanos: ping_timeout.as_nanos() as u64,
        }
    }

    /// Render the argument as the compact JSON string handed to the child.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
