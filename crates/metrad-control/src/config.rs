use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use metrad_types::status_code::StatusCode;
use metrad_types::{make_error_msg, Result};

/// Tunables of the plugin control plane. Intervals are plain milliseconds so
/// the struct stays TOML-friendly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Maximum live instances per loaded plugin.
    pub max_running_plugins: usize,
    /// Cadence of the per-instance health check loop.
    pub health_interval_ms: u64,
    /// Consecutive ping failures before an instance is disabled.
    pub health_failure_limit: u32,
    pub dial_timeout_ms: u64,
    pub ping_timeout_ms: u64,
    pub kill_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Directory plugin children log into; unset disables plugin logs.
    pub plugin_log_dir: Option<PathBuf>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_running_plugins: 3,
            health_interval_ms: 1_000,
            health_failure_limit: 3,
            dial_timeout_ms: 3_000,
            ping_timeout_ms: 1_000,
            kill_timeout_ms: 3_000,
            handshake_timeout_ms: 3_000,
            plugin_log_dir: None,
        }
    }
}

impl ControlConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_running_plugins == 0 {
            return make_error_msg(StatusCode::INVALID_CONFIG, "max_running_plugins must be > 0");
        }
        if self.health_failure_limit == 0 {
            return make_error_msg(StatusCode::INVALID_CONFIG, "health_failure_limit must be > 0");
        }
        if self.health_interval_ms == 0 {
            return make_error_msg(StatusCode::INVALID_CONFIG, "health_interval_ms must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ControlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_running_plugins, 3);
        assert_eq!(config.health_failure_limit, 3);
        assert_eq!(config.health_interval(), Duration::from_secs(1));
        assert_eq!(config.ping_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = ControlConfig::default();
        config.max_running_plugins = 0;
        assert!(config.validate().is_err());

        let mut config = ControlConfig::default();
        config.health_failure_limit = 0;
        assert!(config.validate().is_err());

        let mut config = ControlConfig::default();
        config.health_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ControlConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: ControlConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.health_interval_ms, config.health_interval_ms);
    }
}
