use serde::{Deserialize, Serialize};

use metrad_types::status_code::StatusCode;
use metrad_types::{make_error_msg, Result};

/// Work manager and task defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Bounded size of each job queue.
    pub queue_size: usize,
    /// Workers per queue.
    pub pool_size: usize,
    /// Default per-firing deadline.
    pub default_deadline_ms: u64,
    /// Consecutive failures before a task disables itself.
    pub failure_threshold: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_size: 25,
            pool_size: 4,
            default_deadline_ms: 5_000,
            failure_threshold: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_size == 0 {
            return make_error_msg(StatusCode::INVALID_CONFIG, "queue_size must be > 0");
        }
        if self.pool_size == 0 {
            return make_error_msg(StatusCode::INVALID_CONFIG, "pool_size must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_size, 25);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.default_deadline_ms, 5_000);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut config = SchedulerConfig::default();
        config.queue_size = 0;
        assert!(config.validate().is_err());

        let mut config = SchedulerConfig::default();
        config.pool_size = 0;
        assert!(config.validate().is_err());
    }
}
