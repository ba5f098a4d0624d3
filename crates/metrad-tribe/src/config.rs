use std::time::Duration;

use serde::{Deserialize, Serialize};

use metrad_types::status_code::StatusCode;
use metrad_types::{make_error_msg, Result};

/// Tribe tunables. The gossip fan-out doubles the membership default so
/// agreement changes spread fast relative to the long push/pull cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TribeConfig {
    /// This node's name within the cluster.
    pub name: String,
    /// Seed node address to join through; unset starts a fresh cluster.
    pub seed: Option<String>,
    pub push_pull_interval_ms: u64,
    pub gossip_nodes: usize,
    /// Size of the duplicate-detection message ring.
    pub ring_size: usize,
}

impl Default for TribeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            seed: None,
            push_pull_interval_ms: 300_000,
            gossip_nodes: 6,
            ring_size: 512,
        }
    }
}

impl TribeConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn push_pull_interval(&self) -> Duration {
        Duration::from_millis(self.push_pull_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return make_error_msg(StatusCode::INVALID_CONFIG, "tribe node name required");
        }
        if self.ring_size == 0 {
            return make_error_msg(StatusCode::INVALID_CONFIG, "ring_size must be > 0");
        }
        Ok(())
    }
}
