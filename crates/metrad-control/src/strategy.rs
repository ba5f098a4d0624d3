use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::Rng;

use metrad_types::PluginId;

/// A view of one pool slot a strategy can select from.
#[derive(Debug, Clone)]
pub struct PoolMember {
    pub index: usize,
    pub id: PluginId,
    pub hit_count: u64,
}

/// Pluggable routing rule for choosing a live instance out of a pool.
pub trait RoutingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return the chosen member's position in `members`, or `None` when the
    /// slice is empty.
    fn select(&self, members: &[PoolMember]) -> Option<usize>;
}

/// Prefer the instance with the lowest hit count; break ties by a random
/// choice among the tied candidates.
#[derive(Debug, Default)]
pub struct LeastUsed;

impl RoutingStrategy for LeastUsed {
    fn name(&self) -> &'static str {
        "least-used"
    }

    fn select(&self, members: &[PoolMember]) -> Option<usize> {
        let lowest = members.iter().map(|m| m.hit_count).min()?;
        let tied: Vec<usize> = members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.hit_count == lowest)
            .map(|(i, _)| i)
            .collect();
        if tied.len() == 1 {
            return Some(tied[0]);
        }
        let pick = rand::thread_rng().gen_range(0..tied.len());
        Some(tied[pick])
    }
}

/// Route by hash of an opaque key, so the same key keeps landing on the same
/// instance while the pool is stable.
#[derive(Debug)]
pub struct StickyRandom {
    pub key: String,
}

impl StickyRandom {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl RoutingStrategy for StickyRandom {
    fn name(&self) -> &'static str {
        "sticky-random"
    }

    fn select(&self, members: &[PoolMember]) -> Option<usize> {
        if members.is_empty() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        self.key.hash(&mut hasher);
        Some((hasher.finish() as usize) % members.len())
    }
}
