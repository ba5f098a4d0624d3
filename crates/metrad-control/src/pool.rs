use std::sync::Arc;

use parking_lot::Mutex;

use metrad_types::status_code::PluginCode;
use metrad_types::{make_error, make_error_msg, Generation, PluginId, Result};

use crate::available::AvailablePlugin;
use crate::strategy::{PoolMember, RoutingStrategy};

/// A stable reference to a pooled instance.
///
/// The generation tag detects ABA: any pool compaction bumps the generation,
/// invalidating handles issued before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApHandle {
    pub key: String,
    pub index: usize,
    pub generation: Generation,
}

struct PoolInner {
    slots: Vec<Arc<AvailablePlugin>>,
    generation: Generation,
}

/// The per-key arena of live plugin instances.
///
/// The pool owns its instances; indices are dense and reflect list positions
/// after every mutation.
pub struct Pool {
    key: String,
    inner: Mutex<PoolInner>,
}

impl Pool {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            inner: Mutex::new(PoolInner {
                slots: Vec::new(),
                generation: Generation(0),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn count(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn generation(&self) -> Generation {
        self.inner.lock().generation
    }

    /// Append an instance and hand back its handle.
    pub fn add(&self, ap: Arc<AvailablePlugin>) -> Result<ApHandle> {
        let mut inner = self.inner.lock();
        if inner.slots.iter().any(|s| Arc::ptr_eq(s, &ap)) {
            return make_error_msg(
                PluginCode::ALREADY_POOLED,
                format!("{:?} already pooled", ap),
            );
        }
        let index = inner.slots.len();
        inner.slots.push(ap);
        Ok(ApHandle {
            key: self.key.clone(),
            index,
            generation: inner.generation,
        })
    }

    /// Remove the instance a handle points at.
    ///
    /// The tail re-indexes to keep positions dense and the generation bumps,
    /// so every older handle goes stale.
    pub fn remove(&self, handle: &ApHandle) -> Result<Arc<AvailablePlugin>> {
        let mut inner = self.inner.lock();
        if handle.generation != inner.generation {
            return make_error_msg(
                PluginCode::STALE_HANDLE,
                format!(
                    "handle generation {} behind pool generation {}",
                    handle.generation, inner.generation
                ),
            );
        }
        if handle.index >= inner.slots.len() {
            return make_error(PluginCode::STALE_HANDLE);
        }
        let removed = inner.slots.remove(handle.index);
        inner.generation = Generation(*inner.generation + 1);
        Ok(removed)
    }

    /// Resolve a current handle for an instance by its id.
    pub fn handle_by_id(&self, id: PluginId) -> Option<ApHandle> {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .position(|s| s.id == id)
            .map(|index| ApHandle {
                key: self.key.clone(),
                index,
                generation: inner.generation,
            })
    }

    /// Pick a live instance with a routing strategy. The returned instance
    /// has its hit count already bumped.
    pub fn select(&self, strategy: &dyn RoutingStrategy) -> Result<Arc<AvailablePlugin>> {
        let inner = self.inner.lock();
        if inner.slots.is_empty() {
            return make_error_msg(PluginCode::POOL_EMPTY, self.key.clone());
        }
        let members: Vec<PoolMember> = inner
            .slots
            .iter()
            .enumerate()
            .map(|(index, s)| PoolMember {
                index,
                id: s.id,
                hit_count: s.hits(),
            })
            .collect();
        let Some(position) = strategy.select(&members) else {
            return make_error_msg(PluginCode::POOL_EMPTY, self.key.clone());
        };
        let chosen = Arc::clone(&inner.slots[members[position].index]);
        drop(inner);
        chosen.exercise();
        Ok(chosen)
    }

    /// Every instance currently pooled, in slot order.
    pub fn instances(&self) -> Vec<Arc<AvailablePlugin>> {
        self.inner.lock().slots.clone()
    }

    /// Drain the pool, returning every instance. Bumps the generation.
    pub fn drain(&self) -> Vec<Arc<AvailablePlugin>> {
        let mut inner = self.inner.lock();
        inner.generation = Generation(*inner.generation + 1);
        std::mem::take(&mut inner.slots)
    }
}
