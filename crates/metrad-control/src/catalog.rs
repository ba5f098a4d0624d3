use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use metrad_policy::ConfigPolicy;
use metrad_types::status_code::MetricCode;
use metrad_types::{
    make_error_msg, ConfigDataNode, MetricType, Namespace, RequestedMetric, Result,
};

struct CatalogInner {
    /// Every advertised metric type, newest registration last.
    types: Vec<MetricType>,
    /// Config policy per plugin key.
    policies: HashMap<String, ConfigPolicy>,
    /// Subscription refcount per plugin key. A plugin cannot unload while
    /// its count is non-zero.
    subscriptions: HashMap<String, usize>,
}

/// The authoritative in-memory registry of advertised metric types.
///
/// Many readers (subscription resolution), few writers (plugin load/unload).
pub struct MetricCatalog {
    inner: RwLock<CatalogInner>,
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricCatalog {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CatalogInner {
                types: Vec::new(),
                policies: HashMap::new(),
                subscriptions: HashMap::new(),
            }),
        }
    }

    /// Register the metric types a collector advertised, plus its policy.
    pub fn add_plugin(&self, key: &str, types: Vec<MetricType>, policy: ConfigPolicy) {
        let mut inner = self.inner.write();
        debug!(plugin = key, count = types.len(), "cataloging metric types");
        inner.types.extend(types);
        inner.policies.insert(key.to_string(), policy);
    }

    /// Drop every catalog entry owned by a plugin key.
    pub fn remove_plugin(&self, key: &str) {
        let mut inner = self.inner.write();
        inner.types.retain(|t| t.plugin_key != key);
        inner.policies.remove(key);
        inner.subscriptions.remove(key);
    }

    pub fn policy(&self, key: &str) -> Option<ConfigPolicy> {
        self.inner.read().policies.get(key).cloned()
    }

    /// Every cataloged metric type, optionally filtered to one namespace.
    pub fn list(&self, namespace: Option<&Namespace>) -> Vec<MetricType> {
        let inner = self.inner.read();
        inner
            .types
            .iter()
            .filter(|t| namespace.map_or(true, |ns| t.namespace.matches(ns) || &t.namespace == ns))
            .cloned()
            .collect()
    }

    /// Resolve a requested metric to the concrete advertised type.
    ///
    /// A dynamic advertised namespace matches a concrete request; a missing
    /// version pin selects the highest advertised version.
    pub fn resolve(&self, requested: &RequestedMetric) -> Result<MetricType> {
        let inner = self.inner.read();
        let candidates: Vec<&MetricType> = inner
            .types
            .iter()
            .filter(|t| {
                t.namespace == requested.namespace || t.namespace.matches(&requested.namespace)
            })
            .collect();
        if candidates.is_empty() {
            return make_error_msg(
                MetricCode::NOT_FOUND,
                format!("{}", requested.namespace),
            );
        }
        match requested.version {
            None => Ok(candidates
                .into_iter()
                .max_by_key(|t| t.version)
                .cloned()
                .expect("candidates nonempty")),
            Some(version) => candidates
                .into_iter()
                .find(|t| t.version == version)
                .cloned()
                .ok_or_else(|| {
                    metrad_types::Status::with_message(
                        MetricCode::VERSION_MISMATCH,
                        format!("{} v{}", requested.namespace, version),
                    )
                }),
        }
    }

    /// Resolve and take a subscription against the owning plugin.
    ///
    /// The caller's config is validated against the plugin's policy at the
    /// metric's namespace before the subscription is counted.
    pub fn subscribe(
        &self,
        requested: &RequestedMetric,
        config: &ConfigDataNode,
    ) -> Result<MetricType> {
        let mut resolved = self.resolve(requested)?;

        resolved.config = Some(config.clone());
        if let Some(policy) = self.policy(&resolved.plugin_key) {
            let node = policy.get(&resolved.namespace.strings());
            let mut outcome = node.process(config);
            if let Some(error) = outcome.errors.drain(..).next() {
                return Err(error);
            }
            // Keep the default-injected form on the subscription.
            resolved.config = outcome.config;
        }

        let mut inner = self.inner.write();
        *inner
            .subscriptions
            .entry(resolved.plugin_key.clone())
            .or_insert(0) += 1;
        Ok(resolved)
    }

    /// Release a subscription taken via `subscribe`. Idempotent: releasing
    /// below zero is a no-op.
    pub fn unsubscribe(&self, metric: &MetricType) {
        self.release(&metric.plugin_key);
    }

    /// Count a subscription against a processor/publisher plugin key.
    pub fn subscribe_plugin(&self, key: &str) {
        let mut inner = self.inner.write();
        *inner.subscriptions.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Release one subscription for a plugin key; no-op at zero.
    pub fn release(&self, key: &str) {
        let mut inner = self.inner.write();
        if let Some(count) = inner.subscriptions.get_mut(key) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn subscription_count(&self, key: &str) -> usize {
        self.inner
            .read()
            .subscriptions
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}
