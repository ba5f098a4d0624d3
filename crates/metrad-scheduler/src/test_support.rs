//! A hand-rolled metric manager double for scheduler tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use metrad_control::ManagesMetrics;
use metrad_types::status_code::{MetricCode, PluginCode};
use metrad_types::{
    make_error_msg, plugin_key, ConfigDataNode, Metric, MetricData, MetricType, PluginKind,
    RequestedMetric, Result,
};

struct MockPlugin {
    kind: PluginKind,
    accepted: Vec<String>,
    returned: Vec<String>,
}

#[derive(Default)]
pub struct MockMetricManager {
    plugins: Mutex<HashMap<String, MockPlugin>>,
    types: Mutex<Vec<MetricType>>,
    subscriptions: Mutex<HashMap<String, usize>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    collect_delay: Mutex<Duration>,
    fail_collect: AtomicBool,
}

impl MockMetricManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plugin(
        &self,
        name: &str,
        version: u32,
        kind: PluginKind,
        accepted: Vec<String>,
        returned: Vec<String>,
    ) {
        self.plugins.lock().insert(
            plugin_key(name, version),
            MockPlugin {
                kind,
                accepted,
                returned,
            },
        );
    }

    pub fn add_metric_type(&self, metric: MetricType) {
        self.types.lock().push(metric);
    }

    pub fn subscription_count(&self, name: &str, version: u32) -> usize {
        self.subscriptions
            .lock()
            .get(&plugin_key(name, version))
            .copied()
            .unwrap_or(0)
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().clone()
    }

    pub fn set_collect_delay(&self, delay: Duration) {
        *self.collect_delay.lock() = delay;
    }

    pub fn set_fail_collect(&self, fail: bool) {
        self.fail_collect.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ManagesMetrics for MockMetricManager {
    fn subscribe_metric_type(
        &self,
        requested: &RequestedMetric,
        config: &ConfigDataNode,
    ) -> Result<MetricType> {
        let types = self.types.lock();
        let candidates: Vec<&MetricType> = types
            .iter()
            .filter(|t| t.namespace == requested.namespace)
            .collect();
        let resolved = match requested.version {
            None => candidates.iter().max_by_key(|t| t.version).copied(),
            Some(v) => candidates.iter().find(|t| t.version == v).copied(),
        };
        let Some(resolved) = resolved else {
            return make_error_msg(MetricCode::NOT_FOUND, format!("{}", requested.namespace));
        };
        let mut resolved = resolved.clone();
        resolved.config = Some(config.clone());
        *self
            .subscriptions
            .lock()
            .entry(resolved.plugin_key.clone())
            .or_insert(0) += 1;
        Ok(resolved)
    }

    fn unsubscribe_metric_type(&self, metric: &MetricType) {
        if let Some(count) = self.subscriptions.lock().get_mut(&metric.plugin_key) {
            *count = count.saturating_sub(1);
        }
    }

    fn subscribe_plugin(&self, name: &str, version: u32, _config: &ConfigDataNode) -> Result<()> {
        let key = plugin_key(name, version);
        if !self.plugins.lock().contains_key(&key) {
            return make_error_msg(PluginCode::NOT_FOUND, key);
        }
        *self.subscriptions.lock().entry(key).or_insert(0) += 1;
        Ok(())
    }

    fn unsubscribe_plugin(&self, name: &str, version: u32) {
        if let Some(count) = self
            .subscriptions
            .lock()
            .get_mut(&plugin_key(name, version))
        {
            *count = count.saturating_sub(1);
        }
    }

    fn plugin_content_types(
        &self,
        name: &str,
        kind: PluginKind,
        version: u32,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let key = plugin_key(name, version);
        let plugins = self.plugins.lock();
        let Some(plugin) = plugins.get(&key) else {
            return make_error_msg(PluginCode::NOT_FOUND, key);
        };
        if plugin.kind != kind {
            return make_error_msg(PluginCode::NOT_FOUND, format!("{} wrong kind", key));
        }
        Ok((plugin.accepted.clone(), plugin.returned.clone()))
    }

    async fn collect_metrics(
        &self,
        types: &[MetricType],
        _deadline: Duration,
    ) -> Result<Vec<Metric>> {
        let delay = *self.collect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_collect.load(Ordering::SeqCst) {
            return make_error_msg(PluginCode::HEALTH_CHECK_FAILED, "collector down");
        }
        Ok(types
            .iter()
            .map(|t| Metric::new(t.namespace.clone(), t.version, MetricData::Int64(1)))
            .collect())
    }

    async fn process_metrics(
        &self,
        content_type: &str,
        content: &[u8],
        _name: &str,
        _version: u32,
        _config: &ConfigDataNode,
        _deadline: Duration,
    ) -> Result<(String, Vec<u8>)> {
        Ok((content_type.to_string(), content.to_vec()))
    }

    async fn publish_metrics(
        &self,
        content_type: &str,
        content: &[u8],
        _name: &str,
        _version: u32,
        _config: &ConfigDataNode,
        _deadline: Duration,
    ) -> Result<()> {
        self.published
            .lock()
            .push((content_type.to_string(), content.to_vec()));
        Ok(())
    }
}
