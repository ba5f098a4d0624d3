use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

use metrad_event::{Event, EventBus};
use metrad_plugin::rpc::{
    METHOD_COLLECTOR_POLICY, METHOD_PROCESSOR_POLICY, METHOD_PUBLISHER_POLICY,
};
use metrad_plugin::{launch, LaunchedPlugin, PluginArg, PluginMeta, PluginRpcClient};
use metrad_types::status_code::PluginCode;
use metrad_types::{
    make_error_msg, plugin_key, ConfigDataNode, Metric, MetricType, PluginId, PluginKind,
    PluginStatus, RequestedMetric, Result, Status,
};

use crate::available::AvailablePlugin;
use crate::catalog::MetricCatalog;
use crate::config::ControlConfig;
use crate::monitor::HealthMonitor;
use crate::pool::Pool;
use crate::strategy::LeastUsed;

/// The seam between the scheduler and the plugin control plane.
///
/// Subscription accounting is synchronous; the data-path calls route through
/// a pooled live instance and therefore suspend.
#[async_trait]
pub trait ManagesMetrics: Send + Sync {
    fn subscribe_metric_type(
        &self,
        requested: &RequestedMetric,
        config: &ConfigDataNode,
    ) -> Result<MetricType>;

    fn unsubscribe_metric_type(&self, metric: &MetricType);

    fn subscribe_plugin(&self, name: &str, version: u32, config: &ConfigDataNode) -> Result<()>;

    fn unsubscribe_plugin(&self, name: &str, version: u32);

    /// (accepted, returned) content types of a loaded plugin.
    fn plugin_content_types(
        &self,
        name: &str,
        kind: PluginKind,
        version: u32,
    ) -> Result<(Vec<String>, Vec<String>)>;

    async fn collect_metrics(
        &self,
        types: &[MetricType],
        deadline: Duration,
    ) -> Result<Vec<Metric>>;

    async fn process_metrics(
        &self,
        content_type: &str,
        content: &[u8],
        name: &str,
        version: u32,
        config: &ConfigDataNode,
        deadline: Duration,
    ) -> Result<(String, Vec<u8>)>;

    async fn publish_metrics(
        &self,
        content_type: &str,
        content: &[u8],
        name: &str,
        version: u32,
        config: &ConfigDataNode,
        deadline: Duration,
    ) -> Result<()>;
}

#[derive(Clone)]
struct LoadedPlugin {
    meta: PluginMeta,
    status: PluginStatus,
    artifact: PathBuf,
}

/// Launches, catalogs, routes to, and unloads plugins.
pub struct PluginManager {
    config: ControlConfig,
    catalog: Arc<MetricCatalog>,
    bus: Arc<EventBus>,
    plugins: RwLock<HashMap<String, LoadedPlugin>>,
    pools: DashMap<String, Arc<Pool>>,
    /// Child processes per plugin key, reaped on unload.
    processes: DashMap<String, Arc<tokio::sync::Mutex<Vec<LaunchedPlugin>>>>,
    /// Per-key kill switch for health monitors.
    monitor_kills: DashMap<String, watch::Sender<bool>>,
    next_instance_id: AtomicU32,
}

impl PluginManager {
    pub fn new(config: ControlConfig, bus: Arc<EventBus>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            catalog: Arc::new(MetricCatalog::new()),
            bus,
            plugins: RwLock::new(HashMap::new()),
            pools: DashMap::new(),
            processes: DashMap::new(),
            monitor_kills: DashMap::new(),
            next_instance_id: AtomicU32::new(1),
        })
    }

    pub fn catalog(&self) -> &Arc<MetricCatalog> {
        &self.catalog
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    fn plugin_arg(&self) -> PluginArg {
        PluginArg::new(
            self.config.ping_timeout(),
            self.config.plugin_log_dir.clone(),
        )
    }

    fn policy_method(kind: PluginKind) -> &'static str {
        match kind {
            PluginKind::Collector => METHOD_COLLECTOR_POLICY,
            PluginKind::Processor => METHOD_PROCESSOR_POLICY,
            PluginKind::Publisher => METHOD_PUBLISHER_POLICY,
        }
    }

    /// Load a plugin artifact: spawn it, handshake, fetch its descriptor,
    /// register it in the catalog, then retire the handshake instance.
    pub async fn load(&self, artifact: &Path) -> Result<PluginMeta> {
        let mut launched = launch(
            artifact,
            &self.plugin_arg(),
            self.config.handshake_timeout(),
        )
        .await?;
        let meta = launched.response.meta.clone();
        let key = meta.key();

        if self.plugins.read().contains_key(&key) {
            launched.reap().await;
            return make_error_msg(PluginCode::ALREADY_LOADED, key);
        }
        if meta.version < 1 {
            launched.reap().await;
            return make_error_msg(
                PluginCode::HANDSHAKE_FAILED,
                format!("{} reported version 0", meta.name),
            );
        }

        let client = PluginRpcClient::dial(
            &launched.response.listen_address,
            self.config.dial_timeout(),
        )
        .await?;

        let policy = client
            .get_config_policy(Self::policy_method(meta.kind))
            .await?;

        let mut types = Vec::new();
        if meta.kind == PluginKind::Collector {
            types = client.get_metric_types(&ConfigDataNode::new()).await?;
            for t in &mut types {
                t.version = meta.version;
                t.plugin_key = key.clone();
            }
        }

        // The handshake instance served its purpose; pool instances are
        // spawned on demand.
        let _ = client.kill("load complete").await;
        launched.reap_within(self.config.kill_timeout()).await;

        self.catalog.add_plugin(&key, types, policy);
        self.plugins.write().insert(
            key.clone(),
            LoadedPlugin {
                meta: meta.clone(),
                status: PluginStatus::Loaded,
                artifact: artifact.to_path_buf(),
            },
        );

        info!(plugin = %key, kind = %meta.kind, "plugin loaded");
        self.bus.emit(Event::PluginLoaded {
            name: meta.name.clone(),
            version: meta.version,
            kind: meta.kind,
        });
        Ok(meta)
    }

    /// Unload a plugin. Fails while any subscription still references it.
    pub async fn unload(&self, name: &str, version: u32) -> Result<()> {
        let key = plugin_key(name, version);
        if !self.plugins.read().contains_key(&key) {
            return make_error_msg(PluginCode::NOT_FOUND, key);
        }
        let subscriptions = self.catalog.subscription_count(&key);
        if subscriptions > 0 {
            return make_error_msg(
                PluginCode::IN_USE,
                format!("{} has {} subscriptions", key, subscriptions),
            );
        }

        // Stop health monitors before tearing instances down.
        if let Some((_, kill)) = self.monitor_kills.remove(&key) {
            let _ = kill.send(true);
        }

        if let Some((_, pool)) = self.pools.remove(&key) {
            for instance in pool.drain() {
                if let Err(e) = instance.client().kill("unload").await {
                    debug!(instance = ?instance, error = %e, "kill on unload failed");
                }
            }
        }

        if let Some((_, processes)) = self.processes.remove(&key) {
            let mut processes = processes.lock().await;
            for mut child in processes.drain(..) {
                child.reap_within(self.config.kill_timeout()).await;
            }
        }

        self.catalog.remove_plugin(&key);
        self.plugins.write().remove(&key);

        info!(plugin = %key, "plugin unloaded");
        self.bus.emit(Event::PluginUnloaded {
            name: name.to_string(),
            version,
        });
        Ok(())
    }

    /// Loaded plugins, optionally only those with live instances.
    pub fn loaded_plugins(&self, running_only: bool) -> Vec<(PluginMeta, PluginStatus)> {
        self.plugins
            .read()
            .values()
            .filter(|p| {
                !running_only
                    || self
                        .pools
                        .get(&p.meta.key())
                        .map(|pool| pool.count() > 0)
                        .unwrap_or(false)
            })
            .map(|p| (p.meta.clone(), p.status))
            .collect()
    }

    pub fn is_loaded(&self, name: &str, version: u32) -> bool {
        self.plugins.read().contains_key(&plugin_key(name, version))
    }

    /// Launch one more live instance of a loaded plugin and pool it.
    async fn start_instance(&self, key: &str) -> Result<Arc<AvailablePlugin>> {
        let loaded = self
            .plugins
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Status::with_message(PluginCode::NOT_FOUND, key.to_string()))?;

        let pool = self.pool_for(key);
        if pool.count() >= self.config.max_running_plugins {
            return make_error_msg(
                PluginCode::TOO_MANY_RUNNING,
                format!("{} at limit {}", key, self.config.max_running_plugins),
            );
        }

        let launched = launch(
            &loaded.artifact,
            &self.plugin_arg(),
            self.config.handshake_timeout(),
        )
        .await?;
        if launched.response.meta.key() != key {
            let mut launched = launched;
            launched.reap().await;
            return make_error_msg(
                PluginCode::HANDSHAKE_FAILED,
                format!(
                    "artifact identified as {} while starting {}",
                    launched.response.meta.key(),
                    key
                ),
            );
        }

        let client = PluginRpcClient::dial(
            &launched.response.listen_address,
            self.config.dial_timeout(),
        )
        .await?;

        let id = PluginId(self.next_instance_id.fetch_add(1, Ordering::Relaxed));
        let instance = Arc::new(AvailablePlugin::new(
            id,
            loaded.meta.name.clone(),
            loaded.meta.version,
            loaded.meta.kind,
            client,
        ));
        pool.add(Arc::clone(&instance))?;

        let processes = self
            .processes
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Vec::new())))
            .clone();
        processes.lock().await.push(launched);

        let kill_rx = self
            .monitor_kills
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe();
        let monitor = HealthMonitor {
            interval: self.config.health_interval(),
            ping_timeout: self.config.ping_timeout(),
            failure_limit: self.config.health_failure_limit,
        };
        monitor.spawn(
            Arc::clone(&pool),
            Arc::clone(&instance),
            Arc::clone(&self.bus),
            kill_rx,
        );

        debug!(instance = ?instance, "plugin instance started");

        // Mark the logical plugin running now that an instance lives.
        if let Some(p) = self.plugins.write().get_mut(key) {
            p.status = PluginStatus::Running;
        }
        Ok(instance)
    }

    fn pool_for(&self, key: &str) -> Arc<Pool> {
        self.pools
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Pool::new(key)))
            .clone()
    }

    /// A live instance for the key: routed via least-used, demand-starting
    /// the first instance when the pool is empty.
    async fn select_or_start(&self, key: &str) -> Result<Arc<AvailablePlugin>> {
        let pool = self.pool_for(key);
        if pool.count() == 0 {
            return self.start_instance(key).await;
        }
        pool.select(&LeastUsed)
    }

    /// Tear down every plugin unconditionally. Shutdown path; subscription
    /// guards do not apply.
    pub async fn stop(&self) {
        for entry in self.monitor_kills.iter() {
            let _ = entry.value().send(true);
        }
        let keys: Vec<String> = self.plugins.read().keys().cloned().collect();
        for key in keys {
            if let Some((_, pool)) = self.pools.remove(&key) {
                for instance in pool.drain() {
                    let _ = instance.client().kill("shutdown").await;
                }
            }
            if let Some((_, processes)) = self.processes.remove(&key) {
                let mut processes = processes.lock().await;
                for mut child in processes.drain(..) {
                    child.reap_within(self.config.kill_timeout()).await;
                }
            }
        }
        self.plugins.write().clear();
        info!("plugin manager stopped");
    }

    fn lookup(&self, name: &str, version: u32) -> Result<LoadedPlugin> {
        self.plugins
            .read()
            .get(&plugin_key(name, version))
            .cloned()
            .ok_or_else(|| {
                Status::with_message(PluginCode::NOT_FOUND, plugin_key(name, version))
            })
    }
}

#[async_trait]
impl ManagesMetrics for PluginManager {
    fn subscribe_metric_type(
        &self,
        requested: &RequestedMetric,
        config: &ConfigDataNode,
    ) -> Result<MetricType> {
        self.catalog.subscribe(requested, config)
    }

    fn unsubscribe_metric_type(&self, metric: &MetricType) {
        self.catalog.unsubscribe(metric);
    }

    fn subscribe_plugin(&self, name: &str, version: u32, config: &ConfigDataNode) -> Result<()> {
        let loaded = self.lookup(name, version)?;
        let key = loaded.meta.key();

        if let Some(policy) = self.catalog.policy(&key) {
            let outcome = policy.get(&[]).process(config);
            if let Some(error) = outcome.errors.into_iter().next() {
                return Err(error);
            }
        }
        self.catalog.subscribe_plugin(&key);
        Ok(())
    }

    fn unsubscribe_plugin(&self, name: &str, version: u32) {
        self.catalog.release(&plugin_key(name, version));
    }

    fn plugin_content_types(
        &self,
        name: &str,
        kind: PluginKind,
        version: u32,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let loaded = self.lookup(name, version)?;
        if loaded.meta.kind != kind {
            return make_error_msg(
                PluginCode::NOT_FOUND,
                format!("{} is a {}, not a {}", loaded.meta.key(), loaded.meta.kind, kind),
            );
        }
        Ok((
            loaded.meta.accepted_content_types.clone(),
            loaded.meta.returned_content_types.clone(),
        ))
    }

    async fn collect_metrics(
        &self,
        types: &[MetricType],
        deadline: Duration,
    ) -> Result<Vec<Metric>> {
        // Fan the requested types out to their owning collector plugins.
        let mut by_plugin: HashMap<&str, Vec<MetricType>> = HashMap::new();
        for t in types {
            by_plugin.entry(&t.plugin_key).or_default().push(t.clone());
        }

        let mut collected = Vec::new();
        for (key, group) in by_plugin {
            let instance = self.select_or_start(key).await?;
            let mut metrics = instance.client().collect_metrics(&group, deadline).await?;
            collected.append(&mut metrics);
        }
        Ok(collected)
    }

    async fn process_metrics(
        &self,
        content_type: &str,
        content: &[u8],
        name: &str,
        version: u32,
        config: &ConfigDataNode,
        deadline: Duration,
    ) -> Result<(String, Vec<u8>)> {
        let loaded = self.lookup(name, version)?;
        if loaded.meta.kind != PluginKind::Processor {
            return make_error_msg(
                PluginCode::NOT_FOUND,
                format!("{} is not a processor", loaded.meta.key()),
            );
        }
        let instance = self.select_or_start(&loaded.meta.key()).await?;
        instance
            .client()
            .process(content_type, content, config, deadline)
            .await
    }

    async fn publish_metrics(
        &self,
        content_type: &str,
        content: &[u8],
        name: &str,
        version: u32,
        config: &ConfigDataNode,
        deadline: Duration,
    ) -> Result<()> {
        let loaded = self.lookup(name, version)?;
        if loaded.meta.kind != PluginKind::Publisher {
            return make_error_msg(
                PluginCode::NOT_FOUND,
                format!("{} is not a publisher", loaded.meta.key()),
            );
        }
        let instance = self.select_or_start(&loaded.meta.key()).await?;
        instance
            .client()
            .publish(content_type, content, config, deadline)
            .await
    }
}
