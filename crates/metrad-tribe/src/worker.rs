use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use metrad_types::Result;

use crate::tribe::Tribe;

/// How the convergence worker touches the local node: the same plugin-load
/// and task-start surface the management collaborator uses.
#[async_trait]
pub trait Materializer: Send + Sync {
    fn has_plugin(&self, name: &str, version: u32) -> bool;
    async fn ensure_plugin(&self, name: &str, version: u32) -> Result<()>;
    fn has_task(&self, task_id: &str) -> bool;
    async fn ensure_task(&self, task_id: &str) -> Result<()>;
}

/// Interval between forced convergence passes, on top of change signals.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Diffs agreement-required plugins and tasks against what the node
/// actually runs, and materialises the difference.
///
/// A load or start that fails is logged and retried on the next pass; the
/// agreement itself is never rolled back.
pub struct ConvergenceWorker {
    tribe: Arc<Tribe>,
    materializer: Arc<dyn Materializer>,
}

impl ConvergenceWorker {
    pub fn new(tribe: Arc<Tribe>, materializer: Arc<dyn Materializer>) -> Self {
        Self {
            tribe,
            materializer,
        }
    }

    /// Spawn the worker loop. It wakes on tribe change signals, on a slow
    /// periodic sweep, and exits when `kill` fires.
    pub fn spawn(self, mut kill: watch::Receiver<bool>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::channel(64);
        self.tribe.set_convergence_notifier(tx);

        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
            sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = rx.recv() => {}
                    _ = sweep.tick() => {}
                    _ = kill.changed() => {
                        debug!("convergence worker stopping");
                        return;
                    }
                }
                self.converge_once().await;
            }
        })
    }

    /// One pass: bring local plugins and tasks up to what agreements
    /// require of this node.
    pub async fn converge_once(&self) {
        let (plugins, tasks) = self.tribe.local_requirements();

        for plugin in plugins {
            if self.materializer.has_plugin(&plugin.name, plugin.version) {
                continue;
            }
            debug!(plugin = %plugin.name, version = plugin.version, "materialising agreement plugin");
            if let Err(e) = self
                .materializer
                .ensure_plugin(&plugin.name, plugin.version)
                .await
            {
                warn!(plugin = %plugin.name, version = plugin.version, error = %e,
                    "agreement plugin load failed");
            }
        }

        for task in tasks {
            if self.materializer.has_task(&task.id) {
                continue;
            }
            debug!(task = %task.id, "materialising agreement task");
            if let Err(e) = self.materializer.ensure_task(&task.id).await {
                warn!(task = %task.id, error = %e, "agreement task start failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TribeConfig;
    use crate::membership::LoopbackHub;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    #[derive(Default)]
    struct RecordingMaterializer {
        plugins: Mutex<HashSet<(String, u32)>>,
        tasks: Mutex<HashSet<String>>,
        fail_plugins: Mutex<bool>,
    }

    #[async_trait]
    impl Materializer for RecordingMaterializer {
        fn has_plugin(&self, name: &str, version: u32) -> bool {
            self.plugins.lock().contains(&(name.to_string(), version))
        }

        async fn ensure_plugin(&self, name: &str, version: u32) -> Result<()> {
            if *self.fail_plugins.lock() {
                return metrad_types::make_error_msg(
                    metrad_types::status_code::PluginCode::LAUNCH_FAILED,
                    name.to_string(),
                );
            }
            self.plugins.lock().insert((name.to_string(), version));
            Ok(())
        }

        fn has_task(&self, task_id: &str) -> bool {
            self.tasks.lock().contains(task_id)
        }

        async fn ensure_task(&self, task_id: &str) -> Result<()> {
            self.tasks.lock().insert(task_id.to_string());
            Ok(())
        }
    }

    fn tribe_on_hub(hub: &Arc<LoopbackHub>, name: &str) -> Arc<Tribe> {
        let tribe = Tribe::new(TribeConfig::named(name), hub.membership_for(name));
        hub.register(Arc::clone(&tribe));
        tribe
    }

    #[tokio::test]
    async fn test_converge_materialises_bound_agreement() {
        let hub = LoopbackHub::new();
        let tribe = tribe_on_hub(&hub, "node-a");
        tribe.add_agreement("clan").unwrap();
        tribe.join_agreement("clan", "node-a").unwrap();
        tribe.add_plugin("clan", "dummy", 2).unwrap();
        tribe.add_task("clan", "task-1").unwrap();

        let materializer = Arc::new(RecordingMaterializer::default());
        let worker = ConvergenceWorker::new(
            Arc::clone(&tribe),
            Arc::clone(&materializer) as Arc<dyn Materializer>,
        );
        worker.converge_once().await;

        assert!(materializer.has_plugin("dummy", 2));
        assert!(materializer.has_task("task-1"));
    }

    #[tokio::test]
    async fn test_unbound_member_materialises_nothing() {
        let hub = LoopbackHub::new();
        let tribe = tribe_on_hub(&hub, "node-a");
        tribe.add_agreement("clan").unwrap();
        tribe.add_plugin("clan", "dummy", 1).unwrap();

        let materializer = Arc::new(RecordingMaterializer::default());
        let worker = ConvergenceWorker::new(
            Arc::clone(&tribe),
            Arc::clone(&materializer) as Arc<dyn Materializer>,
        );
        worker.converge_once().await;

        assert!(!materializer.has_plugin("dummy", 1));
    }

    #[tokio::test]
    async fn test_failure_does_not_roll_back_and_retries() {
        let hub = LoopbackHub::new();
        let tribe = tribe_on_hub(&hub, "node-a");
        tribe.add_agreement("clan").unwrap();
        tribe.join_agreement("clan", "node-a").unwrap();
        tribe.add_plugin("clan", "dummy", 1).unwrap();

        let materializer = Arc::new(RecordingMaterializer::default());
        *materializer.fail_plugins.lock() = true;

        let worker = ConvergenceWorker::new(
            Arc::clone(&tribe),
            Arc::clone(&materializer) as Arc<dyn Materializer>,
        );
        worker.converge_once().await;
        assert!(!materializer.has_plugin("dummy", 1));
        // The agreement still names the plugin.
        assert!(tribe.agreement("clan").unwrap().plugins.len() == 1);

        // The next pass succeeds once the failure clears.
        *materializer.fail_plugins.lock() = false;
        worker.converge_once().await;
        assert!(materializer.has_plugin("dummy", 1));
    }

    #[tokio::test]
    async fn test_spawned_worker_reacts_to_signals() {
        let hub = LoopbackHub::new();
        let tribe = tribe_on_hub(&hub, "node-a");
        let materializer = Arc::new(RecordingMaterializer::default());
        let (kill_tx, kill_rx) = watch::channel(false);
        let worker = ConvergenceWorker::new(
            Arc::clone(&tribe),
            Arc::clone(&materializer) as Arc<dyn Materializer>,
        );
        let handle = worker.spawn(kill_rx);

        tribe.add_agreement("clan").unwrap();
        tribe.join_agreement("clan", "node-a").unwrap();
        tribe.add_task("clan", "task-7").unwrap();

        // The change signal drives a pass without waiting for the sweep.
        for _ in 0..50 {
            if materializer.has_task("task-7") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(materializer.has_task("task-7"));

        kill_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
