use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use metrad_control::{ControlConfig, ManagesMetrics, PluginManager};
use metrad_event::EventBus;
use metrad_scheduler::{Scheduler, SchedulerConfig};
use metrad_tribe::{ConvergenceWorker, Materializer, SoloMembership, Tribe, TribeConfig};
use metrad_types::{make_error_msg, status_code::PluginCode, Result};

/// Everything the agent process wires together.
pub struct Agent {
    pub bus: Arc<EventBus>,
    pub manager: Arc<PluginManager>,
    pub scheduler: Arc<Scheduler>,
    pub tribe: Option<Arc<Tribe>>,
    discover_paths: Vec<PathBuf>,
    tribe_kill: Option<watch::Sender<bool>>,
}

impl Agent {
    pub fn new(
        control: ControlConfig,
        scheduling: SchedulerConfig,
        discover_paths: Vec<PathBuf>,
    ) -> Result<Self> {
        scheduling.validate()?;
        let bus = Arc::new(EventBus::new());
        let manager = Arc::new(PluginManager::new(control, Arc::clone(&bus))?);
        let scheduler = Arc::new(Scheduler::new(scheduling, Arc::clone(&bus)));
        scheduler.set_metric_manager(Arc::clone(&manager) as Arc<dyn ManagesMetrics>);
        Ok(Self {
            bus,
            manager,
            scheduler,
            tribe: None,
            discover_paths,
            tribe_kill: None,
        })
    }

    /// Start the scheduler, auto-discover plugins, and optionally join a
    /// tribe.
    pub async fn start(&mut self, tribe: Option<TribeConfig>) -> Result<()> {
        self.scheduler.start()?;

        for dir in self.discover_paths.clone() {
            self.discover_dir(&dir).await;
        }

        if let Some(config) = tribe {
            config.validate()?;
            // The gossip transport is an external collaborator; a node
            // without one coordinates with itself.
            let membership = Arc::new(SoloMembership::new(config.name.clone()));
            let tribe = Tribe::new(config, membership);
            let materializer = Arc::new(LocalMaterializer {
                manager: Arc::clone(&self.manager),
                scheduler: Arc::clone(&self.scheduler),
                discover_paths: self.discover_paths.clone(),
            });
            let (kill_tx, kill_rx) = watch::channel(false);
            ConvergenceWorker::new(Arc::clone(&tribe), materializer as Arc<dyn Materializer>)
                .spawn(kill_rx);
            self.tribe = Some(tribe);
            self.tribe_kill = Some(kill_tx);
        }

        info!("agent started");
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(kill) = self.tribe_kill.take() {
            let _ = kill.send(true);
        }
        self.scheduler.stop();
        self.manager.stop().await;
        info!("agent stopped");
    }

    /// Load every executable artifact found in a discovery directory.
    async fn discover_dir(&self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "auto-discover path unreadable");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_executable(&path) {
                continue;
            }
            match self.manager.load(&path).await {
                Ok(meta) => info!(plugin = %meta.key(), artifact = %path.display(), "auto-discovered"),
                Err(e) => warn!(artifact = %path.display(), error = %e, "auto-discover load failed"),
            }
        }
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && std::fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

/// Materialises agreement contents through the same manager and scheduler
/// APIs the management collaborator uses.
struct LocalMaterializer {
    manager: Arc<PluginManager>,
    scheduler: Arc<Scheduler>,
    discover_paths: Vec<PathBuf>,
}

impl LocalMaterializer {
    /// Find an artifact for a plugin name in the discovery paths, by the
    /// `metrad-<kind>-<name>` naming convention or a bare name match.
    fn find_artifact(&self, name: &str) -> Option<PathBuf> {
        for dir in &self.discover_paths {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !is_executable(&path) {
                    continue;
                }
                let file = path.file_name().and_then(|f| f.to_str()).unwrap_or("");
                if file == name || file.ends_with(&format!("-{}", name)) {
                    return Some(path);
                }
            }
        }
        None
    }
}

#[async_trait]
impl Materializer for LocalMaterializer {
    fn has_plugin(&self, name: &str, version: u32) -> bool {
        self.manager.is_loaded(name, version)
    }

    async fn ensure_plugin(&self, name: &str, version: u32) -> Result<()> {
        let Some(artifact) = self.find_artifact(name) else {
            return make_error_msg(
                PluginCode::NOT_FOUND,
                format!("no artifact for {} in discovery paths", name),
            );
        };
        let meta = self.manager.load(&artifact).await?;
        if meta.version != version {
            warn!(
                plugin = name,
                wanted = version,
                got = meta.version,
                "agreement names a version the artifact does not provide"
            );
        }
        Ok(())
    }

    fn has_task(&self, task_id: &str) -> bool {
        self.scheduler
            .get_task(task_id)
            .map(|t| t.state() != metrad_scheduler::TaskState::Stopped)
            .unwrap_or(false)
    }

    async fn ensure_task(&self, task_id: &str) -> Result<()> {
        // The agreement replicates task ids; the task definition itself
        // arrives through the management collaborator. Start it if we have
        // it, otherwise leave the requirement pending for the next pass.
        self.scheduler.start_task(task_id)
    }
}
