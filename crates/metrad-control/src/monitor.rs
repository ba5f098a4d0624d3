use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use metrad_event::{Event, EventBus};

use crate::available::AvailablePlugin;
use crate::pool::Pool;

/// Per-instance health check loop.
///
/// Every tick pings the instance with a hard deadline. A success clears the
/// consecutive-failure count; each failure emits `HealthCheckFailed`, and the
/// tick on which the count crosses the limit emits `DisabledPlugin` once and
/// removes the instance from its pool.
pub struct HealthMonitor {
    pub interval: Duration,
    pub ping_timeout: Duration,
    pub failure_limit: u32,
}

impl HealthMonitor {
    pub fn spawn(
        &self,
        pool: Arc<Pool>,
        ap: Arc<AvailablePlugin>,
        bus: Arc<EventBus>,
        mut kill: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let interval = self.interval;
        let ping_timeout = self.ping_timeout;
        let failure_limit = self.failure_limit;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = kill.changed() => {
                        debug!(instance = ?ap, "health monitor stopping");
                        return;
                    }
                }

                match ap.client().ping_within(ping_timeout).await {
                    Ok(true) => {
                        ap.clear_health_failures();
                        continue;
                    }
                    Ok(false) | Err(_) => {}
                }

                let failures = ap.record_health_failure();
                debug!(instance = ?ap, failures, "health check missed");
                bus.emit(Event::HealthCheckFailed {
                    key: ap.key(),
                    kind: ap.kind,
                });

                if failures >= failure_limit {
                    warn!(instance = ?ap, failures, "failure limit reached, disabling");
                    let index = pool
                        .handle_by_id(ap.id)
                        .map(|h| h.index)
                        .unwrap_or_default();
                    bus.emit(Event::DisabledPlugin {
                        key: ap.key(),
                        kind: ap.kind,
                        index,
                    });
                    if let Some(handle) = pool.handle_by_id(ap.id) {
                        let _ = pool.remove(&handle);
                    }
                    return;
                }
            }
        })
    }
}
