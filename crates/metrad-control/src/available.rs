use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use metrad_plugin::PluginRpcClient;
use metrad_types::{plugin_key, PluginId, PluginKind, UtcTime};

/// A live running instance of a loaded plugin.
///
/// Owned exclusively by the pool holding it; everything outside the pool
/// refers to it through an `ApHandle` or its stable `id`.
pub struct AvailablePlugin {
    pub id: PluginId,
    pub name: String,
    pub version: u32,
    pub kind: PluginKind,
    client: PluginRpcClient,
    hit_count: AtomicU64,
    last_hit: Mutex<UtcTime>,
    failed_health_checks: AtomicU32,
}

impl AvailablePlugin {
    pub fn new(
        id: PluginId,
        name: impl Into<String>,
        version: u32,
        kind: PluginKind,
        client: PluginRpcClient,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            version,
            kind,
            client,
            hit_count: AtomicU64::new(0),
            last_hit: Mutex::new(UtcTime::now()),
            failed_health_checks: AtomicU32::new(0),
        }
    }

    /// The `name:version` fingerprint shared by every instance in a pool.
    pub fn key(&self) -> String {
        plugin_key(&self.name, self.version)
    }

    pub fn client(&self) -> &PluginRpcClient {
        &self.client
    }

    /// Record a routed request: bump the hit count and last-hit time.
    pub fn exercise(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
        *self.last_hit.lock() = UtcTime::now();
    }

    pub fn hits(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    pub fn last_hit(&self) -> UtcTime {
        *self.last_hit.lock()
    }

    pub fn health_failures(&self) -> u32 {
        self.failed_health_checks.load(Ordering::Relaxed)
    }

    /// One more failed ping; returns the new consecutive-failure count.
    pub fn record_health_failure(&self) -> u32 {
        self.failed_health_checks.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// A successful ping clears the consecutive-failure count.
    pub fn clear_health_failures(&self) {
        self.failed_health_checks.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for AvailablePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:v{}:id{}", self.name, self.version, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrad_plugin::DEFAULT_DIAL_TIMEOUT;

    async fn dummy_client() -> PluginRpcClient {
        // Point at a listener that accepts and idles; the tests here never
        // issue calls.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let _keep = listener.accept().await;
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        PluginRpcClient::dial(&addr, DEFAULT_DIAL_TIMEOUT).await.unwrap()
    }

    #[tokio::test]
    async fn test_key_and_debug() {
        let ap = AvailablePlugin::new(
            PluginId(3),
            "dummy",
            2,
            PluginKind::Collector,
            dummy_client().await,
        );
        assert_eq!(ap.key(), "dummy:2");
        assert_eq!(format!("{:?}", ap), "dummy:v2:id3");
    }

    #[tokio::test]
    async fn test_exercise_counts() {
        let ap = AvailablePlugin::new(
            PluginId(1),
            "dummy",
            1,
            PluginKind::Collector,
            dummy_client().await,
        );
        let before = ap.last_hit();
        assert_eq!(ap.hits(), 0);
        ap.exercise();
        ap.exercise();
        assert_eq!(ap.hits(), 2);
        assert!(ap.last_hit() >= before);
    }

    #[tokio::test]
    async fn test_health_failure_accounting() {
        let ap = AvailablePlugin::new(
            PluginId(1),
            "dummy",
            1,
            PluginKind::Collector,
            dummy_client().await,
        );
        assert_eq!(ap.record_health_failure(), 1);
        assert_eq!(ap.record_health_failure(), 2);
        assert_eq!(ap.health_failures(), 2);
        ap.clear_health_failures();
        assert_eq!(ap.health_failures(), 0);
    }
}
