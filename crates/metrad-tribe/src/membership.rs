use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::tribe::Tribe;

/// The gossip transport primitive tribe runs on: a membership service that
/// names the local node, delivers best-effort broadcasts, and exposes the
/// current member list. Join/leave events and push/pull state exchange are
/// driven by the transport calling back into `Tribe`.
pub trait Membership: Send + Sync {
    fn local_name(&self) -> String;
    fn broadcast(&self, payload: Vec<u8>);
    fn members(&self) -> Vec<String>;
}

/// A membership for a node running without a cluster: broadcasts go
/// nowhere, the member list is just us.
pub struct SoloMembership {
    name: String,
}

impl SoloMembership {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Membership for SoloMembership {
    fn local_name(&self) -> String {
        self.name.clone()
    }

    fn broadcast(&self, _payload: Vec<u8>) {}

    fn members(&self) -> Vec<String> {
        vec![self.name.clone()]
    }
}

/// An in-memory hub wiring several tribes together for tests: synchronous
/// delivery, per-destination packet dropping, and push/pull on demand.
#[derive(Default)]
pub struct LoopbackHub {
    inner: Mutex<HubInner>,
}

#[derive(Default)]
struct HubInner {
    tribes: HashMap<String, Arc<Tribe>>,
    /// Pending broadcast drops per destination node.
    drops: HashMap<String, usize>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wire a tribe into the hub and fire join events both ways.
    pub fn register(self: &Arc<Self>, tribe: Arc<Tribe>) {
        let name = tribe.local_name();
        let peers: Vec<Arc<Tribe>> = {
            let mut inner = self.inner.lock();
            let peers = inner.tribes.values().cloned().collect();
            inner.tribes.insert(name.clone(), Arc::clone(&tribe));
            peers
        };
        for peer in peers {
            peer.handle_member_join(&name);
            tribe.handle_member_join(&peer.local_name());
        }
    }

    /// Drop the next `count` broadcasts destined to `name`.
    pub fn drop_next_to(&self, name: &str, count: usize) {
        self.inner.lock().drops.insert(name.to_string(), count);
    }

    fn deliver(&self, from: &str, payload: &[u8]) {
        let targets: Vec<(String, Arc<Tribe>)> = self
            .inner
            .lock()
            .tribes
            .iter()
            .filter(|(name, _)| name.as_str() != from)
            .map(|(name, tribe)| (name.clone(), Arc::clone(tribe)))
            .collect();
        for (name, tribe) in targets {
            let dropped = {
                let mut inner = self.inner.lock();
                match inner.drops.get_mut(&name) {
                    Some(count) if *count > 0 => {
                        *count -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if dropped {
                debug!(to = %name, "loopback dropped broadcast");
                continue;
            }
            tribe.handle_broadcast(payload);
        }
    }

    /// Run one push/pull exchange between two nodes, both directions.
    pub fn push_pull(&self, a: &str, b: &str) {
        let (ta, tb) = {
            let inner = self.inner.lock();
            (
                inner.tribes.get(a).cloned().expect("node registered"),
                inner.tribes.get(b).cloned().expect("node registered"),
            )
        };
        tb.merge_remote_state(&ta.local_state());
        ta.merge_remote_state(&tb.local_state());
    }

    pub fn member_names(&self) -> Vec<String> {
        self.inner.lock().tribes.keys().cloned().collect()
    }

    /// The membership handle for one named node.
    pub fn membership_for(self: &Arc<Self>, name: impl Into<String>) -> Arc<LoopbackMembership> {
        Arc::new(LoopbackMembership {
            name: name.into(),
            hub: Arc::clone(self),
        })
    }
}

/// One node's view of a [`LoopbackHub`].
pub struct LoopbackMembership {
    name: String,
    hub: Arc<LoopbackHub>,
}

impl Membership for LoopbackMembership {
    fn local_name(&self) -> String {
        self.name.clone()
    }

    fn broadcast(&self, payload: Vec<u8>) {
        self.hub.deliver(&self.name, &payload);
    }

    fn members(&self) -> Vec<String> {
        self.hub.member_names()
    }
}
