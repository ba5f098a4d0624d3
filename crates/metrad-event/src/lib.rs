//! In-process pub/sub for lifecycle events.
//!
//! Delivery is best-effort: a slow subscriber drops events rather than
//! blocking the emitter. The bus is for observation only, never for
//! correctness.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use metrad_types::{PluginKind, UtcTime};

/// Capacity of each subscriber channel before events are dropped.
const SUBSCRIBER_BUFFER: usize = 128;

/// The fixed set of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PluginLoaded,
    PluginUnloaded,
    DisabledPlugin,
    HealthCheckFailed,
    TaskCreated,
    TaskStarted,
    TaskStopped,
    TaskDisabled,
    MetricCollected,
}

/// A lifecycle event with its payload.
#[derive(Debug, Clone)]
pub enum Event {
    PluginLoaded {
        name: String,
        version: u32,
        kind: PluginKind,
    },
    PluginUnloaded {
        name: String,
        version: u32,
    },
    DisabledPlugin {
        key: String,
        kind: PluginKind,
        index: usize,
    },
    HealthCheckFailed {
        key: String,
        kind: PluginKind,
    },
    TaskCreated {
        task_id: String,
    },
    TaskStarted {
        task_id: String,
    },
    TaskStopped {
        task_id: String,
    },
    TaskDisabled {
        task_id: String,
        why: String,
    },
    MetricCollected {
        task_id: String,
        count: usize,
        at: UtcTime,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::PluginLoaded { .. } => EventKind::PluginLoaded,
            Event::PluginUnloaded { .. } => EventKind::PluginUnloaded,
            Event::DisabledPlugin { .. } => EventKind::DisabledPlugin,
            Event::HealthCheckFailed { .. } => EventKind::HealthCheckFailed,
            Event::TaskCreated { .. } => EventKind::TaskCreated,
            Event::TaskStarted { .. } => EventKind::TaskStarted,
            Event::TaskStopped { .. } => EventKind::TaskStopped,
            Event::TaskDisabled { .. } => EventKind::TaskDisabled,
            Event::MetricCollected { .. } => EventKind::MetricCollected,
        }
    }
}

/// Receiving half of a subscription.
pub type EventStream = mpsc::Receiver<Event>;

/// The bus itself. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<EventKind, Vec<mpsc::Sender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for one event kind. Subscribers receive events in
    /// subscription order.
    pub fn subscribe(&self, kind: EventKind) -> EventStream {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().entry(kind).or_default().push(tx);
        rx
    }

    /// Fire-and-forget delivery. Events to full or closed channels are
    /// dropped; closed subscribers are pruned.
    pub fn emit(&self, event: Event) {
        let kind = event.kind();
        let mut subscribers = self.subscribers.lock();
        let Some(list) = subscribers.get_mut(&kind) else {
            return;
        };
        list.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(?kind, "event dropped: slow subscriber");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Number of live subscribers for a kind.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .lock()
            .get(&kind)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}
