use serde::{Deserialize, Serialize};

use metrad_types::Metric;

/// Event kinds framed onto a task watch stream by the external transport.
pub const TASK_WATCH_STREAM_OPEN: &str = "stream-open";
pub const TASK_WATCH_METRIC_EVENT: &str = "metric-event";
pub const TASK_WATCH_TASK_DISABLED: &str = "task-disabled";
pub const TASK_WATCH_TASK_STARTED: &str = "task-started";
pub const TASK_WATCH_TASK_STOPPED: &str = "task-stopped";

/// One framed record of a task watch stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskWatchEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event: Vec<Metric>,
}

impl TaskWatchEvent {
    pub fn stream_open() -> Self {
        Self {
            kind: TASK_WATCH_STREAM_OPEN.into(),
            message: String::new(),
            event: Vec::new(),
        }
    }

    pub fn metrics(metrics: Vec<Metric>) -> Self {
        Self {
            kind: TASK_WATCH_METRIC_EVENT.into(),
            message: String::new(),
            event: metrics,
        }
    }

    pub fn lifecycle(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            event: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrad_types::{MetricData, Namespace};

    #[test]
    fn test_watch_event_serde_shape() {
        let event = TaskWatchEvent::metrics(vec![Metric::new(
            Namespace::from_literals(&["intel", "dummy", "foo"]),
            1,
            MetricData::Int64(9),
        )]);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"metric-event\""));

        let open = TaskWatchEvent::stream_open();
        let json = serde_json::to_string(&open).unwrap();
        assert!(json.contains("\"type\":\"stream-open\""));
        assert!(!json.contains("\"event\""));
    }
}
