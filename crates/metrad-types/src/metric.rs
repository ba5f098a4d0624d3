use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ConfigDataNode;
use crate::namespace::Namespace;
use crate::time::UtcTime;

/// The payload of a collected metric. Integers and floats stay distinct
/// through every serialization, so a round-trip never degrades an `i64`
/// into an `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricData {
    Int64(i64),
    Uint64(u64),
    Float64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
}

/// A label binds a dynamic namespace position to its slot name, so consumers
/// can recover which element was the wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub index: usize,
    pub name: String,
}

/// A single collected datum. Immutable once produced by a collect job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub namespace: Namespace,
    pub version: u32,
    pub timestamp: UtcTime,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub data: MetricData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigDataNode>,
}

impl Metric {
    pub fn new(namespace: Namespace, version: u32, data: MetricData) -> Self {
        Self {
            namespace,
            version,
            timestamp: UtcTime::now(),
            tags: BTreeMap::new(),
            labels: Vec::new(),
            data,
            config: None,
        }
    }
}

/// A metric type advertised by a collector plugin. Owned by the catalog;
/// destroyed when the owning plugin is fully unloaded and no live
/// subscription references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricType {
    pub namespace: Namespace,
    /// Bound to the plugin version; always >= 1.
    pub version: u32,
    pub last_advertised: UtcTime,
    pub unit: String,
    pub description: String,
    /// `name:version` key of the plugin whose config policy governs this
    /// metric.
    pub plugin_key: String,
    /// The config data needed to collect the metric, attached at
    /// subscription time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigDataNode>,
}

impl MetricType {
    pub fn new(namespace: Namespace, version: u32, plugin_key: impl Into<String>) -> Self {
        Self {
            namespace,
            version,
            last_advertised: UtcTime::now(),
            unit: String::new(),
            description: String::new(),
            plugin_key: plugin_key.into(),
            config: None,
        }
    }
}

/// A metric requested by a task workflow: a namespace plus an optional
/// version pin. `None` selects the latest advertised version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedMetric {
    pub namespace: Namespace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_data_serde_keeps_types_apart() {
        let int = serde_json::to_string(&MetricData::Int64(7)).unwrap();
        let float = serde_json::to_string(&MetricData::Float64(7.0)).unwrap();
        assert_ne!(int, float);

        let back: MetricData = serde_json::from_str(&int).unwrap();
        assert_eq!(back, MetricData::Int64(7));
        let back: MetricData = serde_json::from_str(&float).unwrap();
        assert_eq!(back, MetricData::Float64(7.0));
    }

    #[test]
    fn test_metric_construction() {
        let ns = Namespace::from_literals(&["intel", "dummy", "foo"]);
        let m = Metric::new(ns.clone(), 2, MetricData::Uint64(1042));
        assert_eq!(m.namespace, ns);
        assert_eq!(m.version, 2);
        assert!(m.tags.is_empty());
        assert!(m.config.is_none());
    }

    #[test]
    fn test_metric_serde_roundtrip() {
        let ns = Namespace::from_literals(&["intel", "dummy", "bar"]);
        let mut m = Metric::new(ns, 1, MetricData::Str("value".into()));
        m.tags.insert("host".into(), "node-1".into());
        m.labels.push(Label {
            index: 2,
            name: "id".into(),
        });

        let json = serde_json::to_string(&m).unwrap();
        let parsed: Metric = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, m);
    }

    #[test]
    fn test_requested_metric_latest_version() {
        let req = RequestedMetric {
            namespace: Namespace::from_literals(&["intel", "dummy", "foo"]),
            version: None,
        };
        assert!(req.version.is_none());
    }
}
