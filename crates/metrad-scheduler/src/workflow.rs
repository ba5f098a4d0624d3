use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use metrad_control::ManagesMetrics;
use metrad_types::status_code::MetricCode;
use metrad_types::{ConfigDataNode, Namespace, PluginKind, RequestedMetric, Result};
use metrad_wire::{CONTENT_TYPE_ALL, CONTENT_TYPE_BIN};

/// The serializable form of a workflow, as a task-creation request carries
/// it: one collect node with processor/publisher children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMap {
    pub collect: CollectNodeMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectNodeMap {
    pub metrics: Vec<RequestedMetric>,
    /// Per-namespace collection config, keyed by the rendered namespace
    /// string (e.g. `/intel/dummy/foo`).
    #[serde(default)]
    pub config: BTreeMap<String, ConfigDataNode>,
    #[serde(default)]
    pub process: Vec<ProcessNodeMap>,
    #[serde(default)]
    pub publish: Vec<PublishNodeMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessNodeMap {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub config: ConfigDataNode,
    #[serde(default)]
    pub process: Vec<ProcessNodeMap>,
    #[serde(default)]
    pub publish: Vec<PublishNodeMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishNodeMap {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub config: ConfigDataNode,
}

impl WorkflowMap {
    /// The workflow used across scheduler tests: collect two dummy metrics
    /// and hand them to a file publisher.
    pub fn sample() -> Self {
        let mut file_config = ConfigDataNode::new();
        file_config.add_item("file", "/tmp/metrad-published");
        WorkflowMap {
            collect: CollectNodeMap {
                metrics: vec![
                    RequestedMetric {
                        namespace: Namespace::from_literals(&["intel", "dummy", "foo"]),
                        version: None,
                    },
                    RequestedMetric {
                        namespace: Namespace::from_literals(&["intel", "dummy", "bar"]),
                        version: None,
                    },
                ],
                config: BTreeMap::new(),
                process: Vec::new(),
                publish: vec![PublishNodeMap {
                    name: "file".into(),
                    version: 1,
                    config: file_config,
                }],
            },
        }
    }

    /// The config subtree for one requested namespace, exact key match.
    pub fn config_for(&self, namespace: &Namespace) -> ConfigDataNode {
        self.collect
            .config
            .get(&namespace.to_string())
            .cloned()
            .unwrap_or_default()
    }
}

/// A processor node with its negotiated input content type.
#[derive(Debug, Clone)]
pub struct ProcessNode {
    pub name: String,
    pub version: u32,
    pub config: ConfigDataNode,
    pub content_type: String,
    pub process: Vec<ProcessNode>,
    pub publish: Vec<PublishNode>,
}

/// A terminal publisher node with its negotiated input content type.
#[derive(Debug, Clone)]
pub struct PublishNode {
    pub name: String,
    pub version: u32,
    pub config: ConfigDataNode,
    pub content_type: String,
}

/// The bound runtime form of a workflow.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub map: WorkflowMap,
    /// Content type the collect stage emits.
    pub content_type: String,
    pub process: Vec<ProcessNode>,
    pub publish: Vec<PublishNode>,
}

fn choose_content_type(produced: &[String], accepted: &[String]) -> Option<String> {
    for candidate in produced {
        if accepted
            .iter()
            .any(|a| a == candidate || a == CONTENT_TYPE_ALL)
        {
            return Some(candidate.clone());
        }
    }
    None
}

fn bind_process_nodes(
    manager: &dyn ManagesMetrics,
    produced: &[String],
    nodes: &[ProcessNodeMap],
) -> Result<Vec<ProcessNode>> {
    let mut bound = Vec::new();
    for node in nodes {
        let (accepted, returned) =
            manager.plugin_content_types(&node.name, PluginKind::Processor, node.version)?;
        let content_type = choose_content_type(produced, &accepted).ok_or_else(|| {
            content_type_mismatch(&node.name, node.version, produced, &accepted)
        })?;
        bound.push(ProcessNode {
            name: node.name.clone(),
            version: node.version,
            config: node.config.clone(),
            content_type,
            process: bind_process_nodes(manager, &returned, &node.process)?,
            publish: bind_publish_nodes(manager, &returned, &node.publish)?,
        });
    }
    Ok(bound)
}

fn bind_publish_nodes(
    manager: &dyn ManagesMetrics,
    produced: &[String],
    nodes: &[PublishNodeMap],
) -> Result<Vec<PublishNode>> {
    let mut bound = Vec::new();
    for node in nodes {
        let (accepted, _) =
            manager.plugin_content_types(&node.name, PluginKind::Publisher, node.version)?;
        let content_type = choose_content_type(produced, &accepted).ok_or_else(|| {
            content_type_mismatch(&node.name, node.version, produced, &accepted)
        })?;
        bound.push(PublishNode {
            name: node.name.clone(),
            version: node.version,
            config: node.config.clone(),
            content_type,
        });
    }
    Ok(bound)
}

fn content_type_mismatch(
    name: &str,
    version: u32,
    produced: &[String],
    accepted: &[String],
) -> metrad_types::Status {
    metrad_types::Status::with_message(
        MetricCode::CONTENT_TYPE_MISMATCH,
        format!(
            "{}:{} accepts {:?} but parent produces {:?}",
            name, version, accepted, produced
        ),
    )
}

impl Workflow {
    /// Walk the map and negotiate a content type for every processor and
    /// publisher edge, consulting the manager for what each plugin accepts.
    pub fn bind(map: WorkflowMap, manager: &dyn ManagesMetrics) -> Result<Workflow> {
        let produced = vec![CONTENT_TYPE_BIN.to_string()];
        let process = bind_process_nodes(manager, &produced, &map.collect.process)?;
        let publish = bind_publish_nodes(manager, &produced, &map.collect.publish)?;
        Ok(Workflow {
            map,
            content_type: CONTENT_TYPE_BIN.to_string(),
            process,
            publish,
        })
    }

    /// Every (kind, name, version, config) the workflow needs subscribed,
    /// depth-first.
    pub fn plugin_subscriptions(&self) -> Vec<(PluginKind, String, u32, ConfigDataNode)> {
        fn walk(
            out: &mut Vec<(PluginKind, String, u32, ConfigDataNode)>,
            process: &[ProcessNode],
            publish: &[PublishNode],
        ) {
            for node in process {
                out.push((
                    PluginKind::Processor,
                    node.name.clone(),
                    node.version,
                    node.config.clone(),
                ));
                walk(out, &node.process, &node.publish);
            }
            for node in publish {
                out.push((
                    PluginKind::Publisher,
                    node.name.clone(),
                    node.version,
                    node.config.clone(),
                ));
            }
        }
        let mut out = Vec::new();
        walk(&mut out, &self.process, &self.publish);
        out
    }
}
