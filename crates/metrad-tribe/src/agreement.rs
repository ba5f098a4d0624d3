use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use metrad_wire::{WireDecode, WireEncode, WireError};

/// A plugin named by an agreement, identified by (name, version).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    pub version: u32,
}

/// A task named by an agreement, identified by its id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
}

/// A named cluster-wide set of plugins and tasks plus the members bound to
/// it. Plugin and task membership is set-wise; removal preserves the order
/// of the remaining elements.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Agreement {
    pub plugins: Vec<PluginSpec>,
    pub tasks: Vec<TaskSpec>,
    pub members: BTreeSet<String>,
}

impl Agreement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_plugin(&self, plugin: &PluginSpec) -> bool {
        self.plugins.iter().any(|p| p == plugin)
    }

    /// Set-wise add; a duplicate is a no-op and reports `false`.
    pub fn add_plugin(&mut self, plugin: PluginSpec) -> bool {
        if self.contains_plugin(&plugin) {
            return false;
        }
        self.plugins.push(plugin);
        true
    }

    /// Set-wise remove preserving the order of what remains.
    pub fn remove_plugin(&mut self, plugin: &PluginSpec) -> bool {
        match self.plugins.iter().position(|p| p == plugin) {
            Some(idx) => {
                self.plugins.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains_task(&self, id: &str) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }

    pub fn add_task(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.contains_task(&id) {
            return false;
        }
        self.tasks.push(TaskSpec { id });
        true
    }

    pub fn remove_task(&mut self, id: &str) -> bool {
        match self.tasks.iter().position(|t| t.id == id) {
            Some(idx) => {
                self.tasks.remove(idx);
                true
            }
            None => false,
        }
    }
}

/// A cluster node as tribe sees it: its name and agreement bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    /// The plugin agreement this member is bound to, if any.
    pub plugin_agreement: Option<String>,
    /// Every agreement whose tasks this member carries.
    pub task_agreements: BTreeSet<String>,
}

impl Member {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_agreement: None,
            task_agreements: BTreeSet::new(),
        }
    }
}

impl WireEncode for TaskSpec {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.id.encode(buf);
    }
}

impl WireDecode for TaskSpec {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        Ok(Self {
            id: String::decode(buf, offset)?,
        })
    }
}

impl WireEncode for Agreement {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.plugins.encode(buf);
        self.tasks.encode(buf);
        let members: Vec<String> = self.members.iter().cloned().collect();
        members.encode(buf);
    }
}

impl WireDecode for Agreement {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let plugins = Vec::<crate::agreement::PluginSpec>::decode(buf, offset)?;
        let tasks = Vec::<TaskSpec>::decode(buf, offset)?;
        let members: Vec<String> = Vec::decode(buf, offset)?;
        Ok(Self {
            plugins,
            tasks,
            members: members.into_iter().collect(),
        })
    }
}

impl WireEncode for Member {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.name.encode(buf);
        self.plugin_agreement.encode(buf);
        let task_agreements: Vec<String> = self.task_agreements.iter().cloned().collect();
        task_agreements.encode(buf);
    }
}

impl WireDecode for Member {
    fn decode(buf: &[u8], offset: &mut usize) -> Result<Self, WireError> {
        let name = String::decode(buf, offset)?;
        let plugin_agreement = Option::<String>::decode(buf, offset)?;
        let task_agreements: Vec<String> = Vec::decode(buf, offset)?;
        Ok(Self {
            name,
            plugin_agreement,
            task_agreements: task_agreements.into_iter().collect(),
        })
    }
}
