use serde::{Deserialize, Serialize};

use metrad_types::status_code::ConfigCode;
use metrad_types::{make_error, ConfigDataNode, Result, Status};

use crate::rule::{required_error, type_error, Rule};

/// The outcome of validating a config node against a rule set.
///
/// Validation is total: every problem found in one attempt is reported
/// together, and the processed node is absent whenever any error exists.
#[derive(Debug, Default)]
pub struct ProcessResult {
    pub config: Option<ConfigDataNode>,
    pub errors: Vec<Status>,
}

impl ProcessResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// An ordered list of rules governing one policy-tree node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyNode {
    rules: Vec<Rule>,
}

impl PolicyNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Merge another node's rules after this node's own. A later rule with
    /// the same name supersedes the earlier one.
    pub fn merge(&mut self, other: &PolicyNode) {
        for rule in &other.rules {
            if let Some(existing) = self.rules.iter_mut().find(|r| r.name == rule.name) {
                *existing = rule.clone();
            } else {
                self.rules.push(rule.clone());
            }
        }
    }

    /// Validate `input` against the rules.
    ///
    /// Required keys that are missing and present keys of the wrong type
    /// accumulate errors; unknown keys pass through untouched; defaults are
    /// injected for absent optional keys.
    pub fn process(&self, input: &ConfigDataNode) -> ProcessResult {
        let mut out = input.clone();
        let mut errors = Vec::new();

        for rule in &self.rules {
            match input.get(&rule.name) {
                Some(value) => {
                    if !rule.value_type.accepts(value) {
                        errors.push(type_error(
                            &rule.name,
                            rule.value_type.name(),
                            value.type_name(),
                        ));
                    }
                }
                None => {
                    if rule.required {
                        errors.push(required_error(&rule.name));
                    } else if let Some(ref default) = rule.default {
                        out.add_item(rule.name.clone(), default.clone());
                    }
                }
            }
        }

        if errors.is_empty() {
            ProcessResult {
                config: Some(out),
                errors,
            }
        } else {
            ProcessResult {
                config: None,
                errors,
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TreeNode {
    key: String,
    node: Option<PolicyNode>,
    children: Vec<TreeNode>,
}

impl TreeNode {
    fn child_mut(&mut self, key: &str) -> Option<&mut TreeNode> {
        self.children.iter_mut().find(|c| c.key == key)
    }

    fn add(&mut self, path: &[String], node: PolicyNode) {
        match path.split_first() {
            None => match self.node {
                Some(ref mut existing) => existing.merge(&node),
                None => self.node = Some(node),
            },
            Some((first, rest)) => {
                if self.child_mut(first).is_none() {
                    self.children.push(TreeNode {
                        key: first.clone(),
                        node: None,
                        children: Vec::new(),
                    });
                }
                self.child_mut(first).unwrap().add(rest, node);
            }
        }
    }

    /// Collect the rule nodes along `path`, shallower nodes first so deeper
    /// rules supersede on merge.
    fn gather(&self, path: &[String], found: &mut Vec<PolicyNode>) {
        if let Some(ref node) = self.node {
            found.push(node.clone());
        }
        if let Some((first, rest)) = path.split_first() {
            if let Some(child) = self.children.iter().find(|c| &c.key == first) {
                child.gather(rest, found);
            }
        }
    }
}

/// A tree of policy nodes keyed by namespace prefix.
///
/// `get` merges every rule set found walking the requested path, so a policy
/// registered at `/intel` also governs `/intel/dummy/foo`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPolicy {
    root: TreeNode,
    frozen: bool,
}

impl ConfigPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule node at a namespace prefix. Fails once the policy is
    /// frozen.
    pub fn add(&mut self, path: &[String], node: PolicyNode) -> Result<()> {
        if self.frozen {
            return make_error(ConfigCode::POLICY_FROZEN);
        }
        self.root.add(path, node);
        Ok(())
    }

    /// The merged rule set governing `path`.
    pub fn get(&self, path: &[String]) -> PolicyNode {
        let mut found = Vec::new();
        self.root.gather(path, &mut found);
        let mut merged = PolicyNode::new();
        for node in found {
            merged.merge(&node);
        }
        merged
    }

    /// Prohibit further mutation.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}
