use std::fmt;

use serde::{Deserialize, Serialize};

/// One element of a metric namespace.
///
/// A literal element matches only itself; a dynamic element is a named slot
/// that matches any literal at its position (e.g. the device id in
/// `/intel/disk/*/read_bytes`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceElement {
    Literal(String),
    Dynamic { name: String, description: String },
}

impl NamespaceElement {
    pub fn literal(value: impl Into<String>) -> Self {
        NamespaceElement::Literal(value.into())
    }

    pub fn dynamic(name: impl Into<String>, description: impl Into<String>) -> Self {
        NamespaceElement::Dynamic {
            name: name.into(),
            description: description.into(),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, NamespaceElement::Dynamic { .. })
    }

    /// The value rendered into the namespace string: the literal itself, or
    /// `*` for a dynamic slot.
    pub fn value(&self) -> &str {
        match self {
            NamespaceElement::Literal(v) => v,
            NamespaceElement::Dynamic { .. } => "*",
        }
    }
}

/// Two elements are equal iff they agree on kind and value. Dynamic slots
/// compare by name; the description is advisory.
impl PartialEq for NamespaceElement {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NamespaceElement::Literal(a), NamespaceElement::Literal(b)) => a == b,
            (
                NamespaceElement::Dynamic { name: a, .. },
                NamespaceElement::Dynamic { name: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

impl Eq for NamespaceElement {}

/// Hierarchical metric identity: an ordered sequence of elements.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(pub Vec<NamespaceElement>);

impl Namespace {
    /// Build a namespace of literal elements.
    pub fn from_literals<S: AsRef<str>>(parts: &[S]) -> Self {
        Namespace(
            parts
                .iter()
                .map(|p| NamespaceElement::literal(p.as_ref()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn elements(&self) -> &[NamespaceElement] {
        &self.0
    }

    pub fn push(&mut self, element: NamespaceElement) {
        self.0.push(element);
    }

    /// Whether any element is a dynamic slot, and the positions of the slots.
    pub fn is_dynamic(&self) -> (bool, Vec<usize>) {
        let indexes: Vec<usize> = self
            .0
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_dynamic())
            .map(|(i, _)| i)
            .collect();
        (!indexes.is_empty(), indexes)
    }

    /// Whether a concrete (all-literal) namespace matches this one, treating
    /// dynamic slots as wildcards. Lengths must agree.
    pub fn matches(&self, concrete: &Namespace) -> bool {
        if self.len() != concrete.len() {
            return false;
        }
        self.0.iter().zip(concrete.0.iter()).all(|(own, theirs)| {
            match (own, theirs) {
                (NamespaceElement::Dynamic { .. }, NamespaceElement::Literal(_)) => true,
                (a, b) => a == b,
            }
        })
    }

    /// The literal strings of the namespace, with `*` for dynamic slots.
    pub fn strings(&self) -> Vec<String> {
        self.0.iter().map(|e| e.value().to_string()).collect()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.0 {
            write!(f, "/{}", element.value())?;
        }
        Ok(())
    }
}
