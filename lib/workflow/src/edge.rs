//! Edge types for workflow graphs.
//!
//! An edge makes its target depend on its source. Ports are optional
//! designer metadata; the engine only cares about source and target ids.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An edge identifier, unique within a single workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(String);

impl EdgeId {
    /// Creates an edge id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EdgeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EdgeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Unique id within the workflow.
    pub id: EdgeId,
    /// The upstream node.
    #[serde(alias = "source_node_id")]
    pub source: NodeId,
    /// The downstream node.
    #[serde(alias = "target_node_id")]
    pub target: NodeId,
    /// Output port on the source node, if the designer uses ports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
    /// Input port on the target node, if the designer uses ports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
}

impl Edge {
    /// Creates a new edge.
    #[must_use]
    pub fn new(id: impl Into<EdgeId>, source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_port: None,
            target_port: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_creation() {
        let edge = Edge::new("e1", "a", "b");
        assert_eq!(edge.id.as_str(), "e1");
        assert_eq!(edge.source.as_str(), "a");
        assert_eq!(edge.target.as_str(), "b");
        assert!(edge.source_port.is_none());
    }

    #[test]
    fn edge_deserializes_long_field_names() {
        let json = serde_json::json!({
            "id": "e1",
            "source_node_id": "a",
            "target_node_id": "b",
            "source_port": "out"
        });

        let edge: Edge = serde_json::from_value(json).expect("deserialize");
        assert_eq!(edge.source.as_str(), "a");
        assert_eq!(edge.source_port.as_deref(), Some("out"));
    }

    #[test]
    fn edge_serde_roundtrip() {
        let edge = Edge::new("e2", "x", "y");
        let json = serde_json::to_string(&edge).expect("serialize");
        let parsed: Edge = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(edge, parsed);
    }
}
