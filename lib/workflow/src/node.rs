//! Workflow node types.
//!
//! Node ids are assigned by the workflow designer and are plain strings,
//! unique within one workflow. The engine treats `position` as opaque; only
//! `data` carries execution-relevant configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// A node identifier, unique within a single workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id from any string-like value.
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

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The category of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Executes a configured agent.
    Agent,
    /// Branching point (edit-time concept; executes as pass-through).
    Condition,
    /// Entry point that initiates the workflow.
    Trigger,
    /// Terminal side-effect node.
    Action,
}

impl NodeKind {
    /// The wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Condition => "condition",
            Self::Trigger => "trigger",
            Self::Action => "action",
        }
    }
}

/// Execution-relevant node payload.
///
/// The designer frontend serialises these fields in camelCase
/// (`agentType`, `inputMapping`); aliases keep both spellings readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Human-readable label shown in the designer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Agent kind for agent nodes.
    #[serde(default, alias = "agentType", skip_serializing_if = "Option::is_none")]
    pub agent_kind: Option<String>,
    /// Per-kind configuration map.
    #[serde(default)]
    pub config: Map<String, JsonValue>,
    /// Input mapping: entry values beginning with `$name` resolve from the
    /// execution's variable scope, everything else is copied verbatim.
    #[serde(default, alias = "inputMapping", skip_serializing_if = "Option::is_none")]
    pub input_mapping: Option<Map<String, JsonValue>>,
}

impl NodeData {
    /// Returns the effective input mapping.
    ///
    /// The designer historically nested the mapping inside `config`, so both
    /// locations are honoured; the top-level field wins.
    #[must_use]
    pub fn effective_input_mapping(&self) -> Option<&Map<String, JsonValue>> {
        if let Some(mapping) = &self.input_mapping {
            return Some(mapping);
        }
        self.config.get("input_mapping").and_then(JsonValue::as_object)
    }
}

/// One vertex of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique id within the workflow.
    pub id: NodeId,
    /// Node category.
    #[serde(rename = "kind", alias = "type")]
    pub kind: NodeKind,
    /// Designer canvas position; opaque to the engine.
    #[serde(default)]
    pub position: JsonValue,
    /// Execution payload.
    #[serde(default)]
    pub data: NodeData,
}

impl Node {
    /// Creates an agent node with the given id and agent kind.
    #[must_use]
    pub fn agent(id: impl Into<NodeId>, agent_kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Agent,
            position: JsonValue::Null,
            data: NodeData {
                agent_kind: Some(agent_kind.into()),
                ..NodeData::default()
            },
        }
    }

    /// Creates a trigger node with the given id.
    #[must_use]
    pub fn trigger(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Trigger,
            position: JsonValue::Null,
            data: NodeData::default(),
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.data.label = Some(label.into());
        self
    }

    /// Sets the config map.
    #[must_use]
    pub fn with_config(mut self, config: Map<String, JsonValue>) -> Self {
        self.data.config = config;
        self
    }

    /// Sets the input mapping.
    #[must_use]
    pub fn with_input_mapping(mut self, mapping: Map<String, JsonValue>) -> Self {
        self.data.input_mapping = Some(mapping);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_builders() {
        let node = Node::agent("n1", "api_caller").with_label("Fetch");
        assert_eq!(node.id.as_str(), "n1");
        assert_eq!(node.kind, NodeKind::Agent);
        assert_eq!(node.data.agent_kind.as_deref(), Some("api_caller"));
        assert_eq!(node.data.label.as_deref(), Some("Fetch"));
    }

    #[test]
    fn node_deserializes_designer_camel_case() {
        let json = serde_json::json!({
            "id": "node-1",
            "type": "agent",
            "position": {"x": 10, "y": 20},
            "data": {
                "label": "Fetch users",
                "agentType": "api_caller",
                "config": {"timeout_seconds": 10},
                "inputMapping": {"url": "$endpoint"}
            }
        });

        let node: Node = serde_json::from_value(json).expect("deserialize");
        assert_eq!(node.kind, NodeKind::Agent);
        assert_eq!(node.data.agent_kind.as_deref(), Some("api_caller"));
        let mapping = node.data.effective_input_mapping().expect("mapping");
        assert_eq!(mapping.get("url"), Some(&JsonValue::from("$endpoint")));
    }

    #[test]
    fn input_mapping_falls_back_to_config() {
        let json = serde_json::json!({
            "id": "n",
            "kind": "agent",
            "data": {
                "agent_kind": "data_processor",
                "config": {"input_mapping": {"data": "$rows"}}
            }
        });

        let node: Node = serde_json::from_value(json).expect("deserialize");
        let mapping = node.data.effective_input_mapping().expect("mapping");
        assert_eq!(mapping.get("data"), Some(&JsonValue::from("$rows")));
    }

    #[test]
    fn node_kind_wire_names() {
        assert_eq!(NodeKind::Agent.as_str(), "agent");
        assert_eq!(NodeKind::Trigger.as_str(), "trigger");
    }
}
