//! Workflow definition types.
//!
//! A workflow record is the persisted unit the metadata store hands to the
//! engine: ownership metadata plus the graph (`WorkflowData`) and the
//! execution defaults.

use crate::edge::Edge;
use crate::node::{Node, NodeId};
use agentflow_core::{UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// The graph payload of a workflow: nodes, edges, and the designer viewport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowData {
    /// All nodes in the workflow.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// All edges in the workflow.
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Designer viewport; opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<JsonValue>,
}

impl WorkflowData {
    /// Creates workflow data from nodes and edges.
    #[must_use]
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            nodes,
            edges,
            viewport: None,
        }
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}

/// Execution defaults stored with a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Per-execution wall-clock budget in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Default retry count for agents that retry.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Default base delay between retries, in seconds.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    /// Whether independent nodes may run concurrently.
    #[serde(default = "default_parallel_allowed")]
    pub parallel_allowed: bool,
    /// Variables seeded into the execution scope before input_data.
    #[serde(default)]
    pub initial_variables: Map<String, JsonValue>,
}

fn default_timeout_seconds() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    5
}

fn default_parallel_allowed() -> bool {
    true
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay_seconds(),
            parallel_allowed: default_parallel_allowed(),
            initial_variables: Map::new(),
        }
    }
}

/// Who can see a workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Visible to the owner only.
    #[default]
    Private,
    /// Visible to everyone.
    Public,
}

/// A persisted workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Unique identifier.
    pub id: WorkflowId,
    /// Owning user.
    pub owner: UserId,
    /// Human-readable name.
    pub name: String,
    /// Monotonically increasing version, bumped on each save.
    pub version: u32,
    /// The graph payload.
    pub workflow_data: WorkflowData,
    /// Execution defaults.
    #[serde(default)]
    pub execution_config: ExecutionConfig,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last updated.
    pub updated_at: DateTime<Utc>,
    /// Organisational tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Visibility.
    #[serde(default)]
    pub visibility: Visibility,
}

impl WorkflowRecord {
    /// Creates a new private workflow owned by `owner`.
    #[must_use]
    pub fn new(owner: UserId, name: impl Into<String>, workflow_data: WorkflowData) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            owner,
            name: name.into(),
            version: 1,
            workflow_data,
            execution_config: ExecutionConfig::default(),
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
            visibility: Visibility::default(),
        }
    }

    /// Replaces the graph and bumps the version.
    pub fn update_graph(&mut self, workflow_data: WorkflowData) {
        self.workflow_data = workflow_data;
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_config_defaults() {
        let config: ExecutionConfig = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(config.timeout_seconds, 3600);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_seconds, 5);
        assert!(config.parallel_allowed);
        assert!(config.initial_variables.is_empty());
    }

    #[test]
    fn update_graph_bumps_version() {
        let owner = UserId::new();
        let mut record = WorkflowRecord::new(owner, "Test", WorkflowData::default());
        assert_eq!(record.version, 1);

        record.update_graph(WorkflowData::default());
        assert_eq!(record.version, 2);
        assert!(record.updated_at >= record.created_at);
    }

    #[test]
    fn workflow_data_node_lookup() {
        let data = WorkflowData::new(
            vec![Node::trigger("start"), Node::agent("work", "data_processor")],
            vec![Edge::new("e1", "start", "work")],
        );

        assert!(data.node(&NodeId::from("work")).is_some());
        assert!(data.node(&NodeId::from("missing")).is_none());
    }

    #[test]
    fn workflow_record_serde_roundtrip() {
        let record = WorkflowRecord::new(UserId::new(), "Roundtrip", WorkflowData::default());
        let json = serde_json::to_string(&record).expect("serialize");
        let parsed: WorkflowRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.id, record.id);
        assert_eq!(parsed.name, "Roundtrip");
        assert_eq!(parsed.visibility, Visibility::Private);
    }
}
