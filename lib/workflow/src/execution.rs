//! Execution records, progress logs, and per-node run state.
//!
//! An execution is a single run of a workflow. Its status is monotone:
//! `queued < running < {completed, failed, cancelled}`, terminal states are
//! permanent, and the ordered `logs` array embedded in the record is the
//! per-node audit trail observers also receive over the collaboration hub.

use crate::node::NodeId;
use agentflow_core::{AgentLogId, ExecutionId, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The overall status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, waiting for the engine to pick it up.
    Queued,
    /// Actively executing.
    Running,
    /// Finished with every node completed.
    Completed,
    /// Finished because a node failed.
    Failed,
    /// Cancelled by user, timeout, or shutdown.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The wire name of this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// How an execution was initiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Started by a user from the designer.
    #[default]
    Manual,
    /// Started by a schedule.
    Schedule,
    /// Started by an inbound webhook.
    Webhook,
    /// Started through the HTTP API.
    Api,
}

/// A persisted execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique identifier.
    pub id: ExecutionId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// The user the run was initiated for.
    pub user_id: UserId,
    /// Current status.
    pub status: ExecutionStatus,
    /// How the run was initiated.
    #[serde(default)]
    pub trigger_kind: TriggerKind,
    /// Input data handed to the run.
    pub input_data: JsonValue,
    /// Final output (if completed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<JsonValue>,
    /// Error message (single source of truth for a failed run).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When the engine started the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<i64>,
    /// Ordered progress records.
    #[serde(default)]
    pub logs: Vec<ProgressRecord>,
}

impl ExecutionRecord {
    /// Creates a new queued execution.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        user_id: UserId,
        trigger_kind: TriggerKind,
        input_data: JsonValue,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            user_id,
            status: ExecutionStatus::Queued,
            trigger_kind,
            input_data,
            output_data: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            execution_time_ms: None,
            logs: Vec::new(),
        }
    }
}

/// Log severity for a progress record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Routine progress.
    #[default]
    Info,
    /// Something noteworthy but non-fatal.
    Warning,
    /// A failure.
    Error,
}

/// The kind of event a progress record describes.
///
/// A failed run's terminal entry is `ExecutionCompleted` with an `error`
/// payload; the status field on the record carries the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// A node began executing.
    NodeStarted,
    /// A node finished successfully.
    NodeCompleted,
    /// A node failed.
    NodeFailed,
    /// The run began executing.
    ExecutionStarted,
    /// The run reached a terminal completed/failed state.
    ExecutionCompleted,
    /// The run was cancelled.
    ExecutionCancelled,
}

/// One entry in an execution's ordered log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// The execution this event belongs to.
    pub execution_id: ExecutionId,
    /// The node involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Severity.
    #[serde(default)]
    pub level: LogLevel,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    /// Status string observers display ("started", "completed", "failed", ...).
    pub status: String,
    /// The node's result payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    /// Error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressRecord {
    fn new(
        execution_id: ExecutionId,
        node_id: Option<NodeId>,
        level: LogLevel,
        kind: ProgressKind,
        status: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            execution_id,
            node_id,
            level,
            kind,
            status: status.into(),
            result: None,
            error: None,
        }
    }

    /// A node began executing.
    #[must_use]
    pub fn node_started(execution_id: ExecutionId, node_id: NodeId) -> Self {
        Self::new(
            execution_id,
            Some(node_id),
            LogLevel::Info,
            ProgressKind::NodeStarted,
            "started",
        )
    }

    /// A node finished successfully.
    #[must_use]
    pub fn node_completed(execution_id: ExecutionId, node_id: NodeId, result: JsonValue) -> Self {
        let mut record = Self::new(
            execution_id,
            Some(node_id),
            LogLevel::Info,
            ProgressKind::NodeCompleted,
            "completed",
        );
        record.result = Some(result);
        record
    }

    /// A node failed.
    #[must_use]
    pub fn node_failed(execution_id: ExecutionId, node_id: NodeId, error: impl Into<String>) -> Self {
        let mut record = Self::new(
            execution_id,
            Some(node_id),
            LogLevel::Error,
            ProgressKind::NodeFailed,
            "failed",
        );
        record.error = Some(error.into());
        record
    }

    /// The run began executing.
    #[must_use]
    pub fn execution_started(execution_id: ExecutionId) -> Self {
        Self::new(
            execution_id,
            None,
            LogLevel::Info,
            ProgressKind::ExecutionStarted,
            "running",
        )
    }

    /// The run completed successfully.
    #[must_use]
    pub fn execution_completed(execution_id: ExecutionId, result: JsonValue) -> Self {
        let mut record = Self::new(
            execution_id,
            None,
            LogLevel::Info,
            ProgressKind::ExecutionCompleted,
            "completed",
        );
        record.result = Some(result);
        record
    }

    /// The run failed.
    #[must_use]
    pub fn execution_failed(execution_id: ExecutionId, error: impl Into<String>) -> Self {
        let mut record = Self::new(
            execution_id,
            None,
            LogLevel::Error,
            ProgressKind::ExecutionCompleted,
            "failed",
        );
        record.error = Some(error.into());
        record
    }

    /// The run was cancelled.
    #[must_use]
    pub fn execution_cancelled(execution_id: ExecutionId) -> Self {
        Self::new(
            execution_id,
            None,
            LogLevel::Warning,
            ProgressKind::ExecutionCancelled,
            "cancelled",
        )
    }
}

/// The in-memory state of a single node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunState {
    /// Waiting for predecessors.
    Pending,
    /// All predecessors completed; awaiting dispatch.
    Ready,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Never ran because an upstream node failed or the run was cancelled.
    Skipped,
}

/// Transient per-node run record owned by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRun {
    /// The node this run describes.
    pub node_id: NodeId,
    /// Current state.
    pub state: NodeRunState,
    /// When dispatch started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the node finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// The node's result value, if completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_value: Option<JsonValue>,
    /// Error message, if failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeRun {
    /// Creates a pending node run.
    #[must_use]
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: NodeRunState::Pending,
            started_at: None,
            finished_at: None,
            result_value: None,
            error: None,
        }
    }

    /// Marks the node as running.
    pub fn start(&mut self) {
        self.state = NodeRunState::Running;
        self.started_at = Some(Utc::now());
    }

    /// Marks the node as completed.
    pub fn complete(&mut self, result: JsonValue) {
        self.state = NodeRunState::Completed;
        self.finished_at = Some(Utc::now());
        self.result_value = Some(result);
    }

    /// Marks the node as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = NodeRunState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// Marks the node as skipped.
    pub fn skip(&mut self) {
        self.state = NodeRunState::Skipped;
        self.finished_at = Some(Utc::now());
    }
}

/// A persisted per-node agent log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLogRecord {
    /// Unique identifier.
    pub id: AgentLogId,
    /// The execution this log belongs to.
    pub execution_id: ExecutionId,
    /// The agent kind that ran.
    pub agent_kind: String,
    /// Display name at the time of the run.
    pub agent_display_name: String,
    /// Order of completion within the run (not DAG order).
    pub step_index: u32,
    /// Terminal status of the node ("completed", "failed", "cancelled").
    pub status: String,
    /// Input handed to the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<JsonValue>,
    /// Output the agent produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<JsonValue>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Wall-clock duration in milliseconds.
    pub execution_time_ms: i64,
    /// When the node started.
    pub started_at: DateTime<Utc>,
    /// When the node finished.
    pub completed_at: DateTime<Utc>,
}
