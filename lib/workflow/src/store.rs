//! The narrow metadata-store interface the engine writes through.
//!
//! Implementations live in the store crate (PostgreSQL, in-memory). The one
//! transactional guarantee required of implementations: a terminal status
//! write against an already-terminal execution must observe the existing
//! state and no-op, so racing writers (cancel vs natural completion)
//! converge on one terminal state.

use crate::definition::WorkflowRecord;
use crate::execution::{AgentLogRecord, ExecutionRecord, ExecutionStatus, ProgressRecord};
use agentflow_core::{ExecutionId, UserId, WorkflowId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::fmt;

/// Errors from metadata-store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested record does not exist (or is not visible to the caller).
    NotFound { entity: &'static str, id: String },
    /// A write would violate status monotonicity.
    Conflict { message: String },
    /// The backend rejected the operation.
    Backend { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} '{id}' not found"),
            Self::Conflict { message } => write!(f, "conflict: {message}"),
            Self::Backend { message } => write!(f, "store backend error: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// A partial update to an execution record.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPatch {
    /// New status, if the status is changing.
    pub status: Option<ExecutionStatus>,
    /// Final output.
    pub output_data: Option<JsonValue>,
    /// Error message for a failed run.
    pub error_message: Option<String>,
    /// When the run started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds.
    pub execution_time_ms: Option<i64>,
    /// Progress records appended to the execution's ordered log.
    pub append_logs: Vec<ProgressRecord>,
}

impl ExecutionPatch {
    /// A patch that only appends progress records.
    #[must_use]
    pub fn logs(records: Vec<ProgressRecord>) -> Self {
        Self {
            append_logs: records,
            ..Self::default()
        }
    }

    /// A patch marking the run as started.
    #[must_use]
    pub fn running(started_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(ExecutionStatus::Running),
            started_at: Some(started_at),
            ..Self::default()
        }
    }

    /// A terminal patch.
    #[must_use]
    pub fn terminal(status: ExecutionStatus, completed_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            completed_at: Some(completed_at),
            ..Self::default()
        }
    }

    /// Sets the output payload.
    #[must_use]
    pub fn with_output(mut self, output: JsonValue) -> Self {
        self.output_data = Some(output);
        self
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, ms: i64) -> Self {
        self.execution_time_ms = Some(ms);
        self
    }

    /// Appends progress records.
    #[must_use]
    pub fn with_logs(mut self, records: Vec<ProgressRecord>) -> Self {
        self.append_logs.extend(records);
        self
    }
}

/// Filter for listing executions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    /// Restrict to one workflow.
    pub workflow_id: Option<WorkflowId>,
    /// Restrict to one user.
    pub user_id: Option<UserId>,
    /// Restrict to one status.
    pub status: Option<ExecutionStatus>,
    /// Page size (0 means the backend default).
    pub limit: u32,
    /// Page offset.
    pub offset: u32,
}

/// The metadata store as consumed by the engine and the API layer.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persists a new execution record.
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<ExecutionId, StoreError>;

    /// Applies a partial update to an execution.
    ///
    /// Terminal writes are idempotent: if the record is already terminal the
    /// update is dropped without error.
    async fn update_execution(&self, id: ExecutionId, patch: ExecutionPatch)
    -> Result<(), StoreError>;

    /// Fetches an execution, scoped to its owner.
    async fn get_execution(&self, id: ExecutionId, user_id: UserId)
    -> Result<ExecutionRecord, StoreError>;

    /// Lists executions matching a filter, newest first.
    async fn list_executions(&self, filter: &ExecutionFilter)
    -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Fetches a workflow, scoped to its owner (public workflows are visible
    /// to everyone).
    async fn get_workflow(&self, id: WorkflowId, user_id: UserId)
    -> Result<WorkflowRecord, StoreError>;

    /// Appends a per-node agent log record.
    async fn append_agent_log(&self, record: &AgentLogRecord) -> Result<(), StoreError>;
}
