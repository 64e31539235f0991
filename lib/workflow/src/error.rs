//! Error types for the workflow crate.
//!
//! Errors are hand-rolled enums with `Display` + `Error` impls. Each layer
//! owns the variants that can originate there:
//!
//! - `GraphError`: structural problems found while building the execution graph
//! - `AgentFailure`: typed failures surfaced by an agent implementation
//! - `InvokeError`: dispatch-layer failures (unknown agent, wrapped agent failure)
//! - `EngineError`: execution-level failures returned by `execute`

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural problems in a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The workflow has no nodes.
    Empty,
    /// An edge references a node id that does not exist.
    UnknownNode { edge_id: String, node_id: NodeId },
    /// The graph contains a cycle.
    CycleDetected,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "workflow must contain at least one node"),
            Self::UnknownNode { edge_id, node_id } => {
                write!(f, "edge '{edge_id}' references unknown node '{node_id}'")
            }
            Self::CycleDetected => write!(f, "workflow contains a cycle"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Typed failures an agent can surface.
///
/// The engine records these against the failing node; the dispatch layer
/// never converts them to plain strings until they hit a persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentFailure {
    /// The agent's input failed validation.
    InvalidInput { message: String },
    /// The agent exceeded its time budget.
    Timeout { seconds: u64 },
    /// A connect/read level network failure.
    Transport { message: String },
    /// An HTTP response the agent chose to treat as an error.
    Http { status: u16, body: String },
    /// Authentication against an external service failed.
    Auth { message: String },
    /// The external service answered with something unusable.
    BadResponse { message: String },
    /// Source code handed to the analyzer could not be parsed.
    Syntax { message: String },
    /// The execution's cancellation token fired mid-run.
    Cancelled,
    /// Anything else.
    Internal { message: String },
}

impl AgentFailure {
    /// Short machine-readable name for this failure kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport_error",
            Self::Http { .. } => "http_error",
            Self::Auth { .. } => "auth_error",
            Self::BadResponse { .. } => "bad_response",
            Self::Syntax { .. } => "syntax_error",
            Self::Cancelled => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }

    /// Returns true if this failure means the cancellation token fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { message } => write!(f, "invalid input: {message}"),
            Self::Timeout { seconds } => write!(f, "timed out after {seconds}s"),
            Self::Transport { message } => write!(f, "transport error: {message}"),
            Self::Http { status, body } => write!(f, "http error {status}: {body}"),
            Self::Auth { message } => write!(f, "authentication failed: {message}"),
            Self::BadResponse { message } => write!(f, "bad response: {message}"),
            Self::Syntax { message } => write!(f, "syntax error: {message}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal { message } => write!(f, "internal agent error: {message}"),
        }
    }
}

impl std::error::Error for AgentFailure {}

/// Failures from the agent dispatch layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// The requested agent kind is not in the registry.
    UnknownAgent { kind: String },
    /// The agent ran and failed.
    Agent(AgentFailure),
}

impl InvokeError {
    /// Returns true if this error is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Agent(failure) if failure.is_cancelled())
    }
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAgent { kind } => write!(f, "unknown agent type: {kind}"),
            Self::Agent(failure) => write!(f, "{failure}"),
        }
    }
}

impl std::error::Error for InvokeError {}

impl From<AgentFailure> for InvokeError {
    fn from(failure: AgentFailure) -> Self {
        Self::Agent(failure)
    }
}

/// Errors returned by `ExecutionEngine::execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The workflow graph is malformed (empty, dangling edge, cycle).
    InvalidWorkflow { message: String },
    /// A node failed, which fails the whole execution.
    NodeFailed { node_id: NodeId, error: String },
    /// The execution was cancelled (user, timeout, or shutdown).
    Cancelled,
    /// No in-flight execution with this id.
    ExecutionNotFound { execution_id: agentflow_core::ExecutionId },
    /// The metadata store rejected a write.
    Store { message: String },
    /// Anything the engine could not categorise.
    Internal { message: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWorkflow { message } => write!(f, "invalid workflow: {message}"),
            Self::NodeFailed { node_id, error } => {
                write!(f, "node '{node_id}' failed: {error}")
            }
            Self::Cancelled => write!(f, "execution cancelled"),
            Self::ExecutionNotFound { execution_id } => {
                write!(f, "execution '{execution_id}' not found")
            }
            Self::Store { message } => write!(f, "store error: {message}"),
            Self::Internal { message } => write!(f, "internal engine error: {message}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<GraphError> for EngineError {
    fn from(e: GraphError) -> Self {
        Self::InvalidWorkflow {
            message: e.to_string(),
        }
    }
}

impl From<crate::store::StoreError> for EngineError {
    fn from(e: crate::store::StoreError) -> Self {
        Self::Store {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_failure_kind_names() {
        assert_eq!(
            AgentFailure::Timeout { seconds: 30 }.kind(),
            "timeout"
        );
        assert_eq!(
            AgentFailure::Http {
                status: 502,
                body: String::new()
            }
            .kind(),
            "http_error"
        );
        assert!(AgentFailure::Cancelled.is_cancelled());
    }

    #[test]
    fn invoke_error_detects_cancellation() {
        let err = InvokeError::Agent(AgentFailure::Cancelled);
        assert!(err.is_cancelled());

        let err = InvokeError::UnknownAgent {
            kind: "mystery".to_string(),
        };
        assert!(!err.is_cancelled());
    }

    #[test]
    fn agent_failure_serde_roundtrip() {
        let failure = AgentFailure::Http {
            status: 404,
            body: "not found".to_string(),
        };
        let json = serde_json::to_string(&failure).expect("serialize");
        let parsed: AgentFailure = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(failure, parsed);
    }

    #[test]
    fn graph_error_display() {
        let err = GraphError::UnknownNode {
            edge_id: "e1".to_string(),
            node_id: NodeId::from("missing"),
        };
        assert!(err.to_string().contains("missing"));
    }
}
