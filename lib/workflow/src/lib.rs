//! Workflow model and execution engine for agentflow.
//!
//! This crate contains everything the orchestrator core needs that is not
//! an agent implementation or a transport concern:
//!
//! - The workflow data model (nodes, edges, execution records, logs)
//! - The execution graph and ready-set tracking
//! - The pre-flight workflow validator
//! - The execution engine (dispatch loop, cancellation, monitor)
//! - The trait seams the engine consumes: [`store::MetadataStore`],
//!   [`events::ProgressSink`], and [`agent::AgentInvoker`]

pub mod agent;
pub mod context;
pub mod definition;
pub mod edge;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod graph;
pub mod node;
pub mod store;
pub mod validator;
pub mod work;

pub use agent::{AgentInput, AgentInvoker, AgentMetadata, AgentOutcome, BUILTIN_AGENT_KINDS};
pub use definition::{ExecutionConfig, Visibility, WorkflowData, WorkflowRecord};
pub use edge::{Edge, EdgeId};
pub use engine::{EngineConfig, ExecutionEngine};
pub use error::{AgentFailure, EngineError, GraphError, InvokeError};
pub use execution::{
    AgentLogRecord, ExecutionRecord, ExecutionStatus, NodeRun, NodeRunState, ProgressKind,
    ProgressRecord, TriggerKind,
};
pub use node::{Node, NodeData, NodeId, NodeKind};
pub use validator::{ValidationReport, validate_workflow};
