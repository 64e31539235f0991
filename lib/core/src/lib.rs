//! Core domain types for the agentflow platform.
//!
//! This crate provides the strongly-typed identifiers shared by every
//! other crate in the workspace.

pub mod id;

pub use id::{AgentLogId, ConnectionId, ExecutionId, ParseIdError, UserId, WorkflowId};
