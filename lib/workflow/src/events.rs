//! Progress event delivery out of the engine.
//!
//! The engine pushes every progress record through a [`ProgressSink`]. The
//! collaboration hub is the production sink; the dependency points one way
//! only, and the sink knows nothing about the engine.

use crate::execution::ProgressRecord;
use agentflow_core::{ExecutionId, WorkflowId};
use async_trait::async_trait;

/// Receives engine progress events for fan-out to observers.
///
/// Delivery is best-effort; implementations must not fail the engine.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Called once per progress record, in emission order.
    async fn execution_update(
        &self,
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        record: &ProgressRecord,
    );
}

/// A sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn execution_update(
        &self,
        _workflow_id: WorkflowId,
        _execution_id: ExecutionId,
        _record: &ProgressRecord,
    ) {
    }
}
