//! Execution endpoints: fetch and cancel.

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use agentflow_core::ExecutionId;
use agentflow_workflow::error::EngineError;
use agentflow_workflow::execution::{ExecutionStatus, ProgressRecord};
use agentflow_workflow::store::ExecutionPatch;
use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

fn parse_execution_id(id: &str) -> Result<ExecutionId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::InvalidInput(format!("invalid execution id: {id}")))
}

/// `GET /api/v1/executions/{id}`: the full record including logs.
pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let execution_id = parse_execution_id(&id)?;
    let record = state.store.get_execution(execution_id, user_id).await?;
    Ok(Json(
        serde_json::to_value(record).map_err(|e| ApiError::Internal(e.to_string()))?,
    ))
}

/// `POST /api/v1/executions/{id}/cancel`
///
/// Allowed while the execution is queued or running; anything else is a
/// monotonicity conflict.
pub async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let execution_id = parse_execution_id(&id)?;
    let record = state.store.get_execution(execution_id, user_id).await?;

    if record.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "execution is already {}",
            record.status.as_str()
        )));
    }

    match state.engine.cancel(execution_id).await {
        Ok(()) => {}
        // Still queued: the engine has no in-flight entry, so the record is
        // finalised directly
        Err(EngineError::ExecutionNotFound { .. })
            if record.status == ExecutionStatus::Queued =>
        {
            let cancelled = ProgressRecord::execution_cancelled(execution_id);
            state
                .store
                .update_execution(
                    execution_id,
                    ExecutionPatch::terminal(ExecutionStatus::Cancelled, Utc::now())
                        .with_logs(vec![cancelled.clone()]),
                )
                .await?;
            state
                .hub
                .send_execution_update(record.workflow_id, execution_id, cancelled);
        }
        Err(error) => return Err(error.into()),
    }

    Ok(Json(json!({
        "execution_id": execution_id,
        "status": "cancelled",
        "message": "Execution cancelled",
    })))
}
