//! Workflow-scoped endpoints: execute, list executions, validate.

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;
use agentflow_core::WorkflowId;
use agentflow_workflow::execution::{ExecutionRecord, ExecutionStatus, TriggerKind};
use agentflow_workflow::store::ExecutionFilter;
use agentflow_workflow::validator::validate_workflow;
use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

fn parse_workflow_id(id: &str) -> Result<WorkflowId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::InvalidInput(format!("invalid workflow id: {id}")))
}

/// Body of `POST /workflows/{id}/execute`.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    /// Input data seeded into the execution's variable scope.
    #[serde(default)]
    pub input_data: JsonValue,
}

/// `POST /api/v1/workflows/{id}/execute`
///
/// Creates the queued execution record, spawns the run, and returns
/// immediately.
pub async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let workflow_id = parse_workflow_id(&id)?;
    let workflow = state.store.get_workflow(workflow_id, user_id).await?;

    // The workflow's initial variables seed the scope; request input wins
    let mut input = workflow.execution_config.initial_variables.clone();
    if let Some(object) = request.input_data.as_object() {
        for (key, value) in object {
            input.insert(key.clone(), value.clone());
        }
    }
    let input_data = JsonValue::Object(input);

    let record = ExecutionRecord::new(
        workflow_id,
        user_id,
        TriggerKind::Api,
        input_data.clone(),
    );
    let execution_id = state.store.create_execution(&record).await?;

    let engine = Arc::clone(&state.engine);
    let workflow_data = workflow.workflow_data.clone();
    tokio::spawn(async move {
        if let Err(error) = engine
            .execute(execution_id, &workflow_data, input_data, user_id, workflow_id)
            .await
        {
            tracing::warn!(%execution_id, %error, "execution ended with error");
        }
    });

    Ok(Json(json!({
        "execution_id": execution_id,
        "status": "queued",
        "message": "Workflow execution started",
    })))
}

/// Query parameters for execution listings.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Page size.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Page offset.
    #[serde(default)]
    pub offset: Option<u32>,
    /// Restrict to one status.
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
}

/// One row of an execution listing.
#[derive(Debug, Serialize)]
pub struct ExecutionSummary {
    /// Execution id.
    pub id: agentflow_core::ExecutionId,
    /// Current status.
    pub status: ExecutionStatus,
    /// How the run was initiated.
    pub trigger_kind: TriggerKind,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When started.
    pub started_at: Option<DateTime<Utc>>,
    /// When finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Duration in milliseconds.
    pub execution_time_ms: Option<i64>,
    /// Error message, if failed.
    pub error_message: Option<String>,
}

impl From<ExecutionRecord> for ExecutionSummary {
    fn from(record: ExecutionRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            trigger_kind: record.trigger_kind,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            execution_time_ms: record.execution_time_ms,
            error_message: record.error_message,
        }
    }
}

/// `GET /api/v1/workflows/{id}/executions`
pub async fn list_workflow_executions(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    let workflow_id = parse_workflow_id(&id)?;
    // 404 before listing if the caller cannot see the workflow
    state.store.get_workflow(workflow_id, user_id).await?;

    let filter = ExecutionFilter {
        workflow_id: Some(workflow_id),
        user_id: Some(user_id),
        status: query.status,
        limit: query.limit.unwrap_or(0),
        offset: query.offset.unwrap_or(0),
    };
    let records = state.store.list_executions(&filter).await?;
    let summaries: Vec<ExecutionSummary> =
        records.into_iter().map(ExecutionSummary::from).collect();

    Ok(Json(json!({
        "executions": summaries,
        "limit": filter.limit,
        "offset": filter.offset,
    })))
}

/// `POST /api/v1/workflows/validate`: validates a workflow payload without
/// saving it.
pub async fn validate_inline(
    State(_state): State<Arc<AppState>>,
    AuthUser(_user_id): AuthUser,
    Json(workflow_data): Json<JsonValue>,
) -> Json<JsonValue> {
    let report = validate_workflow(&workflow_data);
    Json(serde_json::to_value(report).unwrap_or_else(|_| json!({"is_valid": false})))
}

/// `POST /api/v1/workflows/{id}/validate`: validates a saved workflow.
pub async fn validate_saved(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let workflow_id = parse_workflow_id(&id)?;
    let workflow = state.store.get_workflow(workflow_id, user_id).await?;
    let workflow_data = serde_json::to_value(&workflow.workflow_data)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let report = validate_workflow(&workflow_data);
    Ok(Json(
        serde_json::to_value(report).map_err(|e| ApiError::Internal(e.to_string()))?,
    ))
}
