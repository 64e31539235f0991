//! Route handlers, grouped by resource.

pub mod agents;
pub mod executions;
pub mod workflows;
pub mod ws;

use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

/// Builds the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/agents", get(agents::list_agents))
        .route(
            "/api/v1/workflows/{id}/execute",
            post(workflows::execute_workflow),
        )
        .route(
            "/api/v1/workflows/{id}/executions",
            get(workflows::list_workflow_executions),
        )
        .route(
            "/api/v1/workflows/validate",
            post(workflows::validate_inline),
        )
        .route(
            "/api/v1/workflows/{id}/validate",
            post(workflows::validate_saved),
        )
        .route("/api/v1/executions/{id}", get(executions::get_execution))
        .route(
            "/api/v1/executions/{id}/cancel",
            post(executions::cancel_execution),
        )
        .route("/ws/{workflow_id}", get(ws::workflow_socket))
        .with_state(state)
}
