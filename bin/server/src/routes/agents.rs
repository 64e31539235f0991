//! Agent catalog endpoint.

use crate::auth::AuthUser;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

/// `GET /api/v1/agents`: the registered agent kinds with their display
/// metadata and config/input/output schemas.
pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    AuthUser(_user_id): AuthUser,
) -> Json<JsonValue> {
    let catalog = state.registry.catalog();
    let total = catalog.len();
    Json(json!({
        "agents": catalog,
        "total": total,
    }))
}
