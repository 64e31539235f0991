//! Shared application state.

use crate::auth::JwtVerifier;
use crate::config::WsConfig;
use agentflow_agents::AgentRegistry;
use agentflow_collab::CollabHub;
use agentflow_workflow::engine::ExecutionEngine;
use agentflow_workflow::store::MetadataStore;
use std::sync::Arc;

/// Everything the request handlers need.
pub struct AppState {
    /// Metadata store (PostgreSQL or in-memory).
    pub store: Arc<dyn MetadataStore>,
    /// The execution engine.
    pub engine: Arc<ExecutionEngine>,
    /// The collaboration hub.
    pub hub: Arc<CollabHub>,
    /// Agent registry, for the catalog endpoint.
    pub registry: Arc<AgentRegistry>,
    /// JWT verifier.
    pub jwt: JwtVerifier,
    /// WebSocket tuning.
    pub ws: WsConfig,
}
