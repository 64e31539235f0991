//! WebSocket transport for the collaboration hub.
//!
//! `GET /ws/{workflow_id}?token=...` upgrades to a socket whose outbound
//! half drains the hub's per-connection channel (pre-serialized frames) and
//! whose inbound half feeds `handle_message`. The socket layer owns only
//! transport concerns (parsing, heartbeats, teardown); all fan-out state
//! lives in the hub.

use crate::error::ApiError;
use crate::state::AppState;
use agentflow_collab::InboundMessage;
use agentflow_core::{UserId, WorkflowId};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures::{SinkExt as _, StreamExt as _};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer token; WebSocket clients cannot set headers.
    pub token: String,
}

/// `GET /ws/{workflow_id}`: upgrades to the collaboration channel.
pub async fn workflow_socket(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
    Query(query): Query<WsQuery>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let workflow_id: WorkflowId = workflow_id
        .parse()
        .map_err(|_| ApiError::InvalidInput(format!("invalid workflow id: {workflow_id}")))?;
    let user_id = state.jwt.verify(&query.token)?;

    if state.hub.connections_for_user(user_id) >= state.ws.max_connections_per_user {
        return Err(ApiError::Forbidden(
            "connection limit reached for user".to_string(),
        ));
    }

    Ok(upgrade.on_upgrade(move |socket| serve_socket(socket, state, workflow_id, user_id)))
}

async fn serve_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    workflow_id: WorkflowId,
    user_id: UserId,
) {
    let (connection_id, mut frames) = state.hub.connect(workflow_id, user_id);
    let (mut sink, mut stream) = socket.split();

    let heartbeat = Duration::from_secs(state.ws.heartbeat_interval.max(1));
    let send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await; // the first tick is immediate
        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<InboundMessage>(&text) {
                Ok(inbound) => state.hub.handle_message(workflow_id, inbound),
                Err(error) => {
                    tracing::warn!(%workflow_id, %user_id, %error, "unparseable frame");
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            // Pings are answered by the protocol layer; pongs and binary
            // frames are ignored
            Ok(_) => {}
        }
    }

    state.hub.disconnect(workflow_id, connection_id);
    send_task.abort();
}
