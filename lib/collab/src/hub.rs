//! The collaboration hub.
//!
//! The hub exclusively owns all subscription state. Broadcasts serialize a
//! frame once, snapshot the subscriber set under the lock, and send through
//! unbounded channels (sends never block and never run under I/O). A send
//! to a closed channel marks the connection disconnected; removals are
//! processed after the iteration so broadcast never re-enters itself under
//! the lock.

use crate::message::{Frame, InboundMessage, OutboundMessage};
use agentflow_core::{ConnectionId, ExecutionId, UserId, WorkflowId};
use agentflow_workflow::events::ProgressSink;
use agentflow_workflow::execution::ProgressRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

struct CursorState {
    position: JsonValue,
    updated_at: DateTime<Utc>,
}

struct Subscriber {
    user_id: UserId,
    joined_at: DateTime<Utc>,
    sender: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct Room {
    subscribers: HashMap<ConnectionId, Subscriber>,
    cursors: HashMap<UserId, CursorState>,
}

/// A live collaborator, as reported to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveUser {
    /// The collaborator.
    pub user_id: UserId,
    /// When they connected.
    pub connected_at: DateTime<Utc>,
    /// Their last cursor position, if any.
    pub cursor_position: Option<JsonValue>,
    /// Their last activity timestamp.
    pub last_activity: DateTime<Utc>,
}

/// Per-workflow pub/sub hub for collaboration and engine progress.
#[derive(Default)]
pub struct CollabHub {
    rooms: Mutex<HashMap<WorkflowId, Room>>,
}

impl CollabHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and notifies peers.
    ///
    /// Returns the connection id and the receiving half carrying
    /// pre-serialized outbound frames.
    pub fn connect(
        &self,
        workflow_id: WorkflowId,
        user_id: UserId,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let connection_id = ConnectionId::new();
        let (sender, receiver) = mpsc::unbounded_channel();

        {
            let mut rooms = self.rooms.lock().expect("rooms lock");
            let room = rooms.entry(workflow_id).or_default();
            room.subscribers.insert(
                connection_id,
                Subscriber {
                    user_id,
                    joined_at: Utc::now(),
                    sender,
                },
            );
        }

        tracing::info!(%workflow_id, %user_id, %connection_id, "collaborator connected");

        // Peers learn about the join; the joiner does not
        self.broadcast_to_workflow(
            workflow_id,
            OutboundMessage::UserJoined { user_id },
            Some(connection_id),
        );

        (connection_id, receiver)
    }

    /// Removes a connection and notifies peers.
    pub fn disconnect(&self, workflow_id: WorkflowId, connection_id: ConnectionId) {
        let user_id = {
            let mut rooms = self.rooms.lock().expect("rooms lock");
            let Some(room) = rooms.get_mut(&workflow_id) else {
                return;
            };
            let Some(subscriber) = room.subscribers.remove(&connection_id) else {
                return;
            };
            room.cursors.remove(&subscriber.user_id);
            if room.subscribers.is_empty() {
                rooms.remove(&workflow_id);
            }
            subscriber.user_id
        };

        tracing::info!(%workflow_id, %user_id, %connection_id, "collaborator disconnected");
        self.broadcast_to_workflow(workflow_id, OutboundMessage::UserLeft { user_id }, None);
    }

    /// Dispatches an inbound frame by type.
    pub fn handle_message(&self, workflow_id: WorkflowId, message: InboundMessage) {
        match message {
            InboundMessage::CursorUpdate { user_id, position } => {
                {
                    let mut rooms = self.rooms.lock().expect("rooms lock");
                    if let Some(room) = rooms.get_mut(&workflow_id) {
                        room.cursors.insert(
                            user_id,
                            CursorState {
                                position: position.clone(),
                                updated_at: Utc::now(),
                            },
                        );
                    }
                }
                self.broadcast_to_workflow(
                    workflow_id,
                    OutboundMessage::CursorUpdate { user_id, position },
                    None,
                );
            }
            InboundMessage::NodeUpdate {
                node_id,
                changes,
                user_id,
            } => {
                self.broadcast_to_workflow(
                    workflow_id,
                    OutboundMessage::NodeUpdate {
                        node_id,
                        changes,
                        user_id,
                    },
                    None,
                );
            }
            InboundMessage::WorkflowSave { user_id, version } => {
                self.broadcast_to_workflow(
                    workflow_id,
                    OutboundMessage::WorkflowSaved { user_id, version },
                    None,
                );
            }
            InboundMessage::ChatMessage { user_id, message } => {
                self.broadcast_to_workflow(
                    workflow_id,
                    OutboundMessage::ChatMessage { user_id, message },
                    None,
                );
            }
        }
    }

    /// Sends a frame to every subscriber of a workflow, minus `exclude`.
    ///
    /// Subscribers whose channel is gone are removed; each removal emits a
    /// `user_left` to the remaining peers.
    pub fn broadcast_to_workflow(
        &self,
        workflow_id: WorkflowId,
        message: OutboundMessage,
        exclude: Option<ConnectionId>,
    ) {
        let frame = Frame::now(message);
        let Ok(serialized) = serde_json::to_string(&frame) else {
            tracing::error!(%workflow_id, "failed to serialize outbound frame");
            return;
        };

        let mut dropped: Vec<(ConnectionId, UserId)> = Vec::new();
        {
            let mut rooms = self.rooms.lock().expect("rooms lock");
            let Some(room) = rooms.get_mut(&workflow_id) else {
                return;
            };

            for (&connection_id, subscriber) in &room.subscribers {
                if Some(connection_id) == exclude {
                    continue;
                }
                if subscriber.sender.send(serialized.clone()).is_err() {
                    dropped.push((connection_id, subscriber.user_id));
                }
            }

            for (connection_id, user_id) in &dropped {
                room.subscribers.remove(connection_id);
                room.cursors.remove(user_id);
            }
            if room.subscribers.is_empty() {
                rooms.remove(&workflow_id);
            }
        }

        for (connection_id, user_id) in dropped {
            tracing::warn!(%workflow_id, %connection_id, "dropping unreachable subscriber");
            self.broadcast_to_workflow(workflow_id, OutboundMessage::UserLeft { user_id }, None);
        }
    }

    /// Engine entry point for progress delivery.
    pub fn send_execution_update(
        &self,
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        update: ProgressRecord,
    ) {
        self.broadcast_to_workflow(
            workflow_id,
            OutboundMessage::ExecutionUpdate {
                execution_id,
                workflow_id,
                update,
            },
            None,
        );
    }

    /// Lists live collaborators on a workflow.
    #[must_use]
    pub fn active_users(&self, workflow_id: WorkflowId) -> Vec<ActiveUser> {
        let rooms = self.rooms.lock().expect("rooms lock");
        let Some(room) = rooms.get(&workflow_id) else {
            return Vec::new();
        };

        room.subscribers
            .values()
            .map(|subscriber| {
                let cursor = room.cursors.get(&subscriber.user_id);
                ActiveUser {
                    user_id: subscriber.user_id,
                    connected_at: subscriber.joined_at,
                    cursor_position: cursor.map(|c| c.position.clone()),
                    last_activity: cursor.map_or(subscriber.joined_at, |c| c.updated_at),
                }
            })
            .collect()
    }

    /// Number of live connections a user holds across all workflows.
    #[must_use]
    pub fn connections_for_user(&self, user_id: UserId) -> usize {
        self.rooms
            .lock()
            .expect("rooms lock")
            .values()
            .flat_map(|room| room.subscribers.values())
            .filter(|subscriber| subscriber.user_id == user_id)
            .count()
    }

    /// Number of live subscribers on a workflow.
    #[must_use]
    pub fn subscriber_count(&self, workflow_id: WorkflowId) -> usize {
        self.rooms
            .lock()
            .expect("rooms lock")
            .get(&workflow_id)
            .map_or(0, |room| room.subscribers.len())
    }
}

#[async_trait]
impl ProgressSink for CollabHub {
    async fn execution_update(
        &self,
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        record: &ProgressRecord,
    ) {
        self.send_execution_update(workflow_id, execution_id, record.clone());
    }
}
