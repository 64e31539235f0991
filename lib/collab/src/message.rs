//! Wire frames for the collaboration channel.
//!
//! Inbound frames arrive from WebSocket clients; outbound frames are
//! broadcast by the hub. Every outbound frame carries an ISO-8601 UTC
//! timestamp.

use agentflow_core::{ExecutionId, UserId, WorkflowId};
use agentflow_workflow::execution::ProgressRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A message received from a collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// A collaborator moved their cursor.
    CursorUpdate {
        /// The collaborator.
        user_id: UserId,
        /// Canvas position; opaque to the hub.
        position: JsonValue,
    },
    /// A collaborator edited a node.
    NodeUpdate {
        /// The edited node.
        node_id: String,
        /// The edit payload.
        changes: JsonValue,
        /// The collaborator.
        user_id: UserId,
    },
    /// A collaborator saved the workflow.
    WorkflowSave {
        /// The collaborator.
        user_id: UserId,
        /// The saved version, if known.
        #[serde(default)]
        version: Option<u32>,
    },
    /// A chat message.
    ChatMessage {
        /// The sender.
        user_id: UserId,
        /// The message text.
        message: String,
    },
}

/// A message broadcast to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// A collaborator moved their cursor.
    CursorUpdate {
        /// The collaborator.
        user_id: UserId,
        /// Canvas position.
        position: JsonValue,
    },
    /// A collaborator edited a node (edit-time, distinct from engine events).
    NodeUpdate {
        /// The edited node.
        node_id: String,
        /// The edit payload.
        changes: JsonValue,
        /// The collaborator.
        user_id: UserId,
    },
    /// The workflow was saved.
    WorkflowSaved {
        /// The collaborator who saved.
        user_id: UserId,
        /// The saved version, if known.
        #[serde(default)]
        version: Option<u32>,
    },
    /// A chat message.
    ChatMessage {
        /// The sender.
        user_id: UserId,
        /// The message text.
        message: String,
    },
    /// A collaborator joined the workflow.
    UserJoined {
        /// The joiner.
        user_id: UserId,
    },
    /// A collaborator left the workflow.
    UserLeft {
        /// The leaver.
        user_id: UserId,
    },
    /// An engine progress event.
    ExecutionUpdate {
        /// The execution this event belongs to.
        execution_id: ExecutionId,
        /// The workflow being executed.
        workflow_id: WorkflowId,
        /// The progress record (carries its own event type).
        update: ProgressRecord,
    },
}

/// An outbound frame: the message plus the send timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// The message payload, flattened into the frame.
    #[serde(flatten)]
    pub message: OutboundMessage,
    /// When the hub sent the frame.
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// Stamps a message with the current time.
    #[must_use]
    pub fn now(message: OutboundMessage) -> Self {
        Self {
            message,
            timestamp: Utc::now(),
        }
    }
}
