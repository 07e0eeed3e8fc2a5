//! JSON wire protocol.
//!
//! Every frame in either direction is one text message:
//! ```text
//! { "type": "<TYPE_TAG>", "payload": <kind-specific> }
//! ```
//!
//! Inbound frames are decoded in two steps: the envelope first, then a
//! typed [`Command`] view of the payload. The raw payload is kept so the
//! router can rebroadcast exactly what the client sent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::board::{Board, Comment, Task, TaskId, TaskStatus, TeamMember};

/// Client → server message tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessageKind {
    AddTask,
    UpdateTask,
    DeleteTask,
    MoveTask,
    AddComment,
    UpdateTeamMember,
    UserActivity,
}

/// Inbound envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: ClientMessageKind,
    #[serde(default)]
    pub payload: Value,
}

/// Typed view of an inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddTask(Task),
    UpdateTask(Task),
    DeleteTask { id: TaskId },
    MoveTask { id: TaskId, status: TaskStatus },
    AddComment { task_id: TaskId, comment: Comment },
    UpdateTeamMember(TeamMember),
    UserActivity,
}

#[derive(Deserialize)]
struct TaskRef {
    id: TaskId,
}

#[derive(Deserialize)]
struct MoveTaskPayload {
    id: TaskId,
    status: TaskStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCommentPayload {
    task_id: TaskId,
    comment: Comment,
}

impl ClientMessage {
    pub fn new(kind: ClientMessageKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// Decode an inbound text frame.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::Malformed)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Check the payload has the structure this kind needs.
    pub fn command(&self) -> Result<Command, ProtocolError> {
        let payload = || self.payload.clone();
        let command = match self.kind {
            ClientMessageKind::AddTask => Command::AddTask(serde_json::from_value(payload())?),
            ClientMessageKind::UpdateTask => {
                Command::UpdateTask(serde_json::from_value(payload())?)
            }
            ClientMessageKind::DeleteTask => {
                let TaskRef { id } = serde_json::from_value(payload())?;
                Command::DeleteTask { id }
            }
            ClientMessageKind::MoveTask => {
                let MoveTaskPayload { id, status } = serde_json::from_value(payload())?;
                Command::MoveTask { id, status }
            }
            ClientMessageKind::AddComment => {
                let AddCommentPayload { task_id, comment } = serde_json::from_value(payload())?;
                Command::AddComment { task_id, comment }
            }
            ClientMessageKind::UpdateTeamMember => {
                Command::UpdateTeamMember(serde_json::from_value(payload())?)
            }
            ClientMessageKind::UserActivity => Command::UserActivity,
        };
        Ok(command)
    }
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Full board, sent once on connect
    Init(Board),
    TaskAdded(Value),
    TaskUpdated(Value),
    TaskDeleted(Value),
    TaskMoved(Value),
    CommentAdded(Value),
    /// Full team member list after an upsert
    TeamUpdated(Vec<TeamMember>),
    UserActivity(Value),
}

impl ServerMessage {
    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init(_) => "INIT",
            Self::TaskAdded(_) => "TASK_ADDED",
            Self::TaskUpdated(_) => "TASK_UPDATED",
            Self::TaskDeleted(_) => "TASK_DELETED",
            Self::TaskMoved(_) => "TASK_MOVED",
            Self::CommentAdded(_) => "COMMENT_ADDED",
            Self::TeamUpdated(_) => "TEAM_UPDATED",
            Self::UserActivity(_) => "USER_ACTIVITY",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::Malformed)
    }
}

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Failed to encode message: {0}")]
    Encode(serde_json::Error),
}
