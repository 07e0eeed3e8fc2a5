//! Inbound message dispatch.
//!
//! ```text
//! raw text ─► ClientMessage ─► Command
//!                                 │
//!                     store.transact()  (serialization point)
//!                                 │
//!              load ─► mutate ─► replace ─► broadcast
//! ```
//!
//! Delivery policy: every mutation event is broadcast to all connections,
//! the sender included, exactly once. `USER_ACTIVITY` goes to everyone
//! except the sender. There is no separate acknowledgment frame.
//!
//! Requests that reference a task that does not exist are dropped without
//! a broadcast, a snapshot, or a reply. Malformed frames are logged and
//! dropped; the connection stays open.

use std::sync::Arc;

use crate::board::Board;
use crate::protocol::{ClientMessage, Command, ServerMessage};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::store::DocumentStore;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The event was broadcast.
    Delivered {
        event: &'static str,
        recipients: usize,
    },
    /// The message was valid but referenced nothing; no state change.
    Unchanged,
    /// The message could not be parsed.
    Dropped,
}

/// Applies inbound messages to the board and fans out the results.
#[derive(Clone)]
pub struct Router {
    store: Arc<DocumentStore>,
    registry: Arc<ConnectionRegistry>,
}

impl Router {
    pub fn new(store: Arc<DocumentStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle one raw text frame from `sender`.
    pub async fn handle(&self, sender: ConnectionId, raw: &str) -> Dispatch {
        let message = match ClientMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping message from {sender}: {e}");
                return Dispatch::Dropped;
            }
        };
        let command = match message.command() {
            Ok(command) => command,
            Err(e) => {
                log::warn!("Dropping {:?} from {sender}: {e}", message.kind);
                return Dispatch::Dropped;
            }
        };

        let dispatch = self.apply(sender, command, message.payload).await;
        match &dispatch {
            Dispatch::Delivered { event, recipients } => {
                log::debug!("{sender}: {:?} -> {event} to {recipients}", message.kind);
            }
            Dispatch::Unchanged => {
                log::debug!("{sender}: {:?} matched nothing, ignored", message.kind);
            }
            Dispatch::Dropped => {}
        }
        dispatch
    }

    async fn apply(
        &self,
        sender: ConnectionId,
        command: Command,
        payload: serde_json::Value,
    ) -> Dispatch {
        // Presence never touches the board
        if let Command::UserActivity = command {
            let event = ServerMessage::UserActivity(payload);
            return self.deliver(event, Some(sender)).await;
        }

        // Held until the broadcast is queued so events go out in commit order
        let mut txn = self.store.transact().await;
        let mut board = txn.load();

        let Some(event) = mutate(&mut board, command, payload) else {
            return Dispatch::Unchanged;
        };

        txn.replace(board);
        self.deliver(event, None).await
    }

    async fn deliver(&self, event: ServerMessage, exclude: Option<ConnectionId>) -> Dispatch {
        let recipients = self.registry.broadcast(&event, exclude).await;
        Dispatch::Delivered {
            event: event.kind(),
            recipients,
        }
    }
}

/// Apply `command` to `board` and return the event to broadcast, or `None`
/// when the command referenced a missing task.
fn mutate(board: &mut Board, command: Command, payload: serde_json::Value) -> Option<ServerMessage> {
    match command {
        Command::AddTask(task) => board
            .add_task(task)
            .then(|| ServerMessage::TaskAdded(payload)),
        Command::UpdateTask(task) => board
            .update_task(task)
            .then(|| ServerMessage::TaskUpdated(payload)),
        Command::DeleteTask { id } => {
            board.delete_task(&id);
            Some(ServerMessage::TaskDeleted(payload))
        }
        Command::MoveTask { id, status } => board
            .move_task(&id, status)
            .then(|| ServerMessage::TaskMoved(payload)),
        Command::AddComment { task_id, comment } => board
            .add_comment(&task_id, comment)
            .then(|| ServerMessage::CommentAdded(payload)),
        Command::UpdateTeamMember(member) => {
            board.upsert_team_member(member);
            Some(ServerMessage::TeamUpdated(board.team_members.clone()))
        }
        Command::UserActivity => Some(ServerMessage::UserActivity(payload)),
    }
}
