//! # taskboard-sync - Real-time sync hub for a shared task board
//!
//! Every client holds a WebSocket to the hub. Each mutation a client sends
//! is applied to the one authoritative board and fanned out so all views
//! converge.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket       ┌─────────────┐
//! │ BoardClient │ ◄─────────────────► │ BoardServer │
//! │ (per user)  │     JSON frames     │ (central)   │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                     ┌──────┴──────┐
//!                                     │   Router    │
//!                                     └──┬───────┬──┘
//!                                        │       │
//!                          ┌─────────────┴─┐   ┌─┴──────────────────┐
//!                          │ DocumentStore │   │ ConnectionRegistry │
//!                          │ (board)       │   │ (fan-out)          │
//!                          └───────┬───────┘   └────────────────────┘
//!                                  │
//!                          ┌───────┴───────┐
//!                          │  Durability   │
//!                          │ (snapshots)   │
//!                          └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`board`]: Board, tasks, team members and their mutation helpers
//! - [`durability`]: Best-effort JSON snapshots
//! - [`store`]: The resident board and its transaction
//! - [`protocol`]: `{type, payload}` wire messages
//! - [`registry`]: Live connections and broadcast
//! - [`router`]: Inbound message dispatch
//! - [`server`]: WebSocket server
//! - [`client`]: WebSocket client

pub mod board;
pub mod durability;
pub mod store;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use board::{Board, Comment, Task, TaskId, TaskStatus, TeamMember};
pub use client::{BoardClient, ClientError};
pub use durability::{Durability, DurabilityError, FileDurability, MemoryOnly};
pub use protocol::{ClientMessage, ClientMessageKind, Command, ProtocolError, ServerMessage};
pub use registry::{
    BroadcastStats, Connection, ConnectionId, ConnectionRegistry, DeliveryError, Frame,
};
pub use router::{Dispatch, Router};
pub use server::{BoardServer, ConfigError, ServerConfig, ServerError, ServerStats};
pub use store::{DocumentStore, StoreStats, Transaction};
