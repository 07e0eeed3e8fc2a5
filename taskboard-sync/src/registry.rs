//! Live connection set and fan-out.
//!
//! Each connection owns an unbounded outbound queue of pre-encoded frames.
//! The socket task on the other end drains it into the WebSocket, so
//! `broadcast` never awaits a socket:
//!
//! ```text
//!                                ┌──► [queue A] ──► socket task A
//! broadcast(msg) ── encode once ─┼──► [queue B] ──► socket task B
//!                                └──► [queue C] ──► socket task C
//! ```
//!
//! Deliveries are independent. A connection whose queue is closed (socket
//! gone) is unregistered. A client that reads slowly only builds up a
//! backlog; it stays registered and sees every event in order.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::board::Board;
use crate::protocol::ServerMessage;

/// An encoded frame, shared between every recipient of a broadcast.
pub type Frame = Arc<str>;

/// Unique id of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Why a frame could not be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Connection closed")]
    Closed,
}

/// One client connection as seen by the registry.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    outbound: mpsc::UnboundedSender<Frame>,
}

impl Connection {
    /// Create a connection and its outbound queue.
    ///
    /// The receiver goes to whoever writes to the socket.
    pub fn new(peer_addr: Option<SocketAddr>) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let conn = Self {
            id: ConnectionId::new(),
            peer_addr,
            outbound,
        };
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Whether the socket side is still draining the queue.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    fn deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.outbound.send(frame).map_err(|_| DeliveryError::Closed)
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub deliveries: u64,
    pub deliveries_dropped: u64,
    pub active_connections: usize,
}

struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    deliveries: AtomicU64,
    deliveries_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            deliveries_dropped: AtomicU64::new(0),
        }
    }
}

/// Registry of every live connection.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    stats: AtomicBroadcastStats,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            stats: AtomicBroadcastStats::new(),
        }
    }

    /// Add a connection and send it the board as `INIT`.
    ///
    /// Callers hold a store transaction while registering so no mutation
    /// can slip in between the snapshot and the first broadcast.
    pub async fn register(&self, connection: Connection, snapshot: &Board) {
        let id = connection.id();
        let peer = connection.peer_addr();
        self.connections.write().await.insert(id, connection);
        log::info!("Connection {id} registered ({peer:?})");

        let init = ServerMessage::Init(snapshot.clone());
        if !self.send_to(id, &init).await {
            log::warn!("Connection {id} could not receive INIT");
        }
    }

    /// Remove a connection. Safe to call more than once.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.write().await.remove(&id);
        if removed.is_some() {
            log::info!("Connection {id} unregistered");
        }
        removed
    }

    /// Deliver `message` to every open connection except `exclude`.
    ///
    /// The message is encoded once. Returns how many connections accepted
    /// it. Connections that fail are unregistered afterwards.
    pub async fn broadcast(&self, message: &ServerMessage, exclude: Option<ConnectionId>) -> usize {
        let frame: Frame = match message.encode() {
            Ok(json) => json.into(),
            Err(e) => {
                log::error!("Failed to encode {}: {e}", message.kind());
                return 0;
            }
        };
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let connections = self.connections.read().await;
            for conn in connections.values() {
                if Some(conn.id()) == exclude {
                    continue;
                }
                if !conn.is_open() {
                    failed.push((conn.id(), DeliveryError::Closed));
                    continue;
                }
                match conn.deliver(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => failed.push((conn.id(), e)),
                }
            }
        }

        self.stats.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        log::debug!("Broadcast {} to {delivered} connections", message.kind());

        if !failed.is_empty() {
            self.drop_failed(failed).await;
        }
        delivered
    }

    /// Deliver `message` to a single connection.
    pub async fn send_to(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        let frame: Frame = match message.encode() {
            Ok(json) => json.into(),
            Err(e) => {
                log::error!("Failed to encode {}: {e}", message.kind());
                return false;
            }
        };

        let result = {
            let connections = self.connections.read().await;
            match connections.get(&id) {
                Some(conn) => conn.deliver(frame),
                None => return false,
            }
        };

        match result {
            Ok(()) => {
                self.stats.deliveries.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.drop_failed(vec![(id, e)]).await;
                false
            }
        }
    }

    async fn drop_failed(&self, failed: Vec<(ConnectionId, DeliveryError)>) {
        self.stats
            .deliveries_dropped
            .fetch_add(failed.len() as u64, Ordering::Relaxed);

        let mut connections = self.connections.write().await;
        for (id, reason) in failed {
            if connections.remove(&id).is_some() {
                log::warn!("Dropping connection {id}: {reason}");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Lock-free counters plus the current connection count.
    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            deliveries_dropped: self.stats.deliveries_dropped.load(Ordering::Relaxed),
            active_connections: self.len().await,
        }
    }
}
