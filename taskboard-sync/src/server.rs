//! WebSocket server for the shared board.
//!
//! Architecture:
//! ```text
//! Client A ──┐                       ┌── DocumentStore ── snapshot file
//!            ├── socket task ── Router┤
//! Client B ──┘        ▲              └── ConnectionRegistry
//!                     │                        │
//!                     └──── outbound queue ◄───┘
//! ```
//!
//! One Tokio task per connection. The task registers the connection under a
//! store transaction (so its `INIT` cannot miss a concurrent mutation), then
//! multiplexes inbound frames into the router and its outbound queue into
//! the socket until either side closes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::durability::{Durability, FileDurability, MemoryOnly};
use crate::registry::{Connection, ConnectionRegistry};
use crate::router::Router;
use crate::store::DocumentStore;

/// Port used when `PORT` is not set.
pub const DEFAULT_PORT: u16 = 3000;

/// Snapshot file used when `BOARD_DATA_FILE` is not set.
pub const DEFAULT_DATA_FILE: &str = "data.json";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Snapshot file (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            storage_path: None,
        }
    }
}

impl ServerConfig {
    /// Build a config from `PORT`, `BOARD_HOST` and `BOARD_DATA_FILE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup("PORT") {
            Some(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            _ => DEFAULT_PORT,
        };
        let host = lookup("BOARD_HOST")
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let storage_path = match lookup("BOARD_DATA_FILE") {
            Some(path) if path.trim().is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_DATA_FILE)),
        };

        Ok(Self {
            bind_addr: format!("{host}:{port}"),
            storage_path,
            ..Self::default()
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value: {0:?}")]
    InvalidPort(String),
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub total_messages: u64,
    pub total_bytes: u64,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    total_messages: AtomicU64,
    total_bytes: AtomicU64,
}

/// The board sync server.
pub struct BoardServer {
    config: ServerConfig,
    store: Arc<DocumentStore>,
    registry: Arc<ConnectionRegistry>,
    router: Router,
    stats: Arc<AtomicServerStats>,
}

impl BoardServer {
    /// Create a server. Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let durability: Arc<dyn Durability> = match &config.storage_path {
            Some(path) => Arc::new(FileDurability::new(path)),
            None => Arc::new(MemoryOnly),
        };
        let store = Arc::new(DocumentStore::new(durability));
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Router::new(store.clone(), registry.clone());

        Self {
            config,
            store,
            registry,
            router,
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Create with snapshots in the given file.
    pub fn with_storage(bind_addr: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(ServerConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..ServerConfig::default()
        })
    }

    /// Load the board from storage ahead of the first connection.
    ///
    /// Returns the number of tasks on the board.
    pub async fn recover(&self) -> usize {
        self.store.load().await.tasks.len()
    }

    /// Start listening for WebSocket connections.
    ///
    /// Runs the accept loop until the listener fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let tasks = self.recover().await;
        log::info!(
            "Board server listening on {} ({tasks} tasks loaded)",
            listener.local_addr()?
        );

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let router = self.router.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, router, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        router: Router,
        stats: Arc<AtomicServerStats>,
    ) -> Result<(), ServerError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        stats.total_connections.fetch_add(1, Ordering::Relaxed);

        let (connection, mut outbound) = Connection::new(Some(addr));
        let id = connection.id();
        {
            let txn = router.store().transact().await;
            router.registry().register(connection, &txn.current()).await;
        }

        let result: Result<(), ServerError> = loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            stats.total_messages.fetch_add(1, Ordering::Relaxed);
                            stats.total_bytes.fetch_add(text.len() as u64, Ordering::Relaxed);
                            router.handle(id, text.as_str()).await;
                        }

                        Some(Ok(Message::Binary(data))) => {
                            stats.total_messages.fetch_add(1, Ordering::Relaxed);
                            stats.total_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
                            match std::str::from_utf8(&data) {
                                Ok(text) => {
                                    router.handle(id, text).await;
                                }
                                Err(_) => log::warn!("Dropping non-UTF-8 binary frame from {addr}"),
                            }
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                break Err(e.into());
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break Ok(());
                        }

                        Some(Err(e)) => {
                            break Err(e.into());
                        }

                        Some(Ok(_)) => {}
                    }
                }

                frame = outbound.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = ws_sender.send(Message::text(frame.to_string())).await {
                                break Err(e.into());
                            }
                        }
                        // The registry dropped this connection
                        None => {
                            log::info!("Connection {id} from {addr} dropped by registry");
                            let _ = ws_sender.send(Message::Close(None)).await;
                            break Ok(());
                        }
                    }
                }
            }
        };

        router.registry().unregister(id).await;
        result
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.registry.len().await,
            total_messages: self.stats.total_messages.load(Ordering::Relaxed),
            total_bytes: self.stats.total_bytes.load(Ordering::Relaxed),
        }
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_config_from_empty_env() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.storage_path, Some(PathBuf::from("data.json")));
    }

    #[test]
    fn test_config_from_env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("BOARD_HOST", "127.0.0.1"),
            ("BOARD_DATA_FILE", "/tmp/board.json"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.storage_path, Some(PathBuf::from("/tmp/board.json")));
    }

    #[test]
    fn test_config_empty_data_file_means_memory_only() {
        let config = ServerConfig::from_lookup(lookup(&[("BOARD_DATA_FILE", "")])).unwrap();
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_config_invalid_port() {
        let err = ServerConfig::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(p) if p == "eighty"));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = BoardServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:3000");
        assert_eq!(server.recover().await, 0);
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = BoardServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_server_recovery_with_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(
            &path,
            r#"{"tasks":[{"id":"a","status":"todo"},{"id":"b","status":"done"}],"teamMembers":[]}"#,
        )
        .unwrap();

        let server = BoardServer::with_storage("127.0.0.1:0", &path);
        assert_eq!(server.recover().await, 2);
    }
}
