//! Task board hub server.
//!
//! Reads `PORT`, `BOARD_HOST` and `BOARD_DATA_FILE` from the environment,
//! logs through `env_logger` (`RUST_LOG`), and serves the board over
//! WebSocket until the listener fails.

use log::info;
use taskboard_sync::{BoardServer, ServerConfig, ServerError};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::init();

    let config = ServerConfig::from_env()?;
    match &config.storage_path {
        Some(path) => info!("Snapshots go to {}", path.display()),
        None => info!("No snapshot file configured, running in memory"),
    }

    let server = BoardServer::new(config);
    server.run().await
}
