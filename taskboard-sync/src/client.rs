//! WebSocket client for the board hub.
//!
//! Thin wrapper over a `tokio-tungstenite` stream that speaks the JSON
//! protocol: send [`ClientMessage`]s, receive [`ServerMessage`]s. Used by
//! the integration tests and handy for scripting against a running hub.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::protocol::{ClientMessage, ClientMessageKind, ProtocolError, ServerMessage};

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Connection closed")]
    Closed,
}

/// A connected board client.
pub struct BoardClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl BoardClient {
    /// Connect to a hub, e.g. `ws://127.0.0.1:3000`.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        log::debug!("Connected to {url}");
        Ok(Self { ws })
    }

    /// Send a typed message.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let json = message.encode()?;
        self.ws.send(Message::text(json)).await?;
        Ok(())
    }

    /// Shorthand for `send(&ClientMessage::new(kind, payload))`.
    pub async fn send_kind(
        &mut self,
        kind: ClientMessageKind,
        payload: Value,
    ) -> Result<(), ClientError> {
        self.send(&ClientMessage::new(kind, payload)).await
    }

    /// Send a raw text frame, bypassing encoding.
    pub async fn send_raw(&mut self, raw: impl Into<String>) -> Result<(), ClientError> {
        self.ws.send(Message::text(raw.into())).await?;
        Ok(())
    }

    /// Wait for the next server message, skipping control frames.
    pub async fn recv(&mut self) -> Result<ServerMessage, ClientError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(ServerMessage::decode(text.as_str())?),
                Some(Ok(Message::Close(_))) | None => return Err(ClientError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.ws.close(None).await?;
        Ok(())
    }
}
