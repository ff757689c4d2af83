use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{self, error::ProtocolError, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::protocol::{RigRequest, RigResponse};
use crate::TransportError;

/// A persistent, request/response connection to the controller.
///
/// Implementations carry at most one request at a time.
#[async_trait]
pub trait Transport: Send {
    /// Establishes a fresh connection, replacing any previous one.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Sends one request and waits for its response.
    async fn request(&mut self, request: &RigRequest) -> Result<RigResponse, TransportError>;

    /// Drops the current connection, if any. Never fails.
    async fn close(&mut self);
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Transport`] over a WebSocket, as spoken by VTube Studio.
pub struct WebSocketTransport {
    url: String,
    socket: Option<Socket>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url)
            .field("connected", &self.socket.is_some())
            .finish()
    }
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            socket: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.close().await;
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(classify)?;
        tracing::debug!(url = %self.url, "websocket connected");
        self.socket = Some(socket);
        Ok(())
    }

    async fn request(&mut self, request: &RigRequest) -> Result<RigResponse, TransportError> {
        let socket = self.socket.as_mut().ok_or(TransportError::Closed)?;
        let payload = request
            .to_json()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        socket.send(Message::Text(payload)).await.map_err(classify)?;

        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    return RigResponse::from_json(&text)
                        .map_err(|e| TransportError::Other(e.to_string()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes);
                    return RigResponse::from_json(&text)
                        .map_err(|e| TransportError::Other(e.to_string()));
                }
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(classify(err)),
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(err) = socket.close(None).await {
                tracing::debug!(error = %err, "ignoring error while closing stale socket");
            }
        }
    }
}

/// Maps websocket failures onto the closed/other split.
fn classify(err: tungstenite::Error) -> TransportError {
    use std::io::ErrorKind;

    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::Closed
        }
        tungstenite::Error::Io(io)
            if matches!(
                io.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
            ) =>
        {
            TransportError::Closed
        }
        other => TransportError::Other(other.to_string()),
    }
}
