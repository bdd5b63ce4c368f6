//! WebSocket transport implementation.
//!
//! Wraps a tokio-tungstenite stream behind [`TransportLink`]. Binary, ping
//! and pong frames are ignored; a close frame or stream error ends the
//! channel.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error};

use crate::error::Result;
use crate::transport::TransportLink;

// ============================================================================
// WebSocketTransport
// ============================================================================

/// WebSocket channel to a DevTools endpoint.
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    /// Connects to a DevTools WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`](crate::Error::WebSocket) if the
    /// handshake fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _) = connect_async(url).await?;
        debug!(url, "WebSocket transport connected");
        Ok(Self { stream })
    }
}

#[async_trait]
impl TransportLink for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Option<String> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(text.to_string()),

                Ok(Message::Close(_)) => {
                    debug!("WebSocket closed by remote");
                    return None;
                }

                // Ignore Binary, Ping, Pong, Frame.
                Ok(_) => {}

                Err(e) => {
                    error!(error = %e, "WebSocket error");
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
