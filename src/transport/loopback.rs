//! In-process loopback transport for tests.
//!
//! The connection end is a [`LoopbackTransport`]; the test holds a
//! [`LoopbackRemote`] acting as the browser: it inspects frames the client
//! sent and injects frames for the client to receive.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::transport::TransportLink;

// ============================================================================
// Constructors
// ============================================================================

/// Creates a connected loopback pair.
pub(crate) fn pair() -> (LoopbackTransport, LoopbackRemote) {
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

    (
        LoopbackTransport {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        },
        LoopbackRemote {
            sent: outgoing_rx,
            inject: incoming_tx,
        },
    )
}

// ============================================================================
// LoopbackTransport
// ============================================================================

/// The connection-side end of a loopback pair.
pub(crate) struct LoopbackTransport {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl TransportLink for LoopbackTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.outgoing
            .send(text)
            .map_err(|_| Error::connection("loopback remote dropped"))
    }

    async fn receive(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

// ============================================================================
// LoopbackRemote
// ============================================================================

/// The browser-side end of a loopback pair.
pub(crate) struct LoopbackRemote {
    sent: mpsc::UnboundedReceiver<String>,
    inject: mpsc::UnboundedSender<String>,
}

impl LoopbackRemote {
    /// Injects a frame for the client to receive.
    pub(crate) fn inject(&self, text: impl Into<String>) {
        self.inject.send(text.into()).expect("client dropped");
    }

    /// Injects a JSON value as a frame.
    pub(crate) fn inject_json(&self, value: serde_json::Value) {
        self.inject(value.to_string());
    }

    /// Waits for the next frame the client sent.
    ///
    /// # Panics
    ///
    /// Panics if no frame arrives within one second.
    pub(crate) async fn next_sent(&mut self) -> serde_json::Value {
        let text = timeout(Duration::from_secs(1), self.sent.recv())
            .await
            .expect("timed out waiting for a sent frame")
            .expect("client closed");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Returns the next sent frame without waiting, if any.
    pub(crate) fn try_next_sent(&mut self) -> Option<serde_json::Value> {
        self.sent
            .try_recv()
            .ok()
            .map(|text| serde_json::from_str(&text).expect("client sent invalid JSON"))
    }

    /// Simulates remote disconnect.
    pub(crate) fn disconnect(self) {
        drop(self.inject);
    }
}
