//! The transport trait.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;

// ============================================================================
// TransportLink
// ============================================================================

/// A bidirectional text-message channel.
///
/// The connection event loop is the sole owner of a link: it interleaves
/// `send` and `receive` from a single task, so implementations never see
/// concurrent calls.
///
/// Message boundaries must be preserved — one `send` on one end is one
/// `receive` on the other. Implementations that split oversized frames to
/// fit a platform limit must reassemble them before delivery.
#[async_trait]
pub trait TransportLink: Send {
    /// Sends one text frame.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the frame cannot be written; the
    /// connection treats any send error as fatal.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Receives the next text frame.
    ///
    /// Returns `None` once the channel is closed; the connection treats
    /// that as remote disconnect.
    async fn receive(&mut self) -> Option<String>;

    /// Closes the channel.
    ///
    /// Must be idempotent.
    async fn close(&mut self);
}
