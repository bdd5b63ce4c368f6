//! Error types for the DevTools client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use chrome_devtools::{Result, Error};
//!
//! async fn example(session: &CdpSession) -> Result<()> {
//!     session.send("Network.enable", json!({})).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Transport-fatal | [`Error::TargetClosed`], [`Error::SessionClosed`], [`Error::Connection`] |
//! | Protocol | [`Error::Protocol`], [`Error::InvalidMessage`] |
//! | Contract violation | [`Error::InterceptionNotEnabled`], [`Error::RequestAlreadyHandled`], [`Error::InvalidArgument`] |
//! | Body access | [`Error::BodyUnavailable`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |
//!
//! Transport-fatal errors carry a fixed message shape so callers can rely
//! on them: a closed connection rejects with `Protocol error (method):
//! Target closed.` and a closed session with `Protocol error (method):
//! Session closed.`.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Transport-Fatal Errors
    // ========================================================================
    /// WebSocket connection failed.
    ///
    /// Returned when the connection cannot be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection closed; the command can never receive a reply.
    ///
    /// Every outstanding and future call on a closed connection fails with
    /// this error. Never retried at this layer.
    #[error("Protocol error ({method}): Target closed.")]
    TargetClosed {
        /// The command that was being sent.
        method: String,
    },

    /// Session detached; the command can never receive a reply.
    #[error("Protocol error ({method}): Session closed. Most likely the {target_type} has been closed.")]
    SessionClosed {
        /// The command that was being sent.
        method: String,
        /// Type of the target the session was attached to.
        target_type: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The browser replied to a command with an error.
    ///
    /// Carries the original server message, with the optional `data`
    /// payload appended. Always propagated, never auto-retried.
    #[error("Protocol error ({method}): {message}")]
    Protocol {
        /// The command that failed.
        method: String,
        /// Server-provided error message, including any detail payload.
        message: String,
        /// Optional server-provided detail payload, verbatim.
        data: Option<String>,
    },

    /// An incoming frame could not be interpreted as a protocol message.
    #[error("Invalid protocol message: {message}")]
    InvalidMessage {
        /// Description of the malformed frame.
        message: String,
    },

    // ========================================================================
    // Contract Violations
    // ========================================================================
    /// An interception operation was attempted without interception enabled.
    ///
    /// Indicates a caller bug; fails loudly and immediately.
    #[error("Request interception is not enabled")]
    InterceptionNotEnabled,

    /// A continue/respond/abort raced with an already-dispatched decision.
    #[error("Request is already handled")]
    RequestAlreadyHandled,

    /// Invalid argument in a command or interception call.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Body Access Errors
    // ========================================================================
    /// The response body cannot be retrieved.
    ///
    /// Distinct from a successful empty body: redirect responses, preflight
    /// requests, and failed loads reject with this variant.
    #[error("Response body is unavailable: {message}")]
    BodyUnavailable {
        /// Why the body cannot be loaded.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a target-closed error for a command.
    #[inline]
    pub fn target_closed(method: impl Into<String>) -> Self {
        Self::TargetClosed {
            method: method.into(),
        }
    }

    /// Creates a session-closed error for a command.
    #[inline]
    pub fn session_closed(method: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self::SessionClosed {
            method: method.into(),
            target_type: target_type.into(),
        }
    }

    /// Creates a protocol error from a server error reply.
    ///
    /// The `data` payload, when present, is appended to the message the
    /// way the browser's own clients render it.
    #[inline]
    pub fn protocol(
        method: impl Into<String>,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let data = data.map(|d| d.to_string());
        let mut message = message.into();
        if let Some(data) = &data {
            message.push(' ');
            message.push_str(data);
        }
        Self::Protocol {
            method: method.into(),
            message,
            data,
        }
    }

    /// Creates an invalid message error.
    #[inline]
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a body-unavailable error.
    #[inline]
    pub fn body_unavailable(message: impl Into<String>) -> Self {
        Self::BodyUnavailable {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error means the connection or session is gone.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::TargetClosed { .. } | Self::SessionClosed { .. } | Self::Connection { .. }
        )
    }

    /// Returns `true` if this is a server-reported protocol error.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// Returns the server message of a protocol error, if any.
    #[inline]
    #[must_use]
    pub fn protocol_message(&self) -> Option<&str> {
        match self {
            Self::Protocol { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Returns `true` if this error is an expected close/navigation race.
    ///
    /// Interception decisions and body fetches can lose a race against
    /// target shutdown or navigation. Those failures are logged and
    /// swallowed rather than surfaced to callers.
    #[must_use]
    pub fn is_benign_interception_race(&self) -> bool {
        match self {
            Self::TargetClosed { .. } | Self::SessionClosed { .. } => true,
            Self::Protocol { message, .. } => {
                message.contains("Invalid InterceptionId")
                    || message.contains("Target closed")
                    || message.contains("Session closed")
                    || message.contains("Session with given id not found")
            }
            _ => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
