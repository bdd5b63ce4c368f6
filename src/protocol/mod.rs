//! Protocol message types.
//!
//! This module defines the JSON message format exchanged with the browser
//! over the DevTools WebSocket endpoint.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | [`CdpCall`] | Local → Browser | Command with correlation id |
//! | Reply | Browser → Local | `result` or `error` for a sent id |
//! | [`CdpEvent`] | Browser → Local | Unsolicited notification |
//!
//! Every message may carry a `sessionId` routing it to one flattened
//! session instead of the root connection.
//!
//! # Method Naming
//!
//! Methods follow `Domain.methodName` format:
//!
//! - `Target.attachToTarget`
//! - `Network.enable`
//! - `Fetch.continueRequest`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | Call, reply, and error-payload framing |
//! | `event` | Raw event plus the parsed closed union |
//! | `network` | Network/Fetch domain payload types |
//! | `target` | Target domain payload types |

// ============================================================================
// Submodules
// ============================================================================

/// Call, reply, and error-payload framing.
pub mod message;

/// Event message types.
pub mod event;

/// Network and Fetch domain payload types.
pub mod network;

/// Target domain payload types.
pub mod target;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{CdpEvent, ParsedEvent};
pub use message::{CdpCall, CdpErrorPayload, CdpMessage};
pub use network::{
    AuthChallenge, AuthRequiredEvent, ErrorReason, HeaderEntry, LoadingFailedEvent,
    LoadingFinishedEvent, RequestPausedEvent, RequestPayload, RequestServedFromCacheEvent,
    RequestWillBeSentEvent, ResponsePayload, ResponseReceivedEvent,
    ResponseReceivedExtraInfoEvent, SecurityDetails, status_text,
};
pub use target::{AttachedToTargetParams, DetachedFromTargetParams, TargetInfo};
