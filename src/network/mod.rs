//! Network event reconciliation and interception.
//!
//! This module turns the weakly-ordered Network/Fetch event firehose of one
//! session into a clean per-request lifecycle:
//!
//! ```text
//! request ──► redirects... ──► response ──► finished | failed
//! ```
//!
//! The protocol offers no ordering between paired events —
//! `requestWillBeSent` vs `requestPaused`, `responseReceived` vs its
//! `responseReceivedExtraInfo` — so everything is reconciled through
//! per-request-id buffers rather than arrival order.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `event_manager` | Per-request-id pairing buffers |
//! | `manager` | Event→lifecycle state machine |
//! | `request` | Per-attempt request object and interception arbitration |
//! | `response` | Response object with lazily-loaded body |

// ============================================================================
// Submodules
// ============================================================================

/// Per-request-id pairing buffers.
pub mod event_manager;

/// Event→lifecycle state machine.
pub mod manager;

/// Per-attempt request object and interception arbitration.
pub mod request;

/// Response object with lazily-loaded body.
pub mod response;

// ============================================================================
// Re-exports
// ============================================================================

pub use event_manager::{NetworkEventManager, QueuedEventGroup, QueuedRedirectInfo};
pub use manager::{Credentials, NetworkManager};
pub use request::{
    ContinueOverrides, FulfillResponse, HttpRequest, InterceptResolution,
    InterceptResolutionAction,
};
pub use response::{HttpResponse, RemoteAddress};
