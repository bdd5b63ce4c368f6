//! Chrome DevTools Protocol client.
//!
//! This library multiplexes many logical sessions (browsing targets) over
//! one persistent WebSocket and turns the raw, weakly-ordered network
//! event stream into a clean per-request lifecycle.
//!
//! # Architecture
//!
//! The client follows the protocol's flattened-session model:
//!
//! - **[`Connection`]**: owns the transport; correlates replies to pending
//!   calls by monotonic id; creates/destroys sessions on attach/detach
//!   events; demultiplexes every incoming frame.
//! - **[`CdpSession`]**: a sub-channel scoped to one target, sharing the
//!   connection's socket and id space.
//! - **[`NetworkManager`]**: reconciles out-of-order Network/Fetch events
//!   into ordered `Request` → `Response` → `RequestFinished`/
//!   `RequestFailed` emissions and arbitrates cooperative request
//!   interception.
//!
//! # Quick Start
//!
//! ```no_run
//! use chrome_devtools::{Connection, NetworkManager, Result};
//! use chrome_devtools::identifiers::TargetId;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = Connection::connect("ws://127.0.0.1:9222/devtools/browser/...").await?;
//!     let session = connection.create_session(&TargetId::new("TARGET")).await?;
//!
//!     let network = NetworkManager::new(session, false);
//!     network.initialize().await?;
//!     network.on_response(|response| async move {
//!         println!("{} {}", response.status(), response.url());
//!     });
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | [`Connection`] and [`CdpSession`] correlation layer |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`network`] | Network lifecycle reconciliation and interception |
//! | [`protocol`] | Wire message and event payload types |
//! | [`transport`] | Transport trait and WebSocket implementation |
//!
//! # Ordering Guarantees
//!
//! - No `Response`/`RequestFinished`/`RequestFailed` before the matching
//!   `Request` emission
//! - A redirect leg's `Response` and `RequestFinished` strictly precede
//!   the next leg's `Request`
//! - Interception listeners are awaited in registration order, never
//!   completion order

// ============================================================================
// Modules
// ============================================================================

/// Connection and session correlation layer.
///
/// - [`Connection`] - owns the transport and the pending-call table
/// - [`CdpSession`] - flattened sub-channel scoped to one target
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for protocol entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Network lifecycle reconciliation and request interception.
pub mod network;

/// Wire message and event payload types.
pub mod protocol;

/// Transport trait and WebSocket implementation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{CdpSession, Connection, ConnectionEvent};

// Error types
pub use error::{Error, Result};

// Network types
pub use network::{
    ContinueOverrides, Credentials, FulfillResponse, HttpRequest, HttpResponse,
    InterceptResolution, InterceptResolutionAction, NetworkEventManager, NetworkManager,
    RemoteAddress,
};

// Protocol types
pub use protocol::{CdpEvent, ParsedEvent};

// Transport types
pub use transport::{TransportLink, WebSocketTransport};
