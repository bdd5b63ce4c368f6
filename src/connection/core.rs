//! Connection: correlation, demultiplexing, lifecycle.
//!
//! The connection owns the transport and spawns one event-loop task that
//! handles:
//!
//! - Incoming frames (replies, events, session traffic)
//! - Outgoing commands queued by the API
//! - Session creation/destruction on `Target.attachedToTarget` /
//!   `Target.detachedFromTarget`
//!
//! All dispatch runs inside the loop task, one frame at a time. A reply
//! settles the pending call whose id matches; everything else is routed to
//! a session or re-emitted to subscribers.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use crate::connection::CdpSession;
use crate::error::{Error, Result};
use crate::identifiers::{CallId, CallIdGenerator, SessionId, TargetId};
use crate::protocol::{AttachedToTargetParams, CdpCall, CdpEvent, CdpMessage, DetachedFromTargetParams};
use crate::transport::{TransportLink, WebSocketTransport};

// ============================================================================
// Types
// ============================================================================

/// Internal commands for the event loop.
enum LoopCommand {
    /// Write one serialized frame.
    Send(String),
    /// Close the transport and exit.
    Shutdown,
}

/// A call awaiting its reply.
pub(crate) struct PendingCall {
    /// Method name, for error context.
    pub(crate) method: String,
    /// Settles the caller's future.
    pub(crate) reply_tx: oneshot::Sender<Result<Value>>,
}

// ============================================================================
// ConnectionEvent
// ============================================================================

/// Notifications emitted by a connection to its subscribers.
#[derive(Clone)]
pub enum ConnectionEvent {
    /// A session was attached by the browser.
    SessionAttached {
        /// The new session.
        session: CdpSession,
        /// The session the attach event arrived on, if any.
        parent: Option<SessionId>,
    },

    /// A session was detached by the browser.
    SessionDetached {
        /// The closed session.
        session: CdpSession,
        /// The session the detach event arrived on, if any.
        parent: Option<SessionId>,
    },

    /// An unsolicited root-scoped event.
    Event(CdpEvent),

    /// The connection closed. Emitted exactly once.
    Disconnected,
}

// ============================================================================
// PendingTable
// ============================================================================

/// Pending-call table with a joint open/closed flag.
///
/// The flag and the map live under one lock so a bulk rejection at close
/// cannot race a concurrent insert into oblivion.
pub(crate) struct PendingTable {
    state: Mutex<PendingTableState>,
}

struct PendingTableState {
    open: bool,
    calls: FxHashMap<CallId, PendingCall>,
}

impl PendingTable {
    /// Creates an open table.
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(PendingTableState {
                open: true,
                calls: FxHashMap::default(),
            }),
        }
    }

    /// Stores a pending call. Returns `false` once the table is closed.
    pub(crate) fn insert(&self, id: CallId, call: PendingCall) -> bool {
        let mut state = self.state.lock();
        if !state.open {
            return false;
        }
        state.calls.insert(id, call);
        true
    }

    /// Retires and returns the call with the given id.
    pub(crate) fn complete(&self, id: CallId) -> Option<PendingCall> {
        self.state.lock().calls.remove(&id)
    }

    /// Closes the table and drains every outstanding call.
    ///
    /// Idempotent: a second close drains nothing.
    pub(crate) fn close_all(&self) -> Vec<PendingCall> {
        let mut state = self.state.lock();
        state.open = false;
        state.calls.drain().map(|(_, call)| call).collect()
    }

    /// Returns the number of outstanding calls.
    pub(crate) fn len(&self) -> usize {
        self.state.lock().calls.len()
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A connection to the browser's DevTools endpoint.
///
/// Cheap to clone; all clones share one transport and one event loop.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync`. All operations are non-blocking; `send`
/// suspends only on the reply.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Clone for Connection {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct ConnectionInner {
    /// Monotonic call-id allocator.
    call_ids: CallIdGenerator,

    /// Root-scoped pending calls.
    pending: PendingTable,

    /// Live sessions keyed by browser-assigned id.
    sessions: Mutex<FxHashMap<SessionId, CdpSession>>,

    /// Event subscribers.
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>,

    /// Wakes `create_session` waiters when the registry changes.
    registry_changed: Notify,

    /// Queue into the event loop.
    command_tx: mpsc::UnboundedSender<LoopCommand>,

    /// Close-once gate.
    closed: AtomicBool,
}

impl Connection {
    /// Creates a connection over an established transport.
    ///
    /// Spawns the event-loop task internally.
    #[must_use]
    pub fn new(transport: Box<dyn TransportLink>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ConnectionInner {
            call_ids: CallIdGenerator::new(),
            pending: PendingTable::new(),
            sessions: Mutex::new(FxHashMap::default()),
            subscribers: Mutex::new(Vec::new()),
            registry_changed: Notify::new(),
            command_tx,
            closed: AtomicBool::new(false),
        });

        tokio::spawn(Self::run_event_loop(
            transport,
            command_rx,
            Arc::clone(&inner),
        ));

        Self { inner }
    }

    /// Connects to a DevTools WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`] if the handshake fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let transport = WebSocketTransport::connect(url).await?;
        Ok(Self::new(Box::new(transport)))
    }

    /// Sends a root-scoped command and waits for its reply.
    ///
    /// # Errors
    ///
    /// - [`Error::TargetClosed`] if the connection is closed (rejects
    ///   without suspending)
    /// - [`Error::Protocol`] if the browser replies with an error
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        let reply_rx =
            self.inner
                .submit_call(method, params, None, &self.inner.pending, || {
                    Error::target_closed(method)
                })?;
        reply_rx.await?
    }

    /// Subscribes to connection events.
    ///
    /// A subscriber created after close receives nothing; its channel is
    /// closed immediately.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.inner.closed.load(Ordering::SeqCst) {
            self.inner.subscribers.lock().push(tx);
        }
        rx
    }

    /// Returns the session with the given id, if attached.
    #[must_use]
    pub fn session(&self, session_id: &SessionId) -> Option<CdpSession> {
        self.inner.sessions.lock().get(session_id).cloned()
    }

    /// Attaches to a target and returns its session.
    ///
    /// The attach reply carries only a sessionId; the session object is
    /// produced by the unsolicited `Target.attachedToTarget` event. This
    /// method bridges the two causally-linked signals.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetClosed`] if the connection closes before the
    /// session materializes, or [`Error::Protocol`] if the attach fails.
    pub async fn create_session(&self, target_id: &TargetId) -> Result<CdpSession> {
        let result = self
            .send(
                "Target.attachToTarget",
                serde_json::json!({ "targetId": target_id.as_str(), "flatten": true }),
            )
            .await?;

        let session_id = result
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(SessionId::new)
            .ok_or_else(|| Error::invalid_message("attachToTarget reply without sessionId"))?;

        loop {
            // Register interest before checking, so a registration racing
            // this check cannot be missed.
            let notified = self.inner.registry_changed.notified();

            if let Some(session) = self.session(&session_id) {
                return Ok(session);
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(Error::target_closed("Target.attachToTarget"));
            }

            notified.await;
        }
    }

    /// Returns the number of outstanding root-scoped calls.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Returns `true` once the connection is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Closes the connection.
    ///
    /// Idempotent. Rejects every outstanding call with a target-closed
    /// error, closes every live session, and emits
    /// [`ConnectionEvent::Disconnected`] exactly once. Subsequent `send`
    /// calls reject without suspending.
    pub fn close(&self) {
        ConnectionInner::shutdown(&self.inner);
    }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }
}

// ============================================================================
// Connection - Event Loop
// ============================================================================

impl Connection {
    /// Event loop owning the transport.
    async fn run_event_loop(
        mut transport: Box<dyn TransportLink>,
        mut command_rx: mpsc::UnboundedReceiver<LoopCommand>,
        inner: Arc<ConnectionInner>,
    ) {
        loop {
            tokio::select! {
                frame = transport.receive() => {
                    match frame {
                        Some(text) => Self::dispatch(&inner, &text),
                        None => {
                            debug!("Transport closed by remote");
                            break;
                        }
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(LoopCommand::Send(payload)) => {
                            if let Err(e) = transport.send(payload).await {
                                error!(error = %e, "Transport write failed");
                                break;
                            }
                        }

                        Some(LoopCommand::Shutdown) | None => {
                            transport.close().await;
                            break;
                        }
                    }
                }
            }
        }

        ConnectionInner::shutdown(&inner);
        debug!("Connection event loop terminated");
    }

    /// Routes one incoming frame.
    fn dispatch(inner: &Arc<ConnectionInner>, text: &str) {
        let message = match CdpMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable frame");
                return;
            }
        };

        // Session lifecycle first: attach/detach events mutate the
        // registry regardless of which channel they arrived on.
        match message.method.as_deref() {
            Some("Target.attachedToTarget") => Self::handle_attached(inner, &message),
            Some("Target.detachedFromTarget") => Self::handle_detached(inner, &message),
            _ => {}
        }

        // Session-scoped traffic is forwarded whole.
        if let Some(session_id) = &message.session_id {
            let session = inner.sessions.lock().get(session_id).cloned();
            match session {
                Some(session) => session.dispatch(message),
                None => debug!(session_id = %session_id, "Message for unknown session"),
            }
            return;
        }

        // A root-scoped reply settles its pending call.
        if let Some(id) = message.id {
            match inner.pending.complete(id) {
                Some(call) => {
                    let result = message.into_call_result(&call.method);
                    let _ = call.reply_tx.send(result);
                }
                None => warn!(id = %id, "Reply for unknown call"),
            }
            return;
        }

        // Everything else is an unsolicited root-scoped event.
        if let Some(method) = message.method {
            let event = CdpEvent::new(method, message.params.unwrap_or(Value::Null));
            inner.emit(ConnectionEvent::Event(event));
        }
    }

    /// Registers the session announced by `Target.attachedToTarget`.
    fn handle_attached(inner: &Arc<ConnectionInner>, message: &CdpMessage) {
        let Some(params) = message.params.clone() else {
            return;
        };
        let params: AttachedToTargetParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, "Malformed attachedToTarget event");
                return;
            }
        };

        let session = CdpSession::new(
            Arc::downgrade(inner),
            params.session_id.clone(),
            params.target_info.target_type.clone(),
            params.target_info.target_id.clone(),
        );

        debug!(
            session_id = %params.session_id,
            target_type = %params.target_info.target_type,
            "Session attached"
        );

        inner
            .sessions
            .lock()
            .insert(params.session_id, session.clone());
        inner.registry_changed.notify_waiters();

        inner.emit(ConnectionEvent::SessionAttached {
            session,
            parent: message.session_id.clone(),
        });
    }

    /// Destroys the session announced by `Target.detachedFromTarget`.
    fn handle_detached(inner: &Arc<ConnectionInner>, message: &CdpMessage) {
        let Some(params) = message.params.clone() else {
            return;
        };
        let params: DetachedFromTargetParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, "Malformed detachedFromTarget event");
                return;
            }
        };

        let session = inner.sessions.lock().remove(&params.session_id);
        let Some(session) = session else {
            return;
        };

        debug!(session_id = %params.session_id, "Session detached");

        session.on_closed();
        inner.registry_changed.notify_waiters();

        inner.emit(ConnectionEvent::SessionDetached {
            session,
            parent: message.session_id.clone(),
        });
    }
}

// ============================================================================
// ConnectionInner
// ============================================================================

impl ConnectionInner {
    /// Allocates an id, stores the pending call, and queues the frame.
    ///
    /// Used for both root- and session-scoped calls; the caller provides
    /// the table the call belongs to and the error for a closed scope.
    pub(crate) fn submit_call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<SessionId>,
        table: &PendingTable,
        closed_error: impl Fn() -> Error,
    ) -> Result<oneshot::Receiver<Result<Value>>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_error());
        }

        let id = self.call_ids.next_id();
        let call = CdpCall {
            id,
            method: method.to_string(),
            session_id,
            params,
        };
        let payload = serde_json::to_string(&call)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        if !table.insert(
            id,
            PendingCall {
                method: method.to_string(),
                reply_tx,
            },
        ) {
            return Err(closed_error());
        }

        if self.command_tx.send(LoopCommand::Send(payload)).is_err() {
            table.complete(id);
            return Err(closed_error());
        }

        trace!(id = %id, method, "Call sent");
        Ok(reply_rx)
    }

    /// Emits an event to all live subscribers, pruning closed ones.
    fn emit(&self, event: ConnectionEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Tears the connection down. Idempotent.
    fn shutdown(inner: &Arc<Self>) {
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = inner.command_tx.send(LoopCommand::Shutdown);

        let rejected = inner.pending.close_all();
        let count = rejected.len();
        for call in rejected {
            let method = call.method;
            let _ = call.reply_tx.send(Err(Error::target_closed(&method)));
        }
        if count > 0 {
            debug!(count, "Rejected outstanding calls on close");
        }

        let sessions: Vec<CdpSession> = inner
            .sessions
            .lock()
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in &sessions {
            session.on_closed();
        }
        inner.registry_changed.notify_waiters();

        let mut subscribers = inner.subscribers.lock();
        for tx in subscribers.iter() {
            let _ = tx.send(ConnectionEvent::Disconnected);
        }
        subscribers.clear();

        debug!("Connection closed");
    }
}

// ============================================================================
// Tests
// ============================================================================
