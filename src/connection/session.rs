//! Flattened per-target sub-channel.
//!
//! A session shares its connection's transport and call-id space; the
//! sessionId stamped on every message is what scopes it to one target.
//! Sessions are created and destroyed only by browser attach/detach
//! events — `detach()` merely asks the browser to do so.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::connection::core::{ConnectionInner, PendingTable};
use crate::error::{Error, Result};
use crate::identifiers::{SessionId, TargetId};
use crate::protocol::{CdpEvent, CdpMessage};

// ============================================================================
// CdpSession
// ============================================================================

/// A session scoped to one attached target.
///
/// Cheap to clone; all clones share one pending-call table and subscriber
/// list. Once the session is closed every `send` fails immediately.
pub struct CdpSession {
    inner: Arc<CdpSessionInner>,
}

impl Clone for CdpSession {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CdpSessionInner {
    /// Browser-assigned session id.
    session_id: SessionId,

    /// Type of the attached target, used in close errors.
    target_type: String,

    /// The attached target.
    target_id: TargetId,

    /// Back-reference to the owning connection; cleared on close.
    ///
    /// Weak so a session held by a caller cannot keep a dead connection
    /// alive.
    connection: Mutex<Option<Weak<ConnectionInner>>>,

    /// Session-scoped pending calls.
    pending: PendingTable,

    /// Event subscribers; channel closure signals disconnect.
    subscribers: Mutex<Vec<mpsc::UnboundedSender<CdpEvent>>>,
}

impl CdpSession {
    /// Creates a session. Only the connection's attach handler does this.
    pub(crate) fn new(
        connection: Weak<ConnectionInner>,
        session_id: SessionId,
        target_type: String,
        target_id: TargetId,
    ) -> Self {
        Self {
            inner: Arc::new(CdpSessionInner {
                session_id,
                target_type,
                target_id,
                connection: Mutex::new(Some(connection)),
                pending: PendingTable::new(),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the session id.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// Returns the attached target's type.
    #[inline]
    #[must_use]
    pub fn target_type(&self) -> &str {
        &self.inner.target_type
    }

    /// Returns the attached target's id.
    #[inline]
    #[must_use]
    pub fn target_id(&self) -> &TargetId {
        &self.inner.target_id
    }

    /// Returns `true` once the session is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.connection.lock().is_none()
    }

    /// Sends a session-scoped command and waits for its reply.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] once the session is detached or its
    ///   connection closed (rejects without suspending)
    /// - [`Error::Protocol`] if the browser replies with an error
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        let connection = self.upgrade(method)?;
        let reply_rx = connection.submit_call(
            method,
            params,
            Some(self.inner.session_id.clone()),
            &self.inner.pending,
            || Error::session_closed(method, &self.inner.target_type),
        )?;
        reply_rx.await?
    }

    /// Subscribes to this session's events.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.is_closed() {
            self.inner.subscribers.lock().push(tx);
        }
        rx
    }

    /// Asks the browser to detach this session.
    ///
    /// Local state is intentionally untouched: teardown happens only when
    /// the browser confirms with `Target.detachedFromTarget`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session is already gone.
    pub async fn detach(&self) -> Result<()> {
        let connection = self.upgrade("Target.detachFromTarget")?;
        Connection::from_inner(connection)
            .send(
                "Target.detachFromTarget",
                serde_json::json!({ "sessionId": self.inner.session_id.as_str() }),
            )
            .await?;
        Ok(())
    }

    fn upgrade(&self, method: &str) -> Result<Arc<ConnectionInner>> {
        self.inner
            .connection
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::session_closed(method, &self.inner.target_type))
    }
}

// ============================================================================
// CdpSession - Connection-Driven Dispatch
// ============================================================================

impl CdpSession {
    /// Routes one session-scoped message.
    pub(crate) fn dispatch(&self, message: CdpMessage) {
        if let Some(id) = message.id {
            match self.inner.pending.complete(id) {
                Some(call) => {
                    let result = message.into_call_result(&call.method);
                    let _ = call.reply_tx.send(result);
                }
                None => warn!(id = %id, session_id = %self.inner.session_id, "Reply for unknown call"),
            }
            return;
        }

        if let Some(method) = message.method {
            let event = CdpEvent::new(method, message.params.unwrap_or(Value::Null));
            self.inner
                .subscribers
                .lock()
                .retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Tears the session down. Only the connection invokes this.
    pub(crate) fn on_closed(&self) {
        *self.inner.connection.lock() = None;

        let rejected = self.inner.pending.close_all();
        let count = rejected.len();
        for call in rejected {
            let method = call.method;
            let _ = call
                .reply_tx
                .send(Err(Error::session_closed(&method, &self.inner.target_type)));
        }
        if count > 0 {
            debug!(
                session_id = %self.inner.session_id,
                count,
                "Rejected outstanding calls on session close"
            );
        }

        // Dropping the senders closes every subscriber's channel.
        self.inner.subscribers.lock().clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::connection::ConnectionEvent;
    use crate::transport::loopback;

    async fn connection_with_session() -> (
        Connection,
        loopback::LoopbackRemote,
        CdpSession,
    ) {
        let (transport, remote) = loopback::pair();
        let connection = Connection::new(Box::new(transport));
        let mut events = connection.subscribe();

        remote.inject_json(json!({
            "method": "Target.attachedToTarget",
            "params": {
                "sessionId": "SESSION-1",
                "targetInfo": {
                    "targetId": "TARGET-1",
                    "type": "page",
                    "url": "about:blank"
                }
            }
        }));

        let session = loop {
            match events.recv().await.expect("event") {
                ConnectionEvent::SessionAttached { session, .. } => break session,
                _ => continue,
            }
        };

        (connection, remote, session)
    }

    #[tokio::test]
    async fn test_events_forwarded_to_subscribers() {
        let (_connection, remote, session) = connection_with_session().await;
        let mut events = session.subscribe();

        remote.inject_json(json!({
            "method": "Network.loadingFinished",
            "sessionId": "SESSION-1",
            "params": { "requestId": "1000.1" }
        }));

        let event = events.recv().await.expect("event");
        assert_eq!(event.method, "Network.loadingFinished");
        assert_eq!(event.params["requestId"], "1000.1");
    }

    #[tokio::test]
    async fn test_detach_keeps_local_state() {
        let (_connection, mut remote, session) = connection_with_session().await;

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.detach().await }
        });

        let sent = remote.next_sent().await;
        assert_eq!(sent["method"], "Target.detachFromTarget");
        assert_eq!(sent["params"]["sessionId"], "SESSION-1");
        // Detach is a root-scoped command.
        assert!(sent.get("sessionId").is_none());

        remote.inject_json(json!({ "id": sent["id"], "result": {} }));
        pending.await.expect("join").expect("detach");

        // Until the browser confirms, the session is still live.
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_connection_close_closes_session() {
        let (connection, _remote, session) = connection_with_session().await;
        let mut events = session.subscribe();

        connection.close();

        assert!(session.is_closed());
        // Subscriber channel closes as the disconnect signal.
        assert!(events.recv().await.is_none());

        let err = session.send("Page.enable", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed { .. }));
    }
}
