//! Call, reply, and error-payload framing.
//!
//! Defines the outgoing command envelope and the single incoming message
//! shape that replies and events both deserialize into.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{CallId, SessionId};

// ============================================================================
// CdpCall
// ============================================================================

/// A command sent from the local end to the browser.
///
/// # Format
///
/// ```json
/// {
///   "id": 7,
///   "method": "Network.enable",
///   "sessionId": "ABCDEF",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct CdpCall {
    /// Correlation id, unique per connection.
    pub id: CallId,

    /// Method in `Domain.methodName` format.
    pub method: String,

    /// Session the command is scoped to; absent for root commands.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    /// Method parameters.
    pub params: Value,
}

impl CdpCall {
    /// Creates a root-scoped call.
    #[inline]
    #[must_use]
    pub fn new(id: CallId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            session_id: None,
            params,
        }
    }

    /// Creates a session-scoped call.
    #[inline]
    #[must_use]
    pub fn for_session(
        id: CallId,
        method: impl Into<String>,
        params: Value,
        session_id: SessionId,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            session_id: Some(session_id),
            params,
        }
    }
}

// ============================================================================
// CdpMessage
// ============================================================================

/// Any incoming message from the browser.
///
/// A reply carries `id` plus `result` or `error`; an event carries `method`
/// plus `params`. Either may carry a `sessionId` routing it to a session.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpMessage {
    /// Correlation id of the call this replies to.
    #[serde(default)]
    pub id: Option<CallId>,

    /// Event method, for unsolicited messages.
    #[serde(default)]
    pub method: Option<String>,

    /// Session the message is scoped to.
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<SessionId>,

    /// Event parameters.
    #[serde(default)]
    pub params: Option<Value>,

    /// Success result of a reply.
    #[serde(default)]
    pub result: Option<Value>,

    /// Error payload of a failed reply.
    #[serde(default)]
    pub error: Option<CdpErrorPayload>,
}

impl CdpMessage {
    /// Parses a raw text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if the frame is not a protocol
    /// message.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::invalid_message(e.to_string()))
    }

    /// Returns `true` if this is a reply to a sent call.
    #[inline]
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.id.is_some()
    }

    /// Returns `true` if this is an unsolicited event.
    #[inline]
    #[must_use]
    pub fn is_event(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    /// Converts a reply into the pending call's settlement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] carrying the server message and optional
    /// `data` if the reply is an error.
    pub fn into_call_result(self, method: &str) -> Result<Value> {
        match self.error {
            Some(error) => Err(Error::protocol(method, error.message, error.data)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ============================================================================
// CdpErrorPayload
// ============================================================================

/// Error payload of a failed reply.
///
/// # Format
///
/// ```json
/// {
///   "code": -32000,
///   "message": "Invalid InterceptionId.",
///   "data": "..."
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CdpErrorPayload {
    /// JSON-RPC style error code.
    #[serde(default)]
    pub code: i64,

    /// Server-provided message.
    pub message: String,

    /// Optional detail payload.
    #[serde(default)]
    pub data: Option<Value>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_call_serialization_root() {
        let call = CdpCall::new(CallId::new(3), "Network.enable", json!({}));
        let text = serde_json::to_string(&call).expect("serialize");

        assert!(text.contains("\"id\":3"));
        assert!(text.contains("Network.enable"));
        assert!(!text.contains("sessionId"));
    }

    #[test]
    fn test_call_serialization_session_scoped() {
        let call = CdpCall::for_session(
            CallId::new(4),
            "Fetch.enable",
            json!({ "handleAuthRequests": true }),
            SessionId::new("SESSION-1"),
        );
        let text = serde_json::to_string(&call).expect("serialize");

        assert!(text.contains("\"sessionId\":\"SESSION-1\""));
        assert!(text.contains("handleAuthRequests"));
    }

    #[test]
    fn test_parse_success_reply() {
        let message =
            CdpMessage::parse(r#"{"id": 3, "result": {"sessionId": "S"}}"#).expect("parse");

        assert!(message.is_reply());
        assert!(!message.is_event());

        let result = message.into_call_result("Target.attachToTarget").expect("ok");
        assert_eq!(result["sessionId"], "S");
    }

    #[test]
    fn test_parse_error_reply() {
        let message = CdpMessage::parse(
            r#"{"id": 9, "error": {"code": -32000, "message": "Not allowed", "data": "extra"}}"#,
        )
        .expect("parse");

        let err = message.into_call_result("Browser.close").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Browser.close"));
        assert!(text.contains("Not allowed"));
        assert!(text.contains("extra"));
    }

    #[test]
    fn test_parse_event_with_session() {
        let message = CdpMessage::parse(
            r#"{"method": "Network.loadingFinished", "sessionId": "S", "params": {"requestId": "1"}}"#,
        )
        .expect("parse");

        assert!(message.is_event());
        assert_eq!(message.session_id, Some(SessionId::new("S")));
        assert_eq!(message.method.as_deref(), Some("Network.loadingFinished"));
    }

    #[test]
    fn test_parse_rejects_non_message() {
        assert!(CdpMessage::parse("not json").is_err());
    }
}
