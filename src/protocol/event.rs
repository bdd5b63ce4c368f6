//! Event message types.
//!
//! Events are notifications sent from the browser when activity occurs.
//! Raw events carry a method string and loose params; [`CdpEvent::parse`]
//! turns them into the closed [`ParsedEvent`] union so the network
//! reconciliation logic can match exhaustively.
//!
//! # Event Types
//!
//! | Domain | Events |
//! |--------|--------|
//! | `Network` | `requestWillBeSent`, `requestServedFromCache`, `responseReceived`, `responseReceivedExtraInfo`, `loadingFinished`, `loadingFailed` |
//! | `Fetch` | `requestPaused`, `authRequired` |

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tracing::warn;

use crate::protocol::network::{
    AuthRequiredEvent, LoadingFailedEvent, LoadingFinishedEvent, RequestPausedEvent,
    RequestServedFromCacheEvent, RequestWillBeSentEvent, ResponseReceivedEvent,
    ResponseReceivedExtraInfoEvent,
};

// ============================================================================
// CdpEvent
// ============================================================================

/// An unsolicited notification from the browser.
///
/// # Format
///
/// ```json
/// {
///   "method": "Network.loadingFinished",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// Event name in `Domain.eventName` format.
    pub method: String,

    /// Event-specific data.
    pub params: Value,
}

impl CdpEvent {
    /// Creates an event from its raw parts.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Returns the domain name from the method.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let event = CdpEvent::new("Network.loadingFinished", json!({}));
    /// assert_eq!(event.domain(), "Network");
    /// ```
    #[inline]
    #[must_use]
    pub fn domain(&self) -> &str {
        self.method.split('.').next().unwrap_or_default()
    }

    /// Parses the event into a typed variant.
    ///
    /// Events outside the closed set, and events whose payload does not
    /// deserialize, become [`ParsedEvent::Unknown`].
    #[must_use]
    pub fn parse(&self) -> ParsedEvent {
        match self.method.as_str() {
            "Network.requestWillBeSent" => self.parse_as(ParsedEvent::RequestWillBeSent),
            "Network.requestServedFromCache" => self.parse_as(ParsedEvent::RequestServedFromCache),
            "Network.responseReceived" => self.parse_as(ParsedEvent::ResponseReceived),
            "Network.responseReceivedExtraInfo" => {
                self.parse_as(ParsedEvent::ResponseReceivedExtraInfo)
            }
            "Network.loadingFinished" => self.parse_as(ParsedEvent::LoadingFinished),
            "Network.loadingFailed" => self.parse_as(ParsedEvent::LoadingFailed),
            "Fetch.requestPaused" => self.parse_as(ParsedEvent::RequestPaused),
            "Fetch.authRequired" => self.parse_as(ParsedEvent::AuthRequired),
            _ => self.unknown(),
        }
    }

    /// Deserializes params into one typed variant, falling back to Unknown.
    fn parse_as<T, F>(&self, wrap: F) -> ParsedEvent
    where
        T: serde::de::DeserializeOwned,
        F: FnOnce(T) -> ParsedEvent,
    {
        match serde_json::from_value::<T>(self.params.clone()) {
            Ok(payload) => wrap(payload),
            Err(e) => {
                warn!(method = %self.method, error = %e, "Malformed event payload");
                self.unknown()
            }
        }
    }

    fn unknown(&self) -> ParsedEvent {
        ParsedEvent::Unknown {
            method: self.method.clone(),
            params: self.params.clone(),
        }
    }
}

// ============================================================================
// ParsedEvent
// ============================================================================

/// Closed union of the event kinds the network layer consumes.
///
/// Matching on this enum is exhaustive: a new consumed event must be added
/// here, which forces every dispatch site to handle it.
#[derive(Debug, Clone)]
pub enum ParsedEvent {
    /// A request is about to go out (or a redirect hop occurred).
    RequestWillBeSent(RequestWillBeSentEvent),

    /// A request was satisfied from the memory cache.
    RequestServedFromCache(RequestServedFromCacheEvent),

    /// Response headers arrived.
    ResponseReceived(ResponseReceivedEvent),

    /// Out-of-band response metadata arrived.
    ResponseReceivedExtraInfo(ResponseReceivedExtraInfoEvent),

    /// The load completed.
    LoadingFinished(LoadingFinishedEvent),

    /// The load failed.
    LoadingFailed(LoadingFailedEvent),

    /// A request is paused awaiting an interception decision.
    RequestPaused(RequestPausedEvent),

    /// A request is paused awaiting credentials.
    AuthRequired(AuthRequiredEvent),

    /// Any event outside the closed set.
    Unknown {
        /// Event method.
        method: String,
        /// Event params.
        params: Value,
    },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_loading_finished() {
        let event = CdpEvent::new(
            "Network.loadingFinished",
            json!({ "requestId": "1000.1", "timestamp": 2.5, "encodedDataLength": 128 }),
        );

        assert_eq!(event.domain(), "Network");
        match event.parse() {
            ParsedEvent::LoadingFinished(payload) => {
                assert_eq!(payload.request_id.as_str(), "1000.1");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_request_paused() {
        let event = CdpEvent::new(
            "Fetch.requestPaused",
            json!({
                "requestId": "F1",
                "request": { "url": "http://a.test/", "method": "GET", "headers": {} },
                "networkId": "1000.1"
            }),
        );

        match event.parse() {
            ParsedEvent::RequestPaused(payload) => {
                assert_eq!(payload.request_id.as_str(), "F1");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event() {
        let event = CdpEvent::new("Page.loadEventFired", json!({ "timestamp": 1.0 }));

        match event.parse() {
            ParsedEvent::Unknown { method, .. } => {
                assert_eq!(method, "Page.loadEventFired");
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_payload_becomes_unknown() {
        // requestId is mandatory for loadingFinished.
        let event = CdpEvent::new("Network.loadingFinished", json!({ "timestamp": 1.0 }));

        assert!(matches!(event.parse(), ParsedEvent::Unknown { .. }));
    }
}
