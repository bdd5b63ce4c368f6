//! Per-request-id pairing buffers.
//!
//! The protocol delivers logically paired events in arbitrary relative
//! order, with arbitrarily many unrelated events in between. This buffer
//! stores whichever half of a pair arrived first until its counterpart
//! appears — it never infers ordering.
//!
//! Buffered pairs:
//!
//! - `requestWillBeSent` ↔ `requestPaused`
//! - `responseReceived` (and a trailing finished/failed) ↔ its extra-info
//! - a redirect hop ↔ the previous hop's extra-info
//!
//! Everything is keyed by the redirect-stable network request id and
//! cleared together via [`forget`](NetworkEventManager::forget) once a
//! request's lifecycle is fully observed, bounding memory.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::identifiers::{FetchRequestId, NetworkRequestId};
use crate::network::request::HttpRequest;
use crate::protocol::{
    LoadingFailedEvent, LoadingFinishedEvent, RequestPausedEvent, RequestWillBeSentEvent,
    ResponseReceivedEvent, ResponseReceivedExtraInfoEvent,
};

// ============================================================================
// QueuedRedirectInfo
// ============================================================================

/// A redirect hop deferred until the previous hop's extra-info arrives.
#[derive(Debug, Clone)]
pub struct QueuedRedirectInfo {
    /// The deferred `requestWillBeSent` carrying the redirect response.
    pub event: RequestWillBeSentEvent,

    /// Interception id paired with the deferred hop, if any.
    pub fetch_request_id: Option<FetchRequestId>,
}

// ============================================================================
// QueuedEventGroup
// ============================================================================

/// A response (plus any trailing terminal event) deferred until its
/// extra-info arrives.
///
/// Replayed strictly in order: response, then finished, then failed.
#[derive(Debug, Clone)]
pub struct QueuedEventGroup {
    /// The deferred `responseReceived`.
    pub response_received: ResponseReceivedEvent,

    /// A `loadingFinished` that arrived while the response was deferred.
    pub loading_finished: Option<LoadingFinishedEvent>,

    /// A `loadingFailed` that arrived while the response was deferred.
    pub loading_failed: Option<LoadingFailedEvent>,
}

// ============================================================================
// NetworkEventManager
// ============================================================================

/// Pairing buffers for one session's network events.
///
/// Owned and mutated exclusively by its [`NetworkManager`]; never shared
/// across sessions.
///
/// [`NetworkManager`]: crate::network::NetworkManager
#[derive(Default)]
pub struct NetworkEventManager {
    /// `requestWillBeSent` events awaiting their paused counterpart.
    will_be_sent: FxHashMap<NetworkRequestId, RequestWillBeSentEvent>,

    /// `requestPaused` events awaiting their will-be-sent counterpart.
    paused: FxHashMap<NetworkRequestId, RequestPausedEvent>,

    /// In-flight requests, one live entry per network id.
    requests: FxHashMap<NetworkRequestId, Arc<HttpRequest>>,

    /// Extra-info events awaiting a consumer. Redirects can enqueue more
    /// than one before any is drained.
    extra_info: FxHashMap<NetworkRequestId, VecDeque<ResponseReceivedExtraInfoEvent>>,

    /// Redirect hops deferred on a missing extra-info.
    redirect_info: FxHashMap<NetworkRequestId, VecDeque<QueuedRedirectInfo>>,

    /// Responses deferred on a missing extra-info.
    event_groups: FxHashMap<NetworkRequestId, QueuedEventGroup>,
}

impl NetworkEventManager {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears every buffer slot for a request id.
    ///
    /// Callers invoke this once the request's full lifecycle is observed.
    pub fn forget(&mut self, request_id: &NetworkRequestId) {
        self.will_be_sent.remove(request_id);
        self.paused.remove(request_id);
        self.requests.remove(request_id);
        self.extra_info.remove(request_id);
        self.redirect_info.remove(request_id);
        self.event_groups.remove(request_id);
    }

    // ========================================================================
    // requestWillBeSent ↔ requestPaused pairing
    // ========================================================================

    /// Buffers a `requestWillBeSent` awaiting its paused counterpart.
    ///
    /// A redirect hop with the same id overwrites the previous entry.
    pub fn store_will_be_sent(
        &mut self,
        request_id: NetworkRequestId,
        event: RequestWillBeSentEvent,
    ) {
        self.will_be_sent.insert(request_id, event);
    }

    /// Returns the buffered `requestWillBeSent`, if any.
    #[must_use]
    pub fn get_will_be_sent(&self, request_id: &NetworkRequestId) -> Option<&RequestWillBeSentEvent> {
        self.will_be_sent.get(request_id)
    }

    /// Drops a buffered `requestWillBeSent` (stale redirect echo).
    pub fn forget_will_be_sent(&mut self, request_id: &NetworkRequestId) {
        self.will_be_sent.remove(request_id);
    }

    /// Buffers a `requestPaused` awaiting its will-be-sent counterpart.
    pub fn store_paused(&mut self, request_id: NetworkRequestId, event: RequestPausedEvent) {
        self.paused.insert(request_id, event);
    }

    /// Consumes the buffered `requestPaused`, if any.
    #[must_use]
    pub fn take_paused(&mut self, request_id: &NetworkRequestId) -> Option<RequestPausedEvent> {
        self.paused.remove(request_id)
    }

    // ========================================================================
    // In-flight requests
    // ========================================================================

    /// Registers the live request for a network id.
    pub fn store_request(&mut self, request_id: NetworkRequestId, request: Arc<HttpRequest>) {
        self.requests.insert(request_id, request);
    }

    /// Returns the live request for a network id.
    #[must_use]
    pub fn get_request(&self, request_id: &NetworkRequestId) -> Option<Arc<HttpRequest>> {
        self.requests.get(request_id).cloned()
    }

    /// Drops the live request entry.
    ///
    /// A retired redirect leg leaves the map here while its queued
    /// extra-infos stay consumable by later legs of the same id.
    pub fn forget_request(&mut self, request_id: &NetworkRequestId) {
        self.requests.remove(request_id);
    }

    /// Returns the number of in-flight requests.
    #[must_use]
    pub fn in_flight_requests(&self) -> usize {
        self.requests.len()
    }

    // ========================================================================
    // Extra-info reconciliation
    // ========================================================================

    /// Returns the extra-info FIFO for a request id, creating it empty.
    pub fn extra_info_queue(
        &mut self,
        request_id: &NetworkRequestId,
    ) -> &mut VecDeque<ResponseReceivedExtraInfoEvent> {
        self.extra_info.entry(request_id.clone()).or_default()
    }

    /// Defers a redirect hop until the previous hop's extra-info arrives.
    pub fn queue_redirect_info(&mut self, request_id: NetworkRequestId, info: QueuedRedirectInfo) {
        self.redirect_info.entry(request_id).or_default().push_back(info);
    }

    /// Consumes the oldest deferred redirect hop, if any.
    #[must_use]
    pub fn take_queued_redirect_info(
        &mut self,
        request_id: &NetworkRequestId,
    ) -> Option<QueuedRedirectInfo> {
        self.redirect_info
            .get_mut(request_id)
            .and_then(VecDeque::pop_front)
    }

    /// Defers a response until its extra-info arrives.
    pub fn queue_event_group(&mut self, request_id: NetworkRequestId, group: QueuedEventGroup) {
        self.event_groups.insert(request_id, group);
    }

    /// Returns the deferred response group for attaching terminal events.
    #[must_use]
    pub fn event_group_mut(
        &mut self,
        request_id: &NetworkRequestId,
    ) -> Option<&mut QueuedEventGroup> {
        self.event_groups.get_mut(request_id)
    }

    /// Consumes the deferred response group, if any.
    #[must_use]
    pub fn take_event_group(&mut self, request_id: &NetworkRequestId) -> Option<QueuedEventGroup> {
        self.event_groups.remove(request_id)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use crate::protocol::RequestPayload;

    fn will_be_sent(id: &str, url: &str) -> RequestWillBeSentEvent {
        RequestWillBeSentEvent {
            request_id: NetworkRequestId::new(id),
            loader_id: id.to_string(),
            document_url: url.to_string(),
            request: RequestPayload {
                url: url.to_string(),
                method: "GET".to_string(),
                headers: HashMap::new(),
                post_data: None,
                has_post_data: None,
            },
            timestamp: 1.0,
            initiator: None,
            redirect_has_extra_info: false,
            redirect_response: None,
            resource_type: Some("Document".to_string()),
            frame_id: None,
        }
    }

    fn extra_info(id: &str, status: u16) -> ResponseReceivedExtraInfoEvent {
        ResponseReceivedExtraInfoEvent {
            request_id: NetworkRequestId::new(id),
            headers: HashMap::new(),
            status_code: status,
            headers_text: None,
        }
    }

    #[test]
    fn test_stores_first_half_until_counterpart() {
        let mut buffers = NetworkEventManager::new();
        let id = NetworkRequestId::new("1");

        buffers.store_will_be_sent(id.clone(), will_be_sent("1", "http://a.test/"));
        assert!(buffers.get_will_be_sent(&id).is_some());
        assert!(buffers.take_paused(&id).is_none());
    }

    #[test]
    fn test_extra_info_queue_is_fifo() {
        let mut buffers = NetworkEventManager::new();
        let id = NetworkRequestId::new("1");

        buffers.extra_info_queue(&id).push_back(extra_info("1", 301));
        buffers.extra_info_queue(&id).push_back(extra_info("1", 200));

        assert_eq!(buffers.extra_info_queue(&id).pop_front().map(|e| e.status_code), Some(301));
        assert_eq!(buffers.extra_info_queue(&id).pop_front().map(|e| e.status_code), Some(200));
        assert!(buffers.extra_info_queue(&id).pop_front().is_none());
    }

    #[test]
    fn test_redirect_info_consumed_once() {
        let mut buffers = NetworkEventManager::new();
        let id = NetworkRequestId::new("1");

        buffers.queue_redirect_info(
            id.clone(),
            QueuedRedirectInfo {
                event: will_be_sent("1", "http://a.test/next"),
                fetch_request_id: Some(FetchRequestId::new("F1")),
            },
        );

        let info = buffers.take_queued_redirect_info(&id).expect("queued");
        assert_eq!(info.event.request.url, "http://a.test/next");
        assert!(buffers.take_queued_redirect_info(&id).is_none());
    }

    #[test]
    fn test_forget_clears_every_slot() {
        let mut buffers = NetworkEventManager::new();
        let id = NetworkRequestId::new("1");

        buffers.store_will_be_sent(id.clone(), will_be_sent("1", "http://a.test/"));
        buffers.extra_info_queue(&id).push_back(extra_info("1", 200));
        buffers.queue_redirect_info(
            id.clone(),
            QueuedRedirectInfo {
                event: will_be_sent("1", "http://a.test/"),
                fetch_request_id: None,
            },
        );

        buffers.forget(&id);

        assert!(buffers.get_will_be_sent(&id).is_none());
        assert!(buffers.extra_info_queue(&id).is_empty());
        assert!(buffers.take_queued_redirect_info(&id).is_none());
        assert_eq!(buffers.in_flight_requests(), 0);
    }
}
