//! Event→lifecycle state machine.
//!
//! Consumes one session's Network/Fetch events and emits an ordered
//! per-request lifecycle:
//!
//! - `Request` — once the will-be-sent/paused pairing resolves
//! - `RequestServedFromCache`
//! - `Response` — once base payload and (if announced) extra-info exist
//! - `RequestFinished` / `RequestFailed` — exactly one per response
//!
//! A redirect retires the current leg (response + finished, body
//! unavailable) strictly before the next leg's `Request`.
//!
//! Listeners are plain async callbacks awaited in registration order; the
//! `Request` listeners double as interception arbiters (§ see
//! [`HttpRequest`]).

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde_json::json;
use tokio::sync::{OnceCell, mpsc};
use tracing::{debug, warn};

use crate::connection::CdpSession;
use crate::error::Result;
use crate::identifiers::FetchRequestId;
use crate::network::event_manager::{NetworkEventManager, QueuedEventGroup, QueuedRedirectInfo};
use crate::network::request::HttpRequest;
use crate::network::response::HttpResponse;
use crate::protocol::{
    AuthRequiredEvent, CdpEvent, LoadingFailedEvent, LoadingFinishedEvent, ParsedEvent,
    RequestPausedEvent, RequestServedFromCacheEvent, RequestWillBeSentEvent, ResponsePayload,
    ResponseReceivedEvent, ResponseReceivedExtraInfoEvent,
};

// ============================================================================
// Types
// ============================================================================

/// A boxed async listener.
type Listener<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

// ============================================================================
// Credentials
// ============================================================================

/// HTTP authentication credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Username.
    pub username: String,

    /// Password.
    pub password: String,
}

// ============================================================================
// NetworkManager
// ============================================================================

/// Network lifecycle manager for one session.
///
/// Cheap to clone; all clones share the same buffers and listeners. A
/// driver task consumes the session's event stream and processes each
/// event to completion before the next, so correlation never depends on
/// arrival order within an event.
pub struct NetworkManager {
    inner: Arc<NetworkManagerInner>,
}

impl Clone for NetworkManager {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct NetworkManagerInner {
    session: CdpSession,
    ignore_https_errors: bool,

    /// Memoizes `initialize` so concurrent callers share one in-flight
    /// protocol setup.
    init: OnceCell<()>,

    state: Mutex<ManagerState>,
    listeners: Listeners,
}

/// Buffer and flag state, mutated only under the lock and never across an
/// await point.
struct ManagerState {
    events: NetworkEventManager,
    user_request_interception_enabled: bool,
    protocol_request_interception_enabled: bool,
    user_cache_disabled: bool,
    credentials: Option<Credentials>,
    attempted_authentications: FxHashSet<FetchRequestId>,
}

#[derive(Default)]
struct Listeners {
    request: Mutex<Vec<Listener<Arc<HttpRequest>>>>,
    served_from_cache: Mutex<Vec<Listener<Arc<HttpRequest>>>>,
    response: Mutex<Vec<Listener<Arc<HttpResponse>>>>,
    request_finished: Mutex<Vec<Listener<Arc<HttpRequest>>>>,
    request_failed: Mutex<Vec<Listener<Arc<HttpRequest>>>>,
}

impl NetworkManager {
    /// Creates a manager and spawns its event driver.
    #[must_use]
    pub fn new(session: CdpSession, ignore_https_errors: bool) -> Self {
        let events = session.subscribe();

        let inner = Arc::new(NetworkManagerInner {
            session,
            ignore_https_errors,
            init: OnceCell::new(),
            state: Mutex::new(ManagerState {
                events: NetworkEventManager::new(),
                user_request_interception_enabled: false,
                protocol_request_interception_enabled: false,
                user_cache_disabled: false,
                credentials: None,
                attempted_authentications: FxHashSet::default(),
            }),
            listeners: Listeners::default(),
        });

        let driver = Self {
            inner: Arc::clone(&inner),
        };
        tokio::spawn(async move { driver.drive(events).await });

        Self { inner }
    }

    /// Enables network tracking on the session.
    ///
    /// Memoized: concurrent and repeated callers await one in-flight
    /// initialization; `Network.enable` goes out exactly once.
    ///
    /// # Errors
    ///
    /// Propagates the protocol error of a failed setup call.
    pub async fn initialize(&self) -> Result<()> {
        self.inner
            .init
            .get_or_try_init(|| async {
                self.inner.session.send("Network.enable", json!({})).await?;
                if self.inner.ignore_https_errors {
                    self.inner
                        .session
                        .send(
                            "Security.setIgnoreCertificateErrors",
                            json!({ "ignore": true }),
                        )
                        .await?;
                }
                Ok(())
            })
            .await
            .copied()
    }

    /// Enables or disables user request interception.
    ///
    /// # Errors
    ///
    /// Propagates the protocol error of a failed `Fetch.*` toggle.
    pub async fn set_request_interception(&self, enabled: bool) -> Result<()> {
        {
            self.inner.state.lock().user_request_interception_enabled = enabled;
        }
        self.update_protocol_request_interception().await
    }

    /// Sets or clears authentication credentials.
    ///
    /// Credentials need interception under the hood, so this may toggle
    /// the Fetch domain even with user interception off.
    ///
    /// # Errors
    ///
    /// Propagates the protocol error of a failed `Fetch.*` toggle.
    pub async fn authenticate(&self, credentials: Option<Credentials>) -> Result<()> {
        {
            self.inner.state.lock().credentials = credentials;
        }
        self.update_protocol_request_interception().await
    }

    /// Enables or disables the browser cache for this session.
    ///
    /// # Errors
    ///
    /// Propagates the protocol error of the cache toggle.
    pub async fn set_cache_disabled(&self, disabled: bool) -> Result<()> {
        {
            self.inner.state.lock().user_cache_disabled = disabled;
        }
        self.update_protocol_cache_disabled().await
    }

    /// Returns the number of requests between `Request` and a terminal
    /// event.
    #[must_use]
    pub fn in_flight_requests(&self) -> usize {
        self.inner.state.lock().events.in_flight_requests()
    }

    // ========================================================================
    // Listener Registration
    // ========================================================================

    /// Registers a `Request` listener.
    ///
    /// Request listeners double as interception arbiters: they may call
    /// continue/respond/abort on the request, and are awaited strictly in
    /// registration order before the decision is finalized.
    pub fn on_request<F, Fut>(&self, listener: F)
    where
        F: Fn(Arc<HttpRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener: Listener<Arc<HttpRequest>> =
            Arc::new(move |request| Box::pin(listener(request)));
        self.inner.listeners.request.lock().push(listener);
    }

    /// Registers a `RequestServedFromCache` listener.
    pub fn on_request_served_from_cache<F, Fut>(&self, listener: F)
    where
        F: Fn(Arc<HttpRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener: Listener<Arc<HttpRequest>> =
            Arc::new(move |request| Box::pin(listener(request)));
        self.inner.listeners.served_from_cache.lock().push(listener);
    }

    /// Registers a `Response` listener.
    pub fn on_response<F, Fut>(&self, listener: F)
    where
        F: Fn(Arc<HttpResponse>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener: Listener<Arc<HttpResponse>> =
            Arc::new(move |response| Box::pin(listener(response)));
        self.inner.listeners.response.lock().push(listener);
    }

    /// Registers a `RequestFinished` listener.
    pub fn on_request_finished<F, Fut>(&self, listener: F)
    where
        F: Fn(Arc<HttpRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener: Listener<Arc<HttpRequest>> =
            Arc::new(move |request| Box::pin(listener(request)));
        self.inner.listeners.request_finished.lock().push(listener);
    }

    /// Registers a `RequestFailed` listener.
    pub fn on_request_failed<F, Fut>(&self, listener: F)
    where
        F: Fn(Arc<HttpRequest>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener: Listener<Arc<HttpRequest>> =
            Arc::new(move |request| Box::pin(listener(request)));
        self.inner.listeners.request_failed.lock().push(listener);
    }

    // ========================================================================
    // Protocol Toggles
    // ========================================================================

    async fn update_protocol_request_interception(&self) -> Result<()> {
        let (desired, changed) = {
            let mut state = self.inner.state.lock();
            let desired =
                state.user_request_interception_enabled || state.credentials.is_some();
            let changed = desired != state.protocol_request_interception_enabled;
            state.protocol_request_interception_enabled = desired;
            (desired, changed)
        };

        // The cache flag is re-synced on every toggle, matching no-op
        // toggles included.
        self.update_protocol_cache_disabled().await?;

        if !changed {
            return Ok(());
        }

        if desired {
            self.inner
                .session
                .send(
                    "Fetch.enable",
                    json!({
                        "handleAuthRequests": true,
                        "patterns": [{ "urlPattern": "*" }],
                    }),
                )
                .await?;
        } else {
            self.inner.session.send("Fetch.disable", json!({})).await?;
        }
        Ok(())
    }

    async fn update_protocol_cache_disabled(&self) -> Result<()> {
        let cache_disabled = self.inner.state.lock().user_cache_disabled;
        self.inner
            .session
            .send(
                "Network.setCacheDisabled",
                json!({ "cacheDisabled": cache_disabled }),
            )
            .await?;
        Ok(())
    }

    // ========================================================================
    // Event Driver
    // ========================================================================

    /// Consumes the session event stream until it closes.
    async fn drive(&self, mut events: mpsc::UnboundedReceiver<CdpEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event.parse()).await;
        }
        debug!("Network event stream ended");
    }

    /// Processes one event to completion.
    async fn handle_event(&self, event: ParsedEvent) {
        match event {
            ParsedEvent::RequestWillBeSent(event) => self.on_request_will_be_sent(event).await,
            ParsedEvent::RequestServedFromCache(event) => {
                self.on_request_served_from_cache_event(event).await;
            }
            ParsedEvent::ResponseReceived(event) => self.on_response_received(event).await,
            ParsedEvent::ResponseReceivedExtraInfo(event) => {
                self.on_response_received_extra_info(event).await;
            }
            ParsedEvent::LoadingFinished(event) => self.on_loading_finished(event).await,
            ParsedEvent::LoadingFailed(event) => self.on_loading_failed(event).await,
            ParsedEvent::RequestPaused(event) => self.on_request_paused(event).await,
            ParsedEvent::AuthRequired(event) => self.on_auth_required(event).await,
            ParsedEvent::Unknown { .. } => {}
        }
    }

    // ========================================================================
    // requestWillBeSent / requestPaused Pairing
    // ========================================================================

    async fn on_request_will_be_sent(&self, event: RequestWillBeSentEvent) {
        let interception_enabled = {
            self.inner.state.lock().user_request_interception_enabled
        };

        // Interception does not happen for data: URLs.
        if interception_enabled && !event.request.url.starts_with("data:") {
            let paused = {
                let mut state = self.inner.state.lock();
                state
                    .events
                    .store_will_be_sent(event.request_id.clone(), event.clone());
                state.events.take_paused(&event.request_id)
            };

            if let Some(paused) = paused {
                let fetch_request_id = paused.request_id.clone();
                let merged = merge_paused_headers(event, &paused);
                {
                    self.inner
                        .state
                        .lock()
                        .events
                        .store_will_be_sent(merged.request_id.clone(), merged.clone());
                }
                self.handle_request_will_be_sent(merged, Some(fetch_request_id)).await;
            }
            return;
        }

        self.handle_request_will_be_sent(event, None).await;
    }

    async fn on_request_paused(&self, event: RequestPausedEvent) {
        let (user_enabled, protocol_enabled) = {
            let state = self.inner.state.lock();
            (
                state.user_request_interception_enabled,
                state.protocol_request_interception_enabled,
            )
        };

        // Interception is on only for auth side effects: release the
        // request immediately, fire-and-forget.
        if !user_enabled && protocol_enabled {
            let session = self.inner.session.clone();
            let fetch_request_id = event.request_id.clone();
            tokio::spawn(async move {
                if let Err(e) = session
                    .send(
                        "Fetch.continueRequest",
                        json!({ "requestId": fetch_request_id.as_str() }),
                    )
                    .await
                {
                    debug!(error = %e, "Auto-continue failed");
                }
            });
        }

        let Some(network_request_id) = event.network_id.clone() else {
            return;
        };

        let will_be_sent = {
            let mut state = self.inner.state.lock();
            match state.events.get_will_be_sent(&network_request_id) {
                // Redirect hops reuse the network id: a buffered event
                // whose url/method disagree is a stale echo of the
                // previous hop, not this pause's counterpart.
                Some(buffered)
                    if buffered.request.url != event.request.url
                        || buffered.request.method != event.request.method =>
                {
                    state.events.forget_will_be_sent(&network_request_id);
                    None
                }
                Some(buffered) => Some(buffered.clone()),
                None => None,
            }
        };

        match will_be_sent {
            Some(will_be_sent) => {
                let fetch_request_id = event.request_id.clone();
                let merged = merge_paused_headers(will_be_sent, &event);
                {
                    self.inner
                        .state
                        .lock()
                        .events
                        .store_will_be_sent(network_request_id, merged.clone());
                }
                self.handle_request_will_be_sent(merged, Some(fetch_request_id)).await;
            }
            None => {
                self.inner
                    .state
                    .lock()
                    .events
                    .store_paused(network_request_id, event);
            }
        }
    }

    // ========================================================================
    // Request Creation & Redirects
    // ========================================================================

    async fn handle_request_will_be_sent(
        &self,
        event: RequestWillBeSentEvent,
        fetch_request_id: Option<FetchRequestId>,
    ) {
        let mut redirect_chain = Arc::new(Mutex::new(Vec::new()));

        if event.redirect_response.is_some() {
            // The previous leg's response must go out first, and it cannot
            // until its announced extra-info exists.
            let redirect_extra_info = if event.redirect_has_extra_info {
                let taken = {
                    self.inner
                        .state
                        .lock()
                        .events
                        .extra_info_queue(&event.request_id)
                        .pop_front()
                };
                match taken {
                    Some(info) => Some(info),
                    None => {
                        let request_id = event.request_id.clone();
                        self.inner.state.lock().events.queue_redirect_info(
                            request_id,
                            QueuedRedirectInfo {
                                event,
                                fetch_request_id,
                            },
                        );
                        return;
                    }
                }
            } else {
                None
            };

            let previous = {
                self.inner.state.lock().events.get_request(&event.request_id)
            };
            // A late attach can miss the hop's original requestWillBeSent.
            if let Some(previous) = previous {
                let payload = event
                    .redirect_response
                    .clone()
                    .expect("redirect branch requires a redirect response");
                let response =
                    self.retire_redirect_leg(&previous, &payload, redirect_extra_info.as_ref());
                redirect_chain = previous.chain_handle();

                self.emit_response(&response).await;
                self.emit_request_finished(&previous).await;
            }
        }

        let allow_interception = {
            self.inner.state.lock().user_request_interception_enabled
        };
        let request = HttpRequest::new(
            self.inner.session.clone(),
            &event,
            fetch_request_id,
            allow_interception,
            redirect_chain,
        );
        {
            self.inner
                .state
                .lock()
                .events
                .store_request(event.request_id.clone(), Arc::clone(&request));
        }

        self.emit_request(&request).await;

        if let Err(e) = request.finalize_interceptions().await {
            warn!(error = %e, "Interception finalization failed");
        }
    }

    /// Synthesizes the retired leg's response and moves it into the chain.
    fn retire_redirect_leg(
        &self,
        request: &Arc<HttpRequest>,
        payload: &ResponsePayload,
        extra_info: Option<&ResponseReceivedExtraInfoEvent>,
    ) -> Arc<HttpResponse> {
        let response =
            HttpResponse::new(self.inner.session.clone(), request, payload, extra_info);
        request.set_response(Arc::clone(&response));
        request.retire_into_chain();
        response.resolve_body(Err(
            "response body is unavailable for redirect responses".to_string()
        ));
        self.forget_request(request, false);
        response
    }

    /// Drops a request's tracking state.
    ///
    /// `full` also clears the pairing buffers; a retired redirect leg
    /// keeps them so later legs of the same id can consume queued
    /// extra-infos.
    fn forget_request(&self, request: &Arc<HttpRequest>, full: bool) {
        let mut state = self.inner.state.lock();
        state.events.forget_request(request.network_request_id());
        if let Some(fetch_request_id) = request.fetch_request_id() {
            state.attempted_authentications.remove(fetch_request_id);
        }
        if full {
            let request_id = request.network_request_id().clone();
            state.events.forget(&request_id);
        }
    }

    // ========================================================================
    // Response Reconciliation
    // ========================================================================

    async fn on_response_received(&self, event: ResponseReceivedEvent) {
        let request = {
            self.inner.state.lock().events.get_request(&event.request_id)
        };

        let mut extra_info = None;
        if let Some(request) = &request
            && !request.from_memory_cache()
            && event.has_extra_info
        {
            let taken = {
                self.inner
                    .state
                    .lock()
                    .events
                    .extra_info_queue(&event.request_id)
                    .pop_front()
            };
            match taken {
                Some(info) => extra_info = Some(info),
                None => {
                    // Wait for the matching extra-info.
                    self.inner.state.lock().events.queue_event_group(
                        event.request_id.clone(),
                        QueuedEventGroup {
                            response_received: event,
                            loading_finished: None,
                            loading_failed: None,
                        },
                    );
                    return;
                }
            }
        }

        self.emit_response_for(event, extra_info).await;
    }

    async fn on_response_received_extra_info(&self, event: ResponseReceivedExtraInfoEvent) {
        // A redirect hop skipped while waiting for this extra-info takes
        // priority over treating it as a normal response.
        let redirect = {
            self.inner
                .state
                .lock()
                .events
                .take_queued_redirect_info(&event.request_id)
        };
        if let Some(redirect) = redirect {
            {
                self.inner
                    .state
                    .lock()
                    .events
                    .extra_info_queue(&event.request_id)
                    .push_back(event);
            }
            self.handle_request_will_be_sent(redirect.event, redirect.fetch_request_id).await;
            return;
        }

        // A deferred response group is replayed in order: response,
        // finished, failed.
        let group = {
            self.inner
                .state
                .lock()
                .events
                .take_event_group(&event.request_id)
        };
        if let Some(group) = group {
            self.emit_response_for(group.response_received, Some(event)).await;
            if let Some(finished) = group.loading_finished {
                self.emit_loading_finished(finished).await;
            }
            if let Some(failed) = group.loading_failed {
                self.emit_loading_failed(failed).await;
            }
            return;
        }

        // Hold it until an event that can use it arrives.
        self.inner
            .state
            .lock()
            .events
            .extra_info_queue(&event.request_id)
            .push_back(event);
    }

    async fn emit_response_for(
        &self,
        event: ResponseReceivedEvent,
        extra_info: Option<ResponseReceivedExtraInfoEvent>,
    ) {
        let request = {
            self.inner.state.lock().events.get_request(&event.request_id)
        };
        let Some(request) = request else {
            return;
        };

        {
            let mut state = self.inner.state.lock();
            if !state.events.extra_info_queue(&event.request_id).is_empty() {
                debug!(request_id = %event.request_id, "Unconsumed extraInfo events");
            }
        }

        // The browser sends wrong extraInfo events for responses served
        // from disk cache.
        let extra_info = if event.response.from_disk_cache {
            None
        } else {
            extra_info
        };

        let response = HttpResponse::new(
            self.inner.session.clone(),
            &request,
            &event.response,
            extra_info.as_ref(),
        );
        request.set_response(Arc::clone(&response));
        self.emit_response(&response).await;
    }

    // ========================================================================
    // Terminal Events
    // ========================================================================

    async fn on_loading_finished(&self, event: LoadingFinishedEvent) {
        let deferred = {
            let mut state = self.inner.state.lock();
            match state.events.event_group_mut(&event.request_id) {
                Some(group) => {
                    group.loading_finished = Some(event.clone());
                    true
                }
                None => false,
            }
        };
        if !deferred {
            self.emit_loading_finished(event).await;
        }
    }

    async fn emit_loading_finished(&self, event: LoadingFinishedEvent) {
        let request = {
            self.inner.state.lock().events.get_request(&event.request_id)
        };
        let Some(request) = request else {
            return;
        };

        // Some loads never get a responseReceived at all.
        if let Some(response) = request.response() {
            response.resolve_body(Ok(()));
        }
        self.forget_request(&request, true);
        self.emit_request_finished(&request).await;
    }

    async fn on_loading_failed(&self, event: LoadingFailedEvent) {
        let deferred = {
            let mut state = self.inner.state.lock();
            match state.events.event_group_mut(&event.request_id) {
                Some(group) => {
                    group.loading_failed = Some(event.clone());
                    true
                }
                None => false,
            }
        };
        if !deferred {
            self.emit_loading_failed(event).await;
        }
    }

    async fn emit_loading_failed(&self, event: LoadingFailedEvent) {
        let request = {
            self.inner.state.lock().events.get_request(&event.request_id)
        };
        let Some(request) = request else {
            return;
        };

        request.set_failure(event.error_text.clone());
        if let Some(response) = request.response() {
            let reason = if event.error_text.is_empty() {
                "request failed".to_string()
            } else {
                event.error_text.clone()
            };
            response.resolve_body(Err(reason));
        }
        self.forget_request(&request, true);
        self.emit_request_failed(&request).await;
    }

    async fn on_request_served_from_cache_event(&self, event: RequestServedFromCacheEvent) {
        let request = {
            self.inner.state.lock().events.get_request(&event.request_id)
        };
        let Some(request) = request else {
            return;
        };
        request.set_from_memory_cache(true);
        self.emit_served_from_cache(&request).await;
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    async fn on_auth_required(&self, event: AuthRequiredEvent) {
        let (challenge_response, credentials) = {
            let mut state = self.inner.state.lock();
            if state.attempted_authentications.contains(&event.request_id) {
                // One attempt per request; a second challenge means the
                // credentials were rejected.
                ("CancelAuth", None)
            } else if state.credentials.is_some() {
                state
                    .attempted_authentications
                    .insert(event.request_id.clone());
                ("ProvideCredentials", state.credentials.clone())
            } else {
                ("Default", None)
            }
        };

        let mut challenge = json!({ "response": challenge_response });
        if let Some(credentials) = credentials {
            challenge["username"] = json!(credentials.username);
            challenge["password"] = json!(credentials.password);
        }

        let session = self.inner.session.clone();
        let request_id = event.request_id.clone();
        tokio::spawn(async move {
            if let Err(e) = session
                .send(
                    "Fetch.continueWithAuth",
                    json!({
                        "requestId": request_id.as_str(),
                        "authChallengeResponse": challenge,
                    }),
                )
                .await
            {
                if e.is_benign_interception_race() {
                    debug!(error = %e, "Auth response lost a close race");
                } else {
                    warn!(error = %e, "Fetch.continueWithAuth failed");
                }
            }
        });
    }

    // ========================================================================
    // Emission
    // ========================================================================

    async fn emit_request(&self, request: &Arc<HttpRequest>) {
        let listeners = self.inner.listeners.request.lock().clone();
        for listener in listeners {
            listener(Arc::clone(request)).await;
        }
    }

    async fn emit_served_from_cache(&self, request: &Arc<HttpRequest>) {
        let listeners = self.inner.listeners.served_from_cache.lock().clone();
        for listener in listeners {
            listener(Arc::clone(request)).await;
        }
    }

    async fn emit_response(&self, response: &Arc<HttpResponse>) {
        let listeners = self.inner.listeners.response.lock().clone();
        for listener in listeners {
            listener(Arc::clone(response)).await;
        }
    }

    async fn emit_request_finished(&self, request: &Arc<HttpRequest>) {
        let listeners = self.inner.listeners.request_finished.lock().clone();
        for listener in listeners {
            listener(Arc::clone(request)).await;
        }
    }

    async fn emit_request_failed(&self, request: &Arc<HttpRequest>) {
        let listeners = self.inner.listeners.request_failed.lock().clone();
        for listener in listeners {
            listener(Arc::clone(request)).await;
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Unions the base headers with the extras the browser added at pause
/// time (Accept, Origin, ...); the paused event wins on conflicts.
fn merge_paused_headers(
    mut event: RequestWillBeSentEvent,
    paused: &RequestPausedEvent,
) -> RequestWillBeSentEvent {
    event
        .request
        .headers
        .extend(paused.request.headers.clone());
    event
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};

    use crate::connection::{Connection, ConnectionEvent};
    use crate::error::Error;
    use crate::network::request::{ContinueOverrides, FulfillResponse};
    use crate::transport::loopback::{self, LoopbackRemote};

    /// Everything the recording listeners observed, in emission order.
    #[derive(Clone)]
    enum Emission {
        Request(Arc<HttpRequest>),
        ServedFromCache(Arc<HttpRequest>),
        Response(Arc<HttpResponse>),
        Finished(Arc<HttpRequest>),
        Failed(Arc<HttpRequest>),
    }

    impl Emission {
        fn kind(&self) -> &'static str {
            match self {
                Self::Request(_) => "request",
                Self::ServedFromCache(_) => "served-from-cache",
                Self::Response(_) => "response",
                Self::Finished(_) => "finished",
                Self::Failed(_) => "failed",
            }
        }
    }

    struct Harness {
        manager: NetworkManager,
        remote: LoopbackRemote,
        emissions: Arc<Mutex<Vec<Emission>>>,
        _connection: Connection,
    }

    impl Harness {
        fn kinds(&self) -> Vec<&'static str> {
            self.emissions.lock().iter().map(Emission::kind).collect()
        }

        fn requests(&self) -> Vec<Arc<HttpRequest>> {
            self.emissions
                .lock()
                .iter()
                .filter_map(|e| match e {
                    Emission::Request(request) => Some(Arc::clone(request)),
                    _ => None,
                })
                .collect()
        }

        fn responses(&self) -> Vec<Arc<HttpResponse>> {
            self.emissions
                .lock()
                .iter()
                .filter_map(|e| match e {
                    Emission::Response(response) => Some(Arc::clone(response)),
                    _ => None,
                })
                .collect()
        }
    }

    async fn harness() -> Harness {
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
            match events.recv().await.expect("attach event") {
                ConnectionEvent::SessionAttached { session, .. } => break session,
                _ => continue,
            }
        };

        let manager = NetworkManager::new(session, false);
        let emissions: Arc<Mutex<Vec<Emission>>> = Arc::new(Mutex::new(Vec::new()));

        {
            let emissions = Arc::clone(&emissions);
            manager.on_request(move |request| {
                emissions.lock().push(Emission::Request(request));
                async {}
            });
        }
        {
            let emissions = Arc::clone(&emissions);
            manager.on_request_served_from_cache(move |request| {
                emissions.lock().push(Emission::ServedFromCache(request));
                async {}
            });
        }
        {
            let emissions = Arc::clone(&emissions);
            manager.on_response(move |response| {
                emissions.lock().push(Emission::Response(response));
                async {}
            });
        }
        {
            let emissions = Arc::clone(&emissions);
            manager.on_request_finished(move |request| {
                emissions.lock().push(Emission::Finished(request));
                async {}
            });
        }
        {
            let emissions = Arc::clone(&emissions);
            manager.on_request_failed(move |request| {
                emissions.lock().push(Emission::Failed(request));
                async {}
            });
        }

        Harness {
            manager,
            remote,
            emissions,
            _connection: connection,
        }
    }

    /// Replies `{}` to the next `count` sent frames, returning them.
    async fn serve_ok(remote: &mut LoopbackRemote, count: usize) -> Vec<Value> {
        let mut frames = Vec::new();
        for _ in 0..count {
            let frame = remote.next_sent().await;
            remote.inject_json(json!({
                "id": frame["id"],
                "sessionId": frame["sessionId"],
                "result": {}
            }));
            frames.push(frame);
        }
        frames
    }

    fn parsed(method: &str, params: Value) -> ParsedEvent {
        CdpEvent::new(method, params).parse()
    }

    fn will_be_sent(request_id: &str, url: &str) -> ParsedEvent {
        parsed(
            "Network.requestWillBeSent",
            json!({
                "requestId": request_id,
                "loaderId": request_id,
                "documentUrl": url,
                "request": {
                    "url": url,
                    "method": "GET",
                    "headers": { "User-Agent": "test" }
                },
                "timestamp": 1.0,
                "type": "Document"
            }),
        )
    }

    fn request_paused(fetch_id: &str, network_id: &str, url: &str) -> ParsedEvent {
        parsed(
            "Fetch.requestPaused",
            json!({
                "requestId": fetch_id,
                "request": {
                    "url": url,
                    "method": "GET",
                    "headers": { "Accept": "*/*" }
                },
                "resourceType": "Document",
                "networkId": network_id
            }),
        )
    }

    fn response_received(request_id: &str, status: u16, has_extra_info: bool) -> ParsedEvent {
        parsed(
            "Network.responseReceived",
            json!({
                "requestId": request_id,
                "timestamp": 2.0,
                "type": "Document",
                "response": {
                    "url": "http://a.test/",
                    "status": status,
                    "statusText": "OK",
                    "headers": { "Content-Type": "text/html" }
                },
                "hasExtraInfo": has_extra_info
            }),
        )
    }

    fn extra_info(request_id: &str, status: u16) -> ParsedEvent {
        parsed(
            "Network.responseReceivedExtraInfo",
            json!({
                "requestId": request_id,
                "headers": { "x-extra": "1" },
                "statusCode": status,
                "headersText": format!("HTTP/1.1 {status} Extra\r\n")
            }),
        )
    }

    fn loading_finished(request_id: &str) -> ParsedEvent {
        parsed(
            "Network.loadingFinished",
            json!({ "requestId": request_id, "timestamp": 3.0, "encodedDataLength": 42 }),
        )
    }

    fn redirect_hop(request_id: &str, from_url: &str, to_url: &str, status: u16) -> ParsedEvent {
        parsed(
            "Network.requestWillBeSent",
            json!({
                "requestId": request_id,
                "loaderId": request_id,
                "documentUrl": to_url,
                "request": { "url": to_url, "method": "GET", "headers": {} },
                "timestamp": 1.5,
                "type": "Document",
                "redirectResponse": {
                    "url": from_url,
                    "status": status,
                    "statusText": "Found",
                    "headers": { "location": to_url }
                }
            }),
        )
    }

    // ========================================================================
    // Pairing Orders
    // ========================================================================

    #[tokio::test]
    async fn test_will_be_sent_then_paused_emits_one_request() {
        let mut h = harness().await;
        let (toggled, _) = tokio::join!(
            h.manager.set_request_interception(true),
            serve_ok(&mut h.remote, 2)
        );
        toggled.expect("toggle");

        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/"))
            .await;
        assert!(h.requests().is_empty());

        h.manager
            .handle_event(request_paused("F1", "1000.1", "http://a.test/"))
            .await;

        let requests = h.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(
            request.fetch_request_id().map(|id| id.as_str()),
            Some("F1")
        );
        // Header union of both events.
        assert_eq!(request.headers().get("user-agent").map(String::as_str), Some("test"));
        assert_eq!(request.headers().get("accept").map(String::as_str), Some("*/*"));
    }

    #[tokio::test]
    async fn test_paused_then_will_be_sent_emits_one_request() {
        let mut h = harness().await;
        let (toggled, _) = tokio::join!(
            h.manager.set_request_interception(true),
            serve_ok(&mut h.remote, 2)
        );
        toggled.expect("toggle");

        h.manager
            .handle_event(request_paused("F1", "1000.1", "http://a.test/"))
            .await;
        assert!(h.requests().is_empty());

        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/"))
            .await;

        let requests = h.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].fetch_request_id().map(|id| id.as_str()),
            Some("F1")
        );
        assert_eq!(
            requests[0].headers().get("accept").map(String::as_str),
            Some("*/*")
        );
    }

    #[tokio::test]
    async fn test_interception_disabled_emits_immediately() {
        let h = harness().await;

        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/"))
            .await;

        let requests = h.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].fetch_request_id().is_none());
    }

    #[tokio::test]
    async fn test_stale_redirect_echo_does_not_pair() {
        let mut h = harness().await;
        let (toggled, _) = tokio::join!(
            h.manager.set_request_interception(true),
            serve_ok(&mut h.remote, 2)
        );
        toggled.expect("toggle");

        // Buffered hop for the old URL; the pause is for the new one.
        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/old"))
            .await;
        h.manager
            .handle_event(request_paused("F2", "1000.1", "http://a.test/new"))
            .await;
        assert!(h.requests().is_empty());

        // The new hop's will-be-sent pairs with the buffered pause.
        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/new"))
            .await;

        let requests = h.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url(), "http://a.test/new");
        assert_eq!(
            requests[0].fetch_request_id().map(|id| id.as_str()),
            Some("F2")
        );
    }

    #[tokio::test]
    async fn test_data_url_skips_interception_buffering() {
        let mut h = harness().await;
        let (toggled, _) = tokio::join!(
            h.manager.set_request_interception(true),
            serve_ok(&mut h.remote, 2)
        );
        toggled.expect("toggle");

        h.manager
            .handle_event(will_be_sent("1000.1", "data:text/plain,hi"))
            .await;

        // Emitted immediately, without waiting for a pause that will
        // never come.
        let requests = h.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].fetch_request_id().is_none());
    }

    // ========================================================================
    // Interception Dispatch
    // ========================================================================

    #[tokio::test]
    async fn test_listener_continue_issues_one_continue_request() {
        let mut h = harness().await;
        let (toggled, _) = tokio::join!(
            h.manager.set_request_interception(true),
            serve_ok(&mut h.remote, 2)
        );
        toggled.expect("toggle");

        h.manager.on_request(|request| async move {
            request
                .continue_request(ContinueOverrides::none(), Some(0))
                .await
                .expect("continue");
        });

        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/"))
            .await;

        let manager = h.manager.clone();
        let handle = tokio::spawn(async move {
            manager
                .handle_event(request_paused("F1", "1000.1", "http://a.test/"))
                .await;
        });

        let frame = h.remote.next_sent().await;
        assert_eq!(frame["method"], "Fetch.continueRequest");
        assert_eq!(frame["params"]["requestId"], "F1");
        h.remote
            .inject_json(json!({ "id": frame["id"], "sessionId": frame["sessionId"], "result": {} }));

        handle.await.expect("join");
        assert!(h.remote.try_next_sent().is_none());
    }

    #[tokio::test]
    async fn test_listener_respond_fulfills_with_content_length() {
        let mut h = harness().await;
        let (toggled, _) = tokio::join!(
            h.manager.set_request_interception(true),
            serve_ok(&mut h.remote, 2)
        );
        toggled.expect("toggle");

        h.manager.on_request(|request| async move {
            let response = FulfillResponse::new()
                .status(201)
                .content_type("text/plain")
                .body("made up");
            request.respond(response, Some(0)).await.expect("respond");
        });

        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/"))
            .await;

        let manager = h.manager.clone();
        let handle = tokio::spawn(async move {
            manager
                .handle_event(request_paused("F1", "1000.1", "http://a.test/"))
                .await;
        });

        let frame = h.remote.next_sent().await;
        assert_eq!(frame["method"], "Fetch.fulfillRequest");
        assert_eq!(frame["params"]["responseCode"], 201);
        assert_eq!(frame["params"]["responsePhrase"], "Created");

        let headers = frame["params"]["responseHeaders"]
            .as_array()
            .expect("headers array");
        let content_length = headers
            .iter()
            .find(|h| h["name"] == "content-length")
            .expect("auto content-length");
        assert_eq!(content_length["value"], "7");

        h.remote
            .inject_json(json!({ "id": frame["id"], "sessionId": frame["sessionId"], "result": {} }));
        handle.await.expect("join");
    }

    // ========================================================================
    // Extra-Info Reconciliation
    // ========================================================================

    #[tokio::test]
    async fn test_response_deferred_until_extra_info() {
        let h = harness().await;

        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/"))
            .await;
        h.manager
            .handle_event(response_received("1000.1", 200, true))
            .await;

        // Announced extra-info is missing: no response yet.
        assert_eq!(h.kinds(), vec!["request"]);

        h.manager.handle_event(extra_info("1000.1", 206)).await;

        let responses = h.responses();
        assert_eq!(responses.len(), 1);
        // Extra-info status, headers, and reason phrase take precedence.
        assert_eq!(responses[0].status(), 206);
        assert_eq!(responses[0].status_text(), "Extra");
        assert_eq!(
            responses[0].headers().get("x-extra").map(String::as_str),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_queued_event_group_replays_in_order() {
        let h = harness().await;

        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/"))
            .await;
        h.manager
            .handle_event(response_received("1000.1", 200, true))
            .await;
        h.manager.handle_event(loading_finished("1000.1")).await;

        // Both the response and its finish are parked.
        assert_eq!(h.kinds(), vec!["request"]);

        h.manager.handle_event(extra_info("1000.1", 200)).await;

        assert_eq!(h.kinds(), vec!["request", "response", "finished"]);
        assert_eq!(h.manager.in_flight_requests(), 0);
    }

    #[tokio::test]
    async fn test_extra_info_second_emits_immediately() {
        let h = harness().await;

        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/"))
            .await;
        h.manager.handle_event(extra_info("1000.1", 200)).await;
        h.manager
            .handle_event(response_received("1000.1", 200, true))
            .await;

        assert_eq!(h.kinds(), vec!["request", "response"]);
    }

    // ========================================================================
    // Redirects
    // ========================================================================

    #[tokio::test]
    async fn test_three_hop_redirect_chain() {
        let h = harness().await;

        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/one"))
            .await;
        h.manager
            .handle_event(redirect_hop("1000.1", "http://a.test/one", "http://a.test/two", 301))
            .await;
        h.manager
            .handle_event(redirect_hop("1000.1", "http://a.test/two", "http://a.test/three", 302))
            .await;
        h.manager
            .handle_event(response_received("1000.1", 200, false))
            .await;
        h.manager.handle_event(loading_finished("1000.1")).await;

        // Retired legs finish strictly before the next leg's request.
        assert_eq!(
            h.kinds(),
            vec![
                "request", "response", "finished", "request", "response", "finished",
                "request", "response", "finished",
            ]
        );

        let requests = h.requests();
        let last = requests.last().expect("final leg");
        assert_eq!(last.url(), "http://a.test/three");

        let chain = last.redirect_chain();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].url(), "http://a.test/one");
        assert_eq!(chain[1].url(), "http://a.test/two");

        // Each retired leg reports its own status with an unavailable
        // body.
        let first_leg = chain[0].response().expect("leg response");
        assert_eq!(first_leg.status(), 301);
        let err = first_leg.body().await.unwrap_err();
        assert!(matches!(err, Error::BodyUnavailable { .. }));

        assert_eq!(chain[1].response().expect("leg response").status(), 302);
    }

    #[tokio::test]
    async fn test_redirect_waits_for_announced_extra_info() {
        let h = harness().await;

        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/one"))
            .await;

        let hop = parsed(
            "Network.requestWillBeSent",
            json!({
                "requestId": "1000.1",
                "loaderId": "1000.1",
                "documentUrl": "http://a.test/two",
                "request": { "url": "http://a.test/two", "method": "GET", "headers": {} },
                "timestamp": 1.5,
                "type": "Document",
                "redirectHasExtraInfo": true,
                "redirectResponse": {
                    "url": "http://a.test/one",
                    "status": 302,
                    "statusText": "Found",
                    "headers": {}
                }
            }),
        );
        h.manager.handle_event(hop).await;

        // The whole hop is deferred on the missing extra-info.
        assert_eq!(h.kinds(), vec!["request"]);

        h.manager.handle_event(extra_info("1000.1", 302)).await;

        assert_eq!(h.kinds(), vec!["request", "response", "finished", "request"]);
        let responses = h.responses();
        assert_eq!(responses[0].status(), 302);
        assert_eq!(h.requests()[1].url(), "http://a.test/two");
    }

    // ========================================================================
    // Terminal Events
    // ========================================================================

    #[tokio::test]
    async fn test_loading_failed_carries_error_text() {
        let h = harness().await;

        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/"))
            .await;
        h.manager
            .handle_event(response_received("1000.1", 200, false))
            .await;
        h.manager
            .handle_event(parsed(
                "Network.loadingFailed",
                json!({
                    "requestId": "1000.1",
                    "timestamp": 3.0,
                    "type": "Document",
                    "errorText": "net::ERR_CONNECTION_RESET",
                    "canceled": false
                }),
            ))
            .await;

        assert_eq!(h.kinds(), vec!["request", "response", "failed"]);
        let request = &h.requests()[0];
        assert_eq!(
            request.failure().as_deref(),
            Some("net::ERR_CONNECTION_RESET")
        );

        // The body rejects with the failure, distinct from an empty body.
        let err = h.responses()[0].body().await.unwrap_err();
        assert!(err.to_string().contains("net::ERR_CONNECTION_RESET"));
        assert_eq!(h.manager.in_flight_requests(), 0);
    }

    #[tokio::test]
    async fn test_served_from_cache_marks_request() {
        let h = harness().await;

        h.manager
            .handle_event(will_be_sent("1000.1", "http://a.test/"))
            .await;
        h.manager
            .handle_event(parsed(
                "Network.requestServedFromCache",
                json!({ "requestId": "1000.1" }),
            ))
            .await;

        assert_eq!(h.kinds(), vec!["request", "served-from-cache"]);
        assert!(h.requests()[0].from_memory_cache());

        // Memory-cached responses skip extra-info pairing entirely.
        h.manager
            .handle_event(response_received("1000.1", 200, true))
            .await;
        assert_eq!(h.kinds(), vec!["request", "served-from-cache", "response"]);
    }

    // ========================================================================
    // Protocol Toggles & Init
    // ========================================================================

    #[tokio::test]
    async fn test_initialize_is_memoized() {
        let mut h = harness().await;

        let first = h.manager.clone();
        let second = h.manager.clone();
        let (a, b, _) = tokio::join!(
            first.initialize(),
            second.initialize(),
            serve_ok(&mut h.remote, 1)
        );
        a.expect("first init");
        b.expect("second init");

        // Exactly one Network.enable went out.
        assert!(h.remote.try_next_sent().is_none());

        h.manager.initialize().await.expect("third init");
        assert!(h.remote.try_next_sent().is_none());
    }

    #[tokio::test]
    async fn test_noop_toggle_still_syncs_cache_flag() {
        let mut h = harness().await;

        // Already disabled; desired state matches current state.
        let (result, frames) = tokio::join!(
            h.manager.set_request_interception(false),
            serve_ok(&mut h.remote, 1)
        );
        result.expect("toggle");

        assert_eq!(frames[0]["method"], "Network.setCacheDisabled");
        // No Fetch.enable / Fetch.disable went out.
        assert!(h.remote.try_next_sent().is_none());
    }

    #[tokio::test]
    async fn test_credentials_enable_interception_and_auto_continue() {
        let mut h = harness().await;

        let (result, frames) = tokio::join!(
            h.manager.authenticate(Some(Credentials {
                username: "user".to_string(),
                password: "secret".to_string(),
            })),
            serve_ok(&mut h.remote, 2)
        );
        result.expect("authenticate");
        assert_eq!(frames[1]["method"], "Fetch.enable");
        assert_eq!(frames[1]["params"]["handleAuthRequests"], true);

        // User interception is off, so paused requests are released
        // automatically.
        h.manager
            .handle_event(request_paused("F1", "1000.1", "http://a.test/"))
            .await;

        let frame = h.remote.next_sent().await;
        assert_eq!(frame["method"], "Fetch.continueRequest");
        assert_eq!(frame["params"]["requestId"], "F1");
        h.remote
            .inject_json(json!({ "id": frame["id"], "sessionId": frame["sessionId"], "result": {} }));
    }

    #[tokio::test]
    async fn test_auth_loop_guard_cancels_second_challenge() {
        let mut h = harness().await;

        let (result, _) = tokio::join!(
            h.manager.authenticate(Some(Credentials {
                username: "user".to_string(),
                password: "secret".to_string(),
            })),
            serve_ok(&mut h.remote, 2)
        );
        result.expect("authenticate");

        let auth_required = || {
            parsed(
                "Fetch.authRequired",
                json!({
                    "requestId": "F1",
                    "request": { "url": "http://a.test/", "method": "GET", "headers": {} },
                    "authChallenge": {
                        "origin": "http://a.test",
                        "scheme": "basic",
                        "realm": "secrets"
                    }
                }),
            )
        };

        h.manager.handle_event(auth_required()).await;
        let frame = h.remote.next_sent().await;
        assert_eq!(frame["method"], "Fetch.continueWithAuth");
        assert_eq!(
            frame["params"]["authChallengeResponse"]["response"],
            "ProvideCredentials"
        );
        assert_eq!(frame["params"]["authChallengeResponse"]["username"], "user");
        h.remote
            .inject_json(json!({ "id": frame["id"], "sessionId": frame["sessionId"], "result": {} }));

        // Same attempt challenged again: cancel instead of looping.
        h.manager.handle_event(auth_required()).await;
        let frame = h.remote.next_sent().await;
        assert_eq!(
            frame["params"]["authChallengeResponse"]["response"],
            "CancelAuth"
        );
        h.remote
            .inject_json(json!({ "id": frame["id"], "sessionId": frame["sessionId"], "result": {} }));
    }
}
