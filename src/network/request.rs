//! Per-attempt request object and interception arbitration.
//!
//! A request is created once its `requestWillBeSent`/`requestPaused`
//! pairing resolves. When interception is enabled, cooperating listeners
//! file continue/respond/abort decisions — optionally with a priority —
//! and exactly one protocol call is dispatched at finalization.
//!
//! # Arbitration
//!
//! Decisions without a priority act immediately and exclusively. With
//! priorities, the stored `{action, priority}` is only ever upgraded:
//!
//! - a strictly higher priority always overwrites
//! - at equal priority, `abort` wins and is never overwritten;
//!   `respond` overwrites `continue` but not `abort`; `continue`
//!   overwrites nothing
//! - a lower priority is ignored
//!
//! `data:` URLs bypass interception entirely.

// ============================================================================
// Imports
// ============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::debug;

use crate::connection::CdpSession;
use crate::error::{Error, Result};
use crate::identifiers::{FetchRequestId, NetworkRequestId};
use crate::network::response::HttpResponse;
use crate::protocol::{ErrorReason, HeaderEntry, RequestWillBeSentEvent, status_text};

// ============================================================================
// Types
// ============================================================================

/// The shared, append-only redirect chain.
///
/// Every leg of a redirect chain holds the same handle; appends are
/// visible to all holders.
pub(crate) type RedirectChain = Arc<Mutex<Vec<Arc<HttpRequest>>>>;

// ============================================================================
// InterceptResolutionAction
// ============================================================================

/// Current arbitration outcome for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptResolutionAction {
    /// No decision filed yet.
    None,
    /// The request will be continued.
    Continue,
    /// The request will be fulfilled with a synthetic response.
    Respond,
    /// The request will be failed.
    Abort,
    /// A decision was already dispatched.
    AlreadyHandled,
    /// Interception was never enabled for this request.
    Disabled,
}

/// Arbitration outcome plus the priority that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterceptResolution {
    /// Current action.
    pub action: InterceptResolutionAction,
    /// Priority of the stored action; `None` for legacy decisions.
    pub priority: Option<i32>,
}

// ============================================================================
// ContinueOverrides
// ============================================================================

/// Overrides applied when continuing an intercepted request.
#[derive(Debug, Clone, Default)]
pub struct ContinueOverrides {
    /// Replacement URL.
    pub url: Option<String>,

    /// Replacement HTTP method.
    pub method: Option<String>,

    /// Replacement body.
    pub post_data: Option<String>,

    /// Replacement headers.
    pub headers: Option<HashMap<String, String>>,
}

impl ContinueOverrides {
    /// Creates empty overrides (continue unchanged).
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

// ============================================================================
// FulfillResponse
// ============================================================================

/// Synthetic response fulfilling an intercepted request.
#[derive(Debug, Clone, Default)]
pub struct FulfillResponse {
    /// Status code; 200 when absent.
    pub status: Option<u16>,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Shorthand for the `content-type` header.
    pub content_type: Option<String>,

    /// Response body.
    pub body: Option<Vec<u8>>,
}

impl FulfillResponse {
    /// Creates an empty 200 response.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status code.
    #[inline]
    #[must_use]
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Adds a header.
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the content type.
    #[inline]
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the body.
    #[inline]
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

// ============================================================================
// Internal State
// ============================================================================

/// Mutable lifecycle state.
#[derive(Default)]
struct RequestState {
    response: Option<Arc<HttpResponse>>,
    failure_text: Option<String>,
    from_memory_cache: bool,
}

/// Mutable arbitration state.
struct InterceptionState {
    handled: bool,
    action: InterceptResolutionAction,
    priority: Option<i32>,
    continue_overrides: Option<ContinueOverrides>,
    response_for_request: Option<FulfillResponse>,
    abort_reason: Option<ErrorReason>,
}

impl Default for InterceptionState {
    fn default() -> Self {
        Self {
            handled: false,
            action: InterceptResolutionAction::None,
            priority: None,
            continue_overrides: None,
            response_for_request: None,
            abort_reason: None,
        }
    }
}

// ============================================================================
// HttpRequest
// ============================================================================

/// One request attempt.
///
/// A redirect retires the current attempt into the shared chain and spawns
/// a fresh `HttpRequest` for the next hop.
pub struct HttpRequest {
    session: CdpSession,
    network_request_id: NetworkRequestId,
    fetch_request_id: Option<FetchRequestId>,
    allow_interception: bool,

    url: String,
    method: String,
    headers: HashMap<String, String>,
    post_data: Option<String>,
    resource_type: String,
    initiator: Option<Value>,
    is_navigation: bool,

    redirect_chain: RedirectChain,
    state: Mutex<RequestState>,
    interception: Mutex<InterceptionState>,
    deferred_actions: Mutex<VecDeque<BoxFuture<'static, ()>>>,
}

impl HttpRequest {
    /// Builds a request from a fully-paired `requestWillBeSent`.
    pub(crate) fn new(
        session: CdpSession,
        event: &RequestWillBeSentEvent,
        fetch_request_id: Option<FetchRequestId>,
        allow_interception: bool,
        redirect_chain: RedirectChain,
    ) -> Arc<Self> {
        let headers = event
            .request
            .headers
            .iter()
            .map(|(name, value)| (name.to_lowercase(), value.clone()))
            .collect();

        let resource_type = event
            .resource_type
            .as_deref()
            .unwrap_or("Other")
            .to_lowercase();

        let is_navigation = event.request_id.as_str() == event.loader_id
            && event.resource_type.as_deref() == Some("Document");

        Arc::new(Self {
            session,
            network_request_id: event.request_id.clone(),
            fetch_request_id,
            allow_interception,
            url: event.request.url.clone(),
            method: event.request.method.clone(),
            headers,
            post_data: event.request.post_data.clone(),
            resource_type,
            initiator: event.initiator.clone(),
            is_navigation,
            redirect_chain,
            state: Mutex::new(RequestState::default()),
            interception: Mutex::new(InterceptionState::default()),
            deferred_actions: Mutex::new(VecDeque::new()),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the request URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the HTTP method.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the request headers, keys lower-cased.
    ///
    /// When the request was intercepted, this is the union of the base
    /// headers and the extras the browser added at pause time.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Returns the posted body, when the browser inlined it.
    #[inline]
    #[must_use]
    pub fn post_data(&self) -> Option<&str> {
        self.post_data.as_deref()
    }

    /// Returns the resource type, lower-cased (`document`, `xhr`, ...).
    #[inline]
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the initiator description.
    #[inline]
    #[must_use]
    pub fn initiator(&self) -> Option<&Value> {
        self.initiator.as_ref()
    }

    /// Returns `true` for a top-document navigation request.
    #[inline]
    #[must_use]
    pub fn is_navigation_request(&self) -> bool {
        self.is_navigation
    }

    /// Returns the redirect-stable network request id.
    #[inline]
    #[must_use]
    pub fn network_request_id(&self) -> &NetworkRequestId {
        &self.network_request_id
    }

    /// Returns the per-attempt interception id, when intercepted.
    #[inline]
    #[must_use]
    pub fn fetch_request_id(&self) -> Option<&FetchRequestId> {
        self.fetch_request_id.as_ref()
    }

    /// Returns the prior attempts that led here, in traversal order.
    #[must_use]
    pub fn redirect_chain(&self) -> Vec<Arc<HttpRequest>> {
        self.redirect_chain.lock().clone()
    }

    /// Returns the response, once one was received.
    #[must_use]
    pub fn response(&self) -> Option<Arc<HttpResponse>> {
        self.state.lock().response.clone()
    }

    /// Returns the failure text, once the request failed.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        self.state.lock().failure_text.clone()
    }

    /// Returns `true` if served from the memory cache.
    #[must_use]
    pub fn from_memory_cache(&self) -> bool {
        self.state.lock().from_memory_cache
    }

    // ========================================================================
    // Lifecycle Mutation (manager-driven)
    // ========================================================================

    pub(crate) fn set_response(&self, response: Arc<HttpResponse>) {
        self.state.lock().response = Some(response);
    }

    pub(crate) fn set_failure(&self, error_text: impl Into<String>) {
        self.state.lock().failure_text = Some(error_text.into());
    }

    pub(crate) fn set_from_memory_cache(&self, value: bool) {
        self.state.lock().from_memory_cache = value;
    }

    /// Appends this attempt to the shared chain, visible to every holder.
    pub(crate) fn retire_into_chain(self: &Arc<Self>) {
        self.redirect_chain.lock().push(Arc::clone(self));
    }

    pub(crate) fn chain_handle(&self) -> RedirectChain {
        Arc::clone(&self.redirect_chain)
    }

    // ========================================================================
    // Interception Arbitration
    // ========================================================================

    /// Returns the current arbitration outcome.
    #[must_use]
    pub fn interception_resolution(&self) -> InterceptResolution {
        if !self.allow_interception {
            return InterceptResolution {
                action: InterceptResolutionAction::Disabled,
                priority: None,
            };
        }
        let st = self.interception.lock();
        if st.handled {
            return InterceptResolution {
                action: InterceptResolutionAction::AlreadyHandled,
                priority: None,
            };
        }
        InterceptResolution {
            action: st.action,
            priority: st.priority,
        }
    }

    /// Files a continue decision.
    ///
    /// Without a priority the decision is dispatched immediately; with one
    /// it participates in arbitration until finalization.
    ///
    /// # Errors
    ///
    /// - [`Error::InterceptionNotEnabled`] if interception is off
    /// - [`Error::RequestAlreadyHandled`] after a dispatched decision
    pub async fn continue_request(
        &self,
        overrides: ContinueOverrides,
        priority: Option<i32>,
    ) -> Result<()> {
        if self.url.starts_with("data:") {
            return Ok(());
        }
        if !self.allow_interception {
            return Err(Error::InterceptionNotEnabled);
        }

        {
            let mut st = self.interception.lock();
            if st.handled {
                return Err(Error::RequestAlreadyHandled);
            }
            if let Some(priority) = priority {
                st.continue_overrides = Some(overrides);
                match st.priority {
                    None => {
                        st.action = InterceptResolutionAction::Continue;
                        st.priority = Some(priority);
                    }
                    Some(stored) if priority > stored => {
                        st.action = InterceptResolutionAction::Continue;
                        st.priority = Some(priority);
                    }
                    Some(stored) if priority == stored => {
                        // Continue never displaces an equal-priority
                        // respond or abort.
                        if !matches!(
                            st.action,
                            InterceptResolutionAction::Respond | InterceptResolutionAction::Abort
                        ) {
                            st.action = InterceptResolutionAction::Continue;
                        }
                    }
                    Some(_) => {}
                }
                return Ok(());
            }
        }

        self.dispatch_continue(overrides).await
    }

    /// Files a respond decision.
    ///
    /// # Errors
    ///
    /// Same as [`continue_request`](Self::continue_request).
    pub async fn respond(&self, response: FulfillResponse, priority: Option<i32>) -> Result<()> {
        if self.url.starts_with("data:") {
            return Ok(());
        }
        if !self.allow_interception {
            return Err(Error::InterceptionNotEnabled);
        }

        {
            let mut st = self.interception.lock();
            if st.handled {
                return Err(Error::RequestAlreadyHandled);
            }
            if let Some(priority) = priority {
                st.response_for_request = Some(response);
                match st.priority {
                    None => {
                        st.action = InterceptResolutionAction::Respond;
                        st.priority = Some(priority);
                    }
                    Some(stored) if priority > stored => {
                        st.action = InterceptResolutionAction::Respond;
                        st.priority = Some(priority);
                    }
                    Some(stored) if priority == stored => {
                        // Respond displaces an equal-priority continue but
                        // never an abort.
                        if st.action != InterceptResolutionAction::Abort {
                            st.action = InterceptResolutionAction::Respond;
                        }
                    }
                    Some(_) => {}
                }
                return Ok(());
            }
        }

        self.dispatch_respond(response).await
    }

    /// Files an abort decision.
    ///
    /// `error_code` is one of the lower-case reason names, e.g. `failed`,
    /// `aborted`, `blockedbyclient`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an unknown error code
    /// - otherwise same as [`continue_request`](Self::continue_request)
    pub async fn abort(&self, error_code: &str, priority: Option<i32>) -> Result<()> {
        if self.url.starts_with("data:") {
            return Ok(());
        }
        let reason = ErrorReason::from_code(error_code)
            .ok_or_else(|| Error::invalid_argument(format!("unknown abort error code: {error_code}")))?;
        if !self.allow_interception {
            return Err(Error::InterceptionNotEnabled);
        }

        {
            let mut st = self.interception.lock();
            if st.handled {
                return Err(Error::RequestAlreadyHandled);
            }
            if let Some(priority) = priority {
                st.abort_reason = Some(reason);
                // Abort wins every equal-or-lower tie and is terminal at
                // its priority.
                if st.priority.is_none_or(|stored| priority >= stored) {
                    st.action = InterceptResolutionAction::Abort;
                    st.priority = Some(priority);
                }
                return Ok(());
            }
        }

        self.dispatch_abort(reason).await
    }

    /// Defers an interception action until finalization.
    ///
    /// Deferred actions run strictly in registration order before the
    /// final decision is read.
    pub fn enqueue_intercept_action<F>(&self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.deferred_actions.lock().push_back(Box::pin(action));
    }

    /// Drains deferred actions, then dispatches the resolved decision.
    ///
    /// # Panics
    ///
    /// Panics if a respond resolution has no stored response; that is a
    /// listener bug, not a runtime condition.
    ///
    /// # Errors
    ///
    /// Propagates non-benign dispatch failures.
    pub async fn finalize_interceptions(&self) -> Result<()> {
        loop {
            let action = self.deferred_actions.lock().pop_front();
            match action {
                Some(action) => action.await,
                None => break,
            }
        }

        let (action, overrides, response, reason) = {
            let st = self.interception.lock();
            (
                st.action,
                st.continue_overrides.clone(),
                st.response_for_request.clone(),
                st.abort_reason,
            )
        };

        match action {
            InterceptResolutionAction::Abort => {
                self.dispatch_abort(reason.unwrap_or(ErrorReason::Failed)).await
            }
            InterceptResolutionAction::Respond => {
                let response =
                    response.expect("respond() resolution without a stored response");
                self.dispatch_respond(response).await
            }
            InterceptResolutionAction::Continue => {
                self.dispatch_continue(overrides.unwrap_or_default()).await
            }
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Interception Dispatch
    // ========================================================================

    fn mark_handled(&self, handled: bool) {
        self.interception.lock().handled = handled;
    }

    fn interception_id(&self, method: &str) -> Result<&FetchRequestId> {
        self.fetch_request_id
            .as_ref()
            .ok_or_else(|| Error::invalid_argument(format!("request has no interception id for {method}")))
    }

    async fn dispatch_continue(&self, overrides: ContinueOverrides) -> Result<()> {
        let fetch_request_id = self.interception_id("Fetch.continueRequest")?;

        // Handled is flipped before the call so a duplicate decision
        // racing this dispatch is rejected.
        self.mark_handled(true);

        let mut params = json!({ "requestId": fetch_request_id.as_str() });
        if let Some(url) = overrides.url {
            params["url"] = json!(url);
        }
        if let Some(method) = overrides.method {
            params["method"] = json!(method);
        }
        if let Some(post_data) = overrides.post_data {
            params["postData"] = json!(Base64Standard.encode(post_data));
        }
        if let Some(headers) = overrides.headers {
            params["headers"] = serde_json::to_value(HeaderEntry::from_map(&headers))?;
        }

        match self.session.send("Fetch.continueRequest", params).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.mark_handled(false);
                swallow_benign(e, "Fetch.continueRequest")
            }
        }
    }

    async fn dispatch_respond(&self, response: FulfillResponse) -> Result<()> {
        let fetch_request_id = self.interception_id("Fetch.fulfillRequest")?;

        self.mark_handled(true);

        let mut headers: HashMap<String, String> = response
            .headers
            .iter()
            .map(|(name, value)| (name.to_lowercase(), value.clone()))
            .collect();
        if let Some(content_type) = response.content_type {
            headers.insert("content-type".to_string(), content_type);
        }
        if let Some(body) = &response.body
            && !headers.contains_key("content-length")
        {
            headers.insert("content-length".to_string(), body.len().to_string());
        }

        let status = response.status.unwrap_or(200);
        let mut params = json!({
            "requestId": fetch_request_id.as_str(),
            "responseCode": status,
            "responseHeaders": serde_json::to_value(HeaderEntry::from_map(&headers))?,
        });
        let phrase = status_text(status);
        if !phrase.is_empty() {
            params["responsePhrase"] = json!(phrase);
        }
        if let Some(body) = response.body {
            params["body"] = json!(Base64Standard.encode(body));
        }

        match self.session.send("Fetch.fulfillRequest", params).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.mark_handled(false);
                swallow_benign(e, "Fetch.fulfillRequest")
            }
        }
    }

    async fn dispatch_abort(&self, reason: ErrorReason) -> Result<()> {
        let fetch_request_id = self.interception_id("Fetch.failRequest")?;

        self.mark_handled(true);

        let params = json!({
            "requestId": fetch_request_id.as_str(),
            "errorReason": serde_json::to_value(reason)?,
        });

        match self.session.send("Fetch.failRequest", params).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.mark_handled(false);
                swallow_benign(e, "Fetch.failRequest")
            }
        }
    }
}

/// Logs and swallows expected close/navigation races; surfaces the rest.
fn swallow_benign(error: Error, context: &str) -> Result<()> {
    if error.is_benign_interception_race() {
        debug!(error = %error, context, "Interception decision lost a close race");
        Ok(())
    } else {
        Err(error)
    }
}

// ============================================================================
// Tests
// ============================================================================
