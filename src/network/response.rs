//! Response object with lazily-loaded body.
//!
//! A response is built from the base `responseReceived` payload and, when
//! the browser announced one, its extra-info event — whose status and
//! headers take precedence. The body is not fetched until asked for, and
//! not before the load reached finished/failed.

// ============================================================================
// Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use serde_json::{Value, json};
use tokio::sync::watch;

use crate::connection::CdpSession;
use crate::error::{Error, Result};
use crate::identifiers::NetworkRequestId;
use crate::network::request::HttpRequest;
use crate::protocol::{ResponsePayload, ResponseReceivedExtraInfoEvent, SecurityDetails};

// ============================================================================
// Types
// ============================================================================

/// Outcome of the load, fired by finished/failed.
#[derive(Debug, Clone)]
enum BodyLoadState {
    /// The load completed; the body can be fetched.
    Ready,
    /// The load did not produce a fetchable body.
    Unavailable(String),
}

// ============================================================================
// RemoteAddress
// ============================================================================

/// Remote endpoint a response was served from.
#[derive(Debug, Clone, Default)]
pub struct RemoteAddress {
    /// Remote IP address.
    pub ip: Option<String>,

    /// Remote port.
    pub port: Option<u16>,
}

// ============================================================================
// HttpResponse
// ============================================================================

/// A received response, attached to exactly one request attempt.
pub struct HttpResponse {
    session: CdpSession,
    request_id: NetworkRequestId,
    request: Weak<HttpRequest>,

    url: String,
    status: u16,
    status_text: String,
    headers: HashMap<String, String>,
    remote_address: RemoteAddress,
    security_details: Option<SecurityDetails>,
    timing: Option<Value>,
    from_disk_cache: bool,
    from_service_worker: bool,

    /// Body-loaded signal; pending until finished/failed resolves it.
    body_signal: watch::Sender<Option<BodyLoadState>>,
}

impl HttpResponse {
    /// Builds a response for a request attempt.
    ///
    /// Extra-info status and headers override the base payload; the reason
    /// phrase prefers the extra-info raw status line.
    pub(crate) fn new(
        session: CdpSession,
        request: &Arc<HttpRequest>,
        payload: &ResponsePayload,
        extra_info: Option<&ResponseReceivedExtraInfoEvent>,
    ) -> Arc<Self> {
        let status = extra_info.map_or(payload.status, |info| info.status_code);
        let status_text = extra_info
            .and_then(ResponseReceivedExtraInfoEvent::status_text)
            .unwrap_or_else(|| payload.status_text.clone());

        let raw_headers = extra_info.map_or(&payload.headers, |info| &info.headers);
        let headers = raw_headers
            .iter()
            .map(|(name, value)| (name.to_lowercase(), value.clone()))
            .collect();

        let (body_signal, _) = watch::channel(None);

        Arc::new(Self {
            session,
            request_id: request.network_request_id().clone(),
            request: Arc::downgrade(request),
            url: request.url().to_string(),
            status,
            status_text,
            headers,
            remote_address: RemoteAddress {
                ip: payload.remote_ip_address.clone(),
                port: payload.remote_port,
            },
            security_details: payload.security_details.clone(),
            timing: payload.timing.clone(),
            from_disk_cache: payload.from_disk_cache,
            from_service_worker: payload.from_service_worker,
            body_signal,
        })
    }

    /// Returns the response URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the HTTP status code.
    #[inline]
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns the HTTP reason phrase.
    #[inline]
    #[must_use]
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Returns `true` for a 2xx status.
    #[inline]
    #[must_use]
    pub fn ok(&self) -> bool {
        self.status == 0 || (200..300).contains(&self.status)
    }

    /// Returns the response headers, keys lower-cased.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Returns the remote endpoint.
    #[inline]
    #[must_use]
    pub fn remote_address(&self) -> &RemoteAddress {
        &self.remote_address
    }

    /// Returns TLS details for secure responses.
    #[inline]
    #[must_use]
    pub fn security_details(&self) -> Option<&SecurityDetails> {
        self.security_details.as_ref()
    }

    /// Returns the resource timing payload, as reported by the browser.
    #[inline]
    #[must_use]
    pub fn timing(&self) -> Option<&Value> {
        self.timing.as_ref()
    }

    /// Returns `true` if served from disk or memory cache.
    #[must_use]
    pub fn from_cache(&self) -> bool {
        self.from_disk_cache
            || self
                .request
                .upgrade()
                .is_some_and(|request| request.from_memory_cache())
    }

    /// Returns `true` if served by a service worker.
    #[inline]
    #[must_use]
    pub fn from_service_worker(&self) -> bool {
        self.from_service_worker
    }

    /// Returns the request this response belongs to.
    ///
    /// `None` only if the request has been dropped by every holder.
    #[must_use]
    pub fn request(&self) -> Option<Arc<HttpRequest>> {
        self.request.upgrade()
    }

    /// Returns the response body.
    ///
    /// Suspends until the load reaches finished/failed, then fetches the
    /// body from the browser.
    ///
    /// # Errors
    ///
    /// - [`Error::BodyUnavailable`] for redirect responses, failed loads,
    ///   and bodies evicted by navigation (distinct from a successful
    ///   empty body)
    /// - [`Error::Protocol`] for any other fetch failure
    pub async fn body(&self) -> Result<Vec<u8>> {
        let mut loaded = self.body_signal.subscribe();
        let state = {
            let guard = loaded
                .wait_for(Option::is_some)
                .await
                .map_err(|_| Error::body_unavailable("request was destroyed before the body loaded"))?;
            guard.clone().expect("guarded by wait_for")
        };

        if let BodyLoadState::Unavailable(reason) = state {
            return Err(Error::body_unavailable(reason));
        }

        let result = self
            .session
            .send(
                "Network.getResponseBody",
                json!({ "requestId": self.request_id.as_str() }),
            )
            .await;

        let payload = match result {
            Ok(payload) => payload,
            Err(e)
                if e.protocol_message()
                    .is_some_and(|m| m.contains("No resource with given identifier found")) =>
            {
                return Err(Error::body_unavailable(
                    "could not load body for this request; it may be a preflight request",
                ));
            }
            Err(e) => return Err(e),
        };

        let body = payload
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let base64_encoded = payload
            .get("base64Encoded")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if base64_encoded {
            Base64Standard
                .decode(body)
                .map_err(|e| Error::invalid_message(format!("undecodable response body: {e}")))
        } else {
            Ok(body.as_bytes().to_vec())
        }
    }

    /// Returns the body decoded as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Same as [`body`](Self::body), plus [`Error::InvalidMessage`] for
    /// non-UTF-8 content.
    pub async fn text(&self) -> Result<String> {
        let bytes = self.body().await?;
        String::from_utf8(bytes)
            .map_err(|e| Error::invalid_message(format!("response body is not UTF-8: {e}")))
    }

    /// Fires the body-loaded signal.
    ///
    /// Idempotent: only the first resolution wins, so a duplicate terminal
    /// event cannot flip an already-settled body.
    pub(crate) fn resolve_body(&self, outcome: std::result::Result<(), String>) {
        self.body_signal.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(match outcome {
                Ok(()) => BodyLoadState::Ready,
                Err(reason) => BodyLoadState::Unavailable(reason),
            });
            true
        });
    }

    /// Returns `true` once the body signal has settled.
    #[must_use]
    pub fn body_settled(&self) -> bool {
        self.body_signal.borrow().is_some()
    }
}
