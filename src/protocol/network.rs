//! Network and Fetch domain payload types.
//!
//! Typed shapes for every consumed network event plus the request/response
//! wire objects they embed. Field sets follow the protocol; fields this
//! crate never reads are omitted and tolerated by serde.

// ============================================================================
// Imports
// ============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::{FetchRequestId, NetworkRequestId};

// ============================================================================
// RequestPayload
// ============================================================================

/// HTTP request data carried by `Network.requestWillBeSent` and
/// `Fetch.requestPaused`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    /// Request URL, without fragment.
    pub url: String,

    /// HTTP method.
    pub method: String,

    /// Request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Posted body, when small enough to inline.
    #[serde(default)]
    pub post_data: Option<String>,

    /// Whether a body exists even if not inlined.
    #[serde(default)]
    pub has_post_data: Option<bool>,
}

// ============================================================================
// ResponsePayload
// ============================================================================

/// HTTP response data carried by `Network.responseReceived` and redirect
/// echoes inside `Network.requestWillBeSent`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    /// Response URL.
    pub url: String,

    /// HTTP status code.
    pub status: u16,

    /// HTTP status text.
    #[serde(default)]
    pub status_text: String,

    /// Response headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// MIME type.
    #[serde(default)]
    pub mime_type: Option<String>,

    /// Remote IP address.
    #[serde(default)]
    pub remote_ip_address: Option<String>,

    /// Remote port.
    #[serde(default)]
    pub remote_port: Option<u16>,

    /// Whether the response was served from disk cache.
    #[serde(default)]
    pub from_disk_cache: bool,

    /// Whether the response was served by a service worker.
    #[serde(default)]
    pub from_service_worker: bool,

    /// Security details for secure connections.
    #[serde(default)]
    pub security_details: Option<SecurityDetails>,

    /// Resource load timing, as reported by the browser.
    #[serde(default)]
    pub timing: Option<Value>,

    /// Negotiated protocol, e.g. `h2`.
    #[serde(default)]
    pub protocol: Option<String>,
}

// ============================================================================
// SecurityDetails
// ============================================================================

/// TLS details of a secure response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityDetails {
    /// Protocol name, e.g. `TLS 1.3`.
    #[serde(default)]
    pub protocol: String,

    /// Certificate subject name.
    #[serde(default)]
    pub subject_name: String,

    /// Certificate issuer.
    #[serde(default)]
    pub issuer: String,

    /// Validity start, seconds since epoch.
    #[serde(default)]
    pub valid_from: f64,

    /// Validity end, seconds since epoch.
    #[serde(default)]
    pub valid_to: f64,

    /// Subject alternative names.
    #[serde(default)]
    pub san_list: Vec<String>,
}

// ============================================================================
// Network Events
// ============================================================================

/// `Network.requestWillBeSent` event.
///
/// A redirect hop re-uses the same `request_id` and carries the previous
/// hop's response as `redirect_response`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSentEvent {
    /// Network request id, stable across redirects.
    pub request_id: NetworkRequestId,

    /// Loader id; equal to `request_id` for navigation requests.
    #[serde(default)]
    pub loader_id: String,

    /// URL of the document the request belongs to.
    #[serde(default)]
    pub document_url: String,

    /// The outgoing request.
    pub request: RequestPayload,

    /// Monotonic event timestamp.
    #[serde(default)]
    pub timestamp: f64,

    /// Request initiator description.
    #[serde(default)]
    pub initiator: Option<Value>,

    /// Whether the redirect response has a matching extra-info event.
    #[serde(default)]
    pub redirect_has_extra_info: bool,

    /// Response of the previous hop, when this event is a redirect.
    #[serde(default)]
    pub redirect_response: Option<ResponsePayload>,

    /// Resource type, e.g. `Document`, `XHR`.
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,

    /// Frame the request belongs to.
    #[serde(default)]
    pub frame_id: Option<String>,
}

/// `Network.requestServedFromCache` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestServedFromCacheEvent {
    /// Network request id.
    pub request_id: NetworkRequestId,
}

/// `Network.responseReceived` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceivedEvent {
    /// Network request id.
    pub request_id: NetworkRequestId,

    /// Monotonic event timestamp.
    #[serde(default)]
    pub timestamp: f64,

    /// Resource type.
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,

    /// The received response.
    pub response: ResponsePayload,

    /// Whether a `responseReceivedExtraInfo` event exists for this response.
    #[serde(default)]
    pub has_extra_info: bool,

    /// Frame the request belongs to.
    #[serde(default)]
    pub frame_id: Option<String>,
}

/// `Network.responseReceivedExtraInfo` event.
///
/// Arrives in unspecified order relative to `responseReceived`; its status
/// and headers take precedence over the base payload when paired.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceivedExtraInfoEvent {
    /// Network request id.
    pub request_id: NetworkRequestId,

    /// Raw response headers as they went over the wire.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// HTTP status code.
    #[serde(default)]
    pub status_code: u16,

    /// Raw status line and headers text, when available.
    #[serde(default)]
    pub headers_text: Option<String>,
}

impl ResponseReceivedExtraInfoEvent {
    /// Extracts the reason phrase from the raw status line.
    ///
    /// `headers_text` starts with e.g. `HTTP/1.1 200 OK`; everything after
    /// the status code is the phrase.
    #[must_use]
    pub fn status_text(&self) -> Option<String> {
        let first_line = self.headers_text.as_ref()?.lines().next()?;
        let mut parts = first_line.splitn(3, ' ');
        let _version = parts.next()?;
        let _code = parts.next()?;
        let phrase = parts.next()?.trim();
        if phrase.is_empty() {
            return None;
        }
        Some(phrase.to_string())
    }
}

/// `Network.loadingFinished` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinishedEvent {
    /// Network request id.
    pub request_id: NetworkRequestId,

    /// Monotonic event timestamp.
    #[serde(default)]
    pub timestamp: f64,

    /// Total encoded bytes received.
    #[serde(default)]
    pub encoded_data_length: f64,
}

/// `Network.loadingFailed` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailedEvent {
    /// Network request id.
    pub request_id: NetworkRequestId,

    /// Monotonic event timestamp.
    #[serde(default)]
    pub timestamp: f64,

    /// Resource type.
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,

    /// Best-effort failure description, e.g. `net::ERR_ABORTED`.
    #[serde(default)]
    pub error_text: String,

    /// Whether the load was canceled.
    #[serde(default)]
    pub canceled: bool,

    /// Reason the request was blocked, if it was.
    #[serde(default)]
    pub blocked_reason: Option<String>,
}

// ============================================================================
// Fetch Events
// ============================================================================

/// `Fetch.requestPaused` event.
///
/// `request_id` here is the per-attempt interception id; `network_id` links
/// back to the Network-domain request when the browser knows it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPausedEvent {
    /// Interception id for this paused attempt.
    pub request_id: FetchRequestId,

    /// The paused request.
    pub request: RequestPayload,

    /// Frame the request belongs to.
    #[serde(default)]
    pub frame_id: Option<String>,

    /// Resource type.
    #[serde(default)]
    pub resource_type: Option<String>,

    /// Matching Network-domain request id, when known.
    #[serde(default)]
    pub network_id: Option<NetworkRequestId>,
}

/// `Fetch.authRequired` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequiredEvent {
    /// Interception id of the paused attempt awaiting credentials.
    pub request_id: FetchRequestId,

    /// The request awaiting authentication.
    pub request: RequestPayload,

    /// The challenge issued by the server or proxy.
    pub auth_challenge: AuthChallenge,
}

/// Authentication challenge details.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthChallenge {
    /// Challenge source (`Server` or `Proxy`).
    #[serde(default)]
    pub source: Option<String>,

    /// Challenge origin.
    #[serde(default)]
    pub origin: String,

    /// Authentication scheme, e.g. `basic`.
    #[serde(default)]
    pub scheme: String,

    /// Challenge realm.
    #[serde(default)]
    pub realm: String,
}

// ============================================================================
// HeaderEntry
// ============================================================================

/// A single header for `Fetch.continueRequest` / `Fetch.fulfillRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderEntry {
    /// Header name.
    pub name: String,

    /// Header value.
    pub value: String,
}

impl HeaderEntry {
    /// Creates a header entry.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Converts a header map into a sorted entry list.
    ///
    /// Sorting keeps the serialized form deterministic.
    #[must_use]
    pub fn from_map(headers: &HashMap<String, String>) -> Vec<Self> {
        let mut entries: Vec<Self> = headers
            .iter()
            .map(|(name, value)| Self::new(name.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

// ============================================================================
// ErrorReason
// ============================================================================

/// Network-level error reason for `Fetch.failRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorReason {
    /// Generic failure.
    Failed,
    /// Aborted by the client.
    Aborted,
    /// Timed out.
    TimedOut,
    /// Access denied.
    AccessDenied,
    /// Connection closed.
    ConnectionClosed,
    /// Connection reset.
    ConnectionReset,
    /// Connection refused.
    ConnectionRefused,
    /// Connection aborted.
    ConnectionAborted,
    /// Connection failed.
    ConnectionFailed,
    /// DNS lookup failed.
    NameNotResolved,
    /// Internet disconnected.
    InternetDisconnected,
    /// Address unreachable.
    AddressUnreachable,
    /// Blocked by the client.
    BlockedByClient,
    /// Blocked by the response.
    BlockedByResponse,
}

impl ErrorReason {
    /// Resolves a caller-facing abort code into a protocol reason.
    ///
    /// Codes are the lower-case names accepted by `HttpRequest::abort`.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "aborted" => Self::Aborted,
            "accessdenied" => Self::AccessDenied,
            "addressunreachable" => Self::AddressUnreachable,
            "blockedbyclient" => Self::BlockedByClient,
            "blockedbyresponse" => Self::BlockedByResponse,
            "connectionaborted" => Self::ConnectionAborted,
            "connectionclosed" => Self::ConnectionClosed,
            "connectionfailed" => Self::ConnectionFailed,
            "connectionrefused" => Self::ConnectionRefused,
            "connectionreset" => Self::ConnectionReset,
            "internetdisconnected" => Self::InternetDisconnected,
            "namenotresolved" => Self::NameNotResolved,
            "timedout" => Self::TimedOut,
            "failed" => Self::Failed,
            _ => return None,
        })
    }
}

// ============================================================================
// Status Texts
// ============================================================================

/// Returns the standard reason phrase for an HTTP status code.
///
/// Used to fill `responsePhrase` in `Fetch.fulfillRequest`, which rejects
/// an empty phrase.
#[must_use]
pub fn status_text(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        103 => "Early Hints",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        208 => "Already Reported",
        226 => "IM Used",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        418 => "I'm a teapot",
        421 => "Misdirected Request",
        422 => "Unprocessable Entity",
        423 => "Locked",
        424 => "Failed Dependency",
        425 => "Too Early",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        451 => "Unavailable For Legal Reasons",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",
        510 => "Not Extended",
        511 => "Network Authentication Required",
        _ => "",
    }
}

// ============================================================================
// Tests
// ============================================================================
