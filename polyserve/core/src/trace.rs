//! Request identity and trace propagation.
//!
//! A [`TraceContext`] is attached to every request dispatched through
//! [`crate::dispatch::DispatchWrapper`]. Request ids are extracted from the
//! inbound carrier with a fixed precedence and minted when absent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

/// Wire header name carrying a request id, checked first.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// gRPC metadata key carrying a request id, checked with the same priority
/// as the header for protocols that have no header concept.
pub const REQUEST_ID_METADATA: &str = "x-request-id";
/// Query parameter name checked when no header/metadata value is present.
pub const REQUEST_ID_QUERY_PARAM: &str = "request_id";

/// A source of candidate request ids, in precedence order: header/metadata
/// wins over query, which wins over body. Whichever source finds the first
/// non-empty value determines the request id; if none do, one is minted.
pub struct RequestIdSources<'a> {
    /// Header or gRPC metadata map.
    pub headers: Option<&'a HashMap<String, String>>,
    /// Parsed query string parameters.
    pub query: Option<&'a HashMap<String, String>>,
    /// A body-extracted value, e.g. a JSON field, already pulled by the caller.
    pub body_value: Option<&'a str>,
}

/// Extract a request id from `sources` honoring header > query > body
/// precedence, minting a new UUIDv4 if none of the sources carry one.
#[must_use]
pub fn extract_or_mint_request_id(sources: &RequestIdSources<'_>) -> String {
    if let Some(headers) = sources.headers {
        if let Some(v) = headers.get(REQUEST_ID_HEADER) {
            if !v.is_empty() {
                return v.clone();
            }
        }
    }
    if let Some(query) = sources.query {
        if let Some(v) = query.get(REQUEST_ID_QUERY_PARAM) {
            if !v.is_empty() {
                return v.clone();
            }
        }
    }
    if let Some(v) = sources.body_value {
        if !v.is_empty() {
            return v.to_string();
        }
    }
    mint_request_id()
}

/// Mint a fresh request id (UUIDv4).
#[must_use]
pub fn mint_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Per-request trace context propagated through the dispatch wrapper into
/// the application handler and any pool/shutdown event it triggers.
///
/// `terminated` is shared across every `clone()` of a given context (it is
/// the same underlying flag, not a snapshot): [`crate::dispatch::DispatchWrapper::wrap`]
/// flips it when the server is draining, and a protocol dispatcher that
/// kept its own clone around for building the eventual response observes
/// the flip without needing `wrap` to hand anything back.
#[derive(Debug, Clone)]
pub struct TraceContext {
    /// Request id, extracted or minted per [`extract_or_mint_request_id`].
    pub request_id: String,
    /// Connection id of the connection carrying this request, if known.
    pub connection_id: Option<String>,
    /// Protocol serving this request.
    pub protocol: &'static str,
    /// Current tracing span id, if one is active when the context is built.
    pub span: Option<String>,
    /// Payload encoding/format tag (`"json"`, `"protobuf"`, `"binary"`, ...).
    pub encoding: &'static str,
    /// Per-request timeout in milliseconds, as configured on the dispatcher.
    pub timeout_ms: u64,
    terminated: Arc<AtomicBool>,
}

impl TraceContext {
    /// Build a new trace context, extracting/minting the request id.
    /// `encoding`/`timeout_ms` default to `"binary"`/`0`; set them with
    /// [`Self::with_encoding`] and [`Self::with_timeout`].
    #[must_use]
    pub fn new(sources: &RequestIdSources<'_>, connection_id: Option<String>, protocol: &'static str) -> Self {
        Self {
            request_id: extract_or_mint_request_id(sources),
            connection_id,
            protocol,
            span: None,
            encoding: "binary",
            timeout_ms: 0,
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach the per-request timeout the dispatcher will enforce.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Attach a payload encoding tag.
    #[must_use]
    pub fn with_encoding(mut self, encoding: &'static str) -> Self {
        self.encoding = encoding;
        self
    }

    /// Whether the server was draining at (or since) the moment this
    /// context was dispatched.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Mark this context, and every clone sharing its flag, as terminated.
    pub fn mark_terminated(&self) {
        self.terminated.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_wins_over_query_and_body() {
        let mut headers = HashMap::new();
        headers.insert(REQUEST_ID_HEADER.to_string(), "from-header".to_string());
        let mut query = HashMap::new();
        query.insert(REQUEST_ID_QUERY_PARAM.to_string(), "from-query".to_string());

        let sources = RequestIdSources {
            headers: Some(&headers),
            query: Some(&query),
            body_value: Some("from-body"),
        };
        assert_eq!(extract_or_mint_request_id(&sources), "from-header");
    }

    #[test]
    fn query_wins_over_body_when_no_header() {
        let mut query = HashMap::new();
        query.insert(REQUEST_ID_QUERY_PARAM.to_string(), "from-query".to_string());
        let sources = RequestIdSources {
            headers: None,
            query: Some(&query),
            body_value: Some("from-body"),
        };
        assert_eq!(extract_or_mint_request_id(&sources), "from-query");
    }

    #[test]
    fn mints_when_nothing_present() {
        let sources = RequestIdSources {
            headers: None,
            query: None,
            body_value: None,
        };
        let id = extract_or_mint_request_id(&sources);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn empty_header_falls_through() {
        let mut headers = HashMap::new();
        headers.insert(REQUEST_ID_HEADER.to_string(), String::new());
        let mut query = HashMap::new();
        query.insert(REQUEST_ID_QUERY_PARAM.to_string(), "from-query".to_string());
        let sources = RequestIdSources {
            headers: Some(&headers),
            query: Some(&query),
            body_value: None,
        };
        assert_eq!(extract_or_mint_request_id(&sources), "from-query");
    }
}
