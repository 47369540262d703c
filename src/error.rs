//! Error taxonomy for the proxy.
//!
//! # Outcomes
//! ```text
//! InvalidUrl           → 400 Bad Request      (client-caused, never retried)
//! MethodNotAllowed     → 405 Method Not Allowed
//! RequestTooLarge      → 413 Payload Too Large (inbound body over the cap)
//! UpstreamUnreachable  → 502 Bad Gateway      (DNS / connect / transport)
//! UpstreamTimeout      → 502 Bad Gateway      (fixed deadline exceeded)
//! BodyTooLarge         → 502 Bad Gateway      (buffering cap exceeded)
//! Internal             → 500 Internal Error   (rewrite could not degrade)
//! ```
//!
//! Degraded rewrites and encoding fallbacks are not errors; they travel as
//! values (`RewriteOutcome`, `DecodedBody`) so callers can log and serve them.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

/// Errors that end a proxied request with an error status.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Target is empty, unparseable or not `http(s)`.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Inbound body exceeded `listener.max_request_body_bytes`.
    #[error("request body exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },

    /// Upstream could not be reached (DNS, connect, TLS, reset).
    #[error("upstream unreachable: {url}: {reason}")]
    UpstreamUnreachable { url: String, reason: String },

    /// Upstream did not answer within the configured deadline.
    #[error("upstream timed out after {secs}s: {url}")]
    UpstreamTimeout { url: String, secs: u64 },

    /// Upstream body exceeded the buffering limit on a path that must buffer.
    #[error("upstream body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ProxyError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::UpstreamUnreachable { .. }
            | ProxyError::UpstreamTimeout { .. }
            | ProxyError::BodyTooLarge { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short, stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidUrl(_) => "invalid_url",
            ProxyError::MethodNotAllowed(_) => "method_not_allowed",
            ProxyError::RequestTooLarge { .. } => "request_too_large",
            ProxyError::UpstreamUnreachable { .. } => "upstream_unreachable",
            ProxyError::UpstreamTimeout { .. } => "upstream_timeout",
            ProxyError::BodyTooLarge { .. } => "body_too_large",
            ProxyError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            self.to_string(),
        )
            .into_response()
    }
}
