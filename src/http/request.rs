//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4)
//! - Extract and validate the target URL from the proxied path
//! - Work out the origin the browser used to reach the proxy
//!
//! # Design Decisions
//! - The target is read from the raw, still percent-encoded path so encoded
//!   `/` and `?` inside the token survive routing
//! - An inbound query string replaces the target's own query, which is what a
//!   GET form submitted to a proxied action produces

use axum::http::{header, HeaderMap, HeaderValue, Request, Uri};
use tower_http::request_id::{MakeRequestId, RequestId};
use url::Url;
use uuid::Uuid;

use crate::error::ProxyError;
use crate::rewrite::{canonicalize, ProxyCodec};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Request ID generator for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// The request ID set by the middleware, for logging.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Decode the target URL carried after `route_prefix` in `uri`.
pub fn extract_target(uri: &Uri, route_prefix: &str, codec: &ProxyCodec) -> Result<Url, ProxyError> {
    let token = uri
        .path()
        .strip_prefix(route_prefix)
        .ok_or_else(|| ProxyError::InvalidUrl(format!("path is not under {route_prefix}")))?;
    if token.is_empty() {
        return Err(ProxyError::InvalidUrl("empty target".into()));
    }

    let decoded = codec.decode(token)?;
    let mut target = canonicalize(&decoded, None)?;
    if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
        target.set_query(Some(query));
    }
    Ok(target)
}

/// `scheme://host[:port]` as seen by the client, or `None` when the request
/// carries no usable host.
pub fn public_origin(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let scheme = first_value(headers, "x-forwarded-proto")
        .filter(|s| s.eq_ignore_ascii_case("http") || s.eq_ignore_ascii_case("https"))
        .map(str::to_ascii_lowercase)
        .or_else(|| uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".to_string());

    let host = first_value(headers, "x-forwarded-host")
        .or_else(|| headers.get(header::HOST).and_then(|v| v.to_str().ok()))
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .map(str::trim)
        .filter(|h| is_valid_host(h))?;

    Some(format!("{scheme}://{host}"))
}

fn first_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b':' | b'[' | b']'))
}
