//! Header manipulation in both directions.
//!
//! # Responsibilities
//! - Build the outbound header set: template + bounded allowlist of inbound headers
//! - Strip hop-by-hop and framing headers from upstream responses
//! - Keep cookies and redirects bound to the proxy origin
//!
//! # Design Decisions
//! - The body is always re-serialized, so upstream length/encoding/framing
//!   headers are never forwarded
//! - Headers that would pin the proxy origin to the remote site's policy
//!   (CSP, HSTS, frame options) are dropped

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::rewrite::{canonicalize, ProxyCodec};

/// Never copied from the client to upstream.
pub const REQUEST_STRIPPED: &[&str] = &[
    "host",
    "content-length",
    "accept-encoding",
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Never copied from upstream to the client.
pub const RESPONSE_STRIPPED: &[&str] = &[
    "content-encoding",
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "proxy-connection",
    "trailer",
    "upgrade",
    "content-security-policy",
    "content-security-policy-report-only",
    "strict-transport-security",
    "x-frame-options",
];

/// Inputs for building one outbound request's headers.
pub struct OutboundHeaders<'a> {
    pub template: &'a HeaderMap,
    pub forward: &'a [HeaderName],
    pub codec: &'a ProxyCodec,
    pub target: &'a Url,
    pub force_identity: bool,
}

impl OutboundHeaders<'_> {
    pub fn build(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut out = self.template.clone();

        for name in self.forward {
            if REQUEST_STRIPPED.contains(&name.as_str()) {
                continue;
            }
            let mut values = inbound.get_all(name).iter();
            if let Some(first) = values.next() {
                out.insert(name.clone(), first.clone());
                for value in values {
                    out.append(name.clone(), value.clone());
                }
            }
        }

        if let Some(referer) = inbound.get(header::REFERER).and_then(|v| v.to_str().ok()) {
            if let Some(upstream) = self.unproxy_referer(referer) {
                if let Ok(value) = HeaderValue::from_str(&upstream) {
                    out.insert(header::REFERER, value);
                }
            }
        }

        if inbound.contains_key(header::ORIGIN) {
            let origin = self.target.origin().ascii_serialization();
            if let Ok(value) = HeaderValue::from_str(&origin) {
                out.insert(header::ORIGIN, value);
            }
        }

        if self.force_identity {
            out.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        } else {
            out.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
        }

        out
    }

    /// `http://proxy/proxy/https%3A…` → `https://…`; anything else is dropped.
    fn unproxy_referer(&self, referer: &str) -> Option<String> {
        let path_at = referer.find(self.codec.path_prefix())?;
        let decoded = self.codec.decode(&referer[path_at..]).ok()?;
        Some(decoded.split('#').next().unwrap_or_default().to_string())
    }
}

/// Copy upstream response headers minus [`RESPONSE_STRIPPED`], rebinding
/// cookies to the proxy host.
pub fn sanitize_response(upstream: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if RESPONSE_STRIPPED.contains(&name.as_str()) {
            continue;
        }
        if name == header::SET_COOKIE {
            let rewritten = value
                .to_str()
                .ok()
                .map(strip_cookie_domain)
                .and_then(|v| HeaderValue::from_str(&v).ok())
                .unwrap_or_else(|| value.clone());
            out.append(name.clone(), rewritten);
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Point a 3xx `Location` back through the proxy.
pub fn rewrite_location(headers: &mut HeaderMap, codec: &ProxyCodec, target: &Url) {
    let Some(location) = headers.get(header::LOCATION).and_then(|v| v.to_str().ok()) else {
        return;
    };
    if codec.is_token(location) {
        return;
    }
    let Ok(resolved) = canonicalize(location, Some(target)) else {
        return;
    };
    if let Ok(value) = HeaderValue::from_str(&codec.encode_url(&resolved)) {
        headers.insert(header::LOCATION, value);
    }
}

/// Responses carrying rewritten HTML must never be cached.
pub fn apply_no_store(headers: &mut HeaderMap) {
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.remove(header::ETAG);
    headers.remove(header::LAST_MODIFIED);
}

/// Drop the `Domain` attribute so the cookie binds to the proxy host.
pub fn strip_cookie_domain(set_cookie: &str) -> String {
    set_cookie
        .split(';')
        .filter(|part| {
            let name = part.split('=').next().unwrap_or_default().trim();
            !name.eq_ignore_ascii_case("domain")
        })
        .collect::<Vec<_>>()
        .join(";")
}
