//! Content routing: decide how an upstream response travels back.
//!
//! # Paths
//! ```text
//! text/html, application/xhtml+xml      → buffer, decode, rewrite, no-store
//! video/*, audio/*, large octet-stream  → stream through in fixed chunks
//! everything else                       → buffer, decode, return as-is
//! ```
//!
//! # Design Decisions
//! - Bodies with a content coding always take a buffered path: the coding
//!   header is stripped, so the bytes must be decoded before they leave
//! - HTML over `max_html_bytes` is streamed raw and counted as degraded;
//!   encoded HTML that decodes past it is served undecoded, also degraded
//! - Buffered paths read the whole body under one overall deadline, so a
//!   trickling upstream cannot hold the request past the timeout
//! - Identity bodies that outgrow the buffer on the passthrough path switch
//!   to streaming instead of failing

use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use url::Url;

use crate::config::ContentConfig;
use crate::error::ProxyError;
use crate::http::response;
use crate::observability::metrics;
use crate::rewrite::html::{rewrite_html_with, HtmlLimits};
use crate::rewrite::{ProxyCodec, RewriteContext, RewriteOutcome};
use crate::security::headers::{apply_no_store, rewrite_location, sanitize_response};
use crate::upstream::{
    decode_body, is_encoded, read_to_limit, rechunk, BodyRead, ByteStream, UpstreamResponse,
};

/// How a response body is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    Html,
    Stream,
    Buffered,
}

impl ContentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentClass::Html => "html",
            ContentClass::Stream => "stream",
            ContentClass::Buffered => "buffered",
        }
    }
}

/// Media type without parameters, lowercased.
fn essence(content_type: Option<&str>) -> String {
    content_type
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn is_html(content_type: Option<&str>) -> bool {
    let mime = essence(content_type);
    mime.starts_with("text/html") || mime == "application/xhtml+xml"
}

pub fn classify(
    content_type: Option<&str>,
    content_length: Option<u64>,
    encoded: bool,
    config: &ContentConfig,
) -> ContentClass {
    if is_html(content_type) {
        return ContentClass::Html;
    }
    let mime = essence(content_type);
    let streamable = mime.starts_with("video/")
        || mime.starts_with("audio/")
        || (mime == "application/octet-stream"
            && content_length.map_or(true, |len| len > config.stream_threshold_bytes));

    if streamable && !encoded {
        ContentClass::Stream
    } else {
        ContentClass::Buffered
    }
}

/// Per-request inputs for turning an upstream response into a client response.
pub struct Dispatch<'a> {
    pub config: &'a ContentConfig,
    /// Codec emitting tokens anchored at the proxy's public origin.
    pub codec: &'a ProxyCodec,
    pub shim_src: &'a str,
    pub method: &'a Method,
    /// Overall bound on reading a body that must be buffered.
    pub timeout: Duration,
}

impl Dispatch<'_> {
    pub async fn respond(&self, upstream: UpstreamResponse) -> Result<Response, ProxyError> {
        let status = upstream.status;
        let mut headers = sanitize_response(&upstream.headers);
        if status.is_redirection() {
            rewrite_location(&mut headers, self.codec, &upstream.url);
        }

        let encoded = is_encoded(upstream.content_encoding());
        let class = classify(
            upstream.content_type(),
            upstream.content_length(),
            encoded,
            self.config,
        );

        tracing::debug!(
            target_url = %upstream.url,
            status = status.as_u16(),
            class = class.as_str(),
            encoded,
            "Routing upstream response"
        );

        if *self.method == Method::HEAD || status_has_no_body(status) {
            if !encoded {
                restore_length(&mut headers, upstream.content_length());
            }
            return Ok(response::empty(status, headers));
        }

        match class {
            ContentClass::Html => self.html(upstream, headers, encoded).await,
            ContentClass::Stream => {
                restore_length(&mut headers, upstream.content_length());
                Ok(self.stream(upstream, headers))
            }
            ContentClass::Buffered => self.buffered(upstream, headers, encoded).await,
        }
    }

    async fn html(
        &self,
        upstream: UpstreamResponse,
        mut headers: HeaderMap,
        encoded: bool,
    ) -> Result<Response, ProxyError> {
        let status = upstream.status;
        let declared = upstream.content_length();
        if !encoded && declared.is_some_and(|len| len > self.config.max_html_bytes as u64) {
            return Ok(self.oversized_html(upstream, headers));
        }

        let limit = if encoded {
            self.config.max_buffered_bytes
        } else {
            self.config.max_html_bytes
        };
        let encoding = upstream.content_encoding().map(str::to_string);
        let url = upstream.url;
        let raw = match self.read_body(upstream.body, limit, &url).await? {
            BodyRead::Complete(bytes) => bytes,
            BodyRead::Exceeded(_) if encoded => return Err(ProxyError::BodyTooLarge { limit }),
            BodyRead::Exceeded(body) => {
                let rest = UpstreamResponse {
                    status,
                    headers: HeaderMap::new(),
                    url,
                    body,
                };
                return Ok(self.oversized_html(rest, headers));
            }
        };

        // A failed decode still goes through the rewriter as best-effort text.
        let decoded = decode_body(raw, encoding.as_deref(), self.config.max_html_bytes);
        if decoded.fallback.as_ref().is_some_and(|f| f.oversized) {
            tracing::warn!(
                target_url = %url,
                degraded = true,
                limit = self.config.max_html_bytes,
                "Decoded HTML exceeds rewrite limit, serving encoded body"
            );
            metrics::record_rewrite_degraded("oversized");
            if let Some(value) = encoding.and_then(|e| HeaderValue::from_str(&e).ok()) {
                headers.insert(header::CONTENT_ENCODING, value);
            }
            apply_no_store(&mut headers);
            return Ok(response::buffered(status, headers, decoded.bytes));
        }
        let body = decoded.bytes;
        if body.is_empty() {
            return Ok(response::buffered(status, headers, body));
        }

        let ctx = RewriteContext::new(url, self.codec.clone(), self.shim_src.to_string());
        let limits = HtmlLimits {
            chunk_size: self.config.chunk_size,
            max_memory: self.config.max_html_bytes,
        };
        let outcome = rewrite_html_with(&body, &ctx, limits);
        let rewritten = match outcome {
            RewriteOutcome::Rewritten(out) => out,
            RewriteOutcome::Degraded { body, .. } => body,
        };

        apply_no_store(&mut headers);
        Ok(response::buffered(status, headers, rewritten.into()))
    }

    async fn read_body(&self, body: ByteStream, limit: usize, url: &Url) -> Result<BodyRead, ProxyError> {
        tokio::time::timeout(self.timeout, read_to_limit(body, limit))
            .await
            .map_err(|_| ProxyError::UpstreamTimeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            })?
    }

    fn oversized_html(&self, upstream: UpstreamResponse, mut headers: HeaderMap) -> Response {
        tracing::warn!(
            target_url = %upstream.url,
            degraded = true,
            limit = self.config.max_html_bytes,
            "HTML exceeds rewrite limit, streaming unrewritten"
        );
        metrics::record_rewrite_degraded("oversized");
        apply_no_store(&mut headers);
        self.stream(upstream, headers)
    }

    fn stream(&self, upstream: UpstreamResponse, headers: HeaderMap) -> Response {
        metrics::record_stream();
        let body = rechunk(upstream.body, self.config.chunk_size);
        response::streaming(upstream.status, headers, body)
    }

    async fn buffered(
        &self,
        upstream: UpstreamResponse,
        mut headers: HeaderMap,
        encoded: bool,
    ) -> Result<Response, ProxyError> {
        let status = upstream.status;
        let limit = self.config.max_buffered_bytes;
        let encoding = upstream.content_encoding().map(str::to_string);
        let url = upstream.url;

        let raw = match self.read_body(upstream.body, limit, &url).await? {
            BodyRead::Complete(bytes) => bytes,
            BodyRead::Exceeded(_) if encoded => return Err(ProxyError::BodyTooLarge { limit }),
            BodyRead::Exceeded(body) => {
                tracing::debug!(target_url = %url, limit, "Body exceeds buffer, streaming");
                let rest = UpstreamResponse {
                    status,
                    headers: HeaderMap::new(),
                    url,
                    body,
                };
                return Ok(self.stream(rest, headers));
            }
        };

        if !encoded {
            return Ok(response::buffered(status, headers, raw));
        }

        let decoded = decode_body(raw, encoding.as_deref(), limit);
        if decoded.fallback.is_some() {
            // Undecodable bytes go out unchanged, labelled with their coding.
            if let Some(value) = encoding.and_then(|e| HeaderValue::from_str(&e).ok()) {
                headers.insert(header::CONTENT_ENCODING, value);
            }
        }
        Ok(response::buffered(status, headers, decoded.bytes))
    }
}

fn status_has_no_body(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

fn restore_length(headers: &mut HeaderMap, length: Option<u64>) {
    if let Some(len) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
}
