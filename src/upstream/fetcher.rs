//! Outbound fetches.
//!
//! # Responsibilities
//! - Hold the pooled reqwest clients (redirect-following and manual)
//! - Apply the outbound header policy to every request
//! - Bound the response head and every body read by the configured deadline
//! - Expose the body as a stream so large payloads never sit in memory
//!
//! # Design Decisions
//! - One deadline covers "nothing arrived for N seconds", applied to the
//!   head and again to each chunk, so slow-but-alive streams keep flowing
//! - Dropping the body stream drops the reqwest response, which closes the
//!   upstream connection

use std::pin::Pin;
use std::time::Duration;

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::redirect::Policy;
use url::Url;

use crate::config::{RedirectMode, UpstreamConfig};
use crate::error::ProxyError;
use crate::rewrite::ProxyCodec;
use crate::security::headers::OutboundHeaders;

/// Body chunks as they arrive from upstream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProxyError>> + Send>>;

/// One request to forward upstream.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub target: Url,
    /// Inbound client headers; filtered through the allowlist before use.
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Upstream response head plus its unread body.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Final URL after any redirects were followed.
    pub url: Url,
    pub body: ByteStream,
}

impl UpstreamResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.header_str(axum::http::header::CONTENT_TYPE)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header_str(axum::http::header::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.header_str(axum::http::header::CONTENT_ENCODING)
    }

    fn header_str(&self, name: HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

/// Result of reading a body up to a limit.
pub enum BodyRead {
    Complete(Bytes),
    /// Limit crossed; the stream replays everything read so far, then the rest.
    Exceeded(ByteStream),
}

/// Shared upstream client; cheap to clone.
#[derive(Clone)]
pub struct UpstreamClient {
    following: reqwest::Client,
    manual: reqwest::Client,
    template: HeaderMap,
    forward: Vec<HeaderName>,
    force_identity: bool,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, ProxyError> {
        let following = client_builder(config)
            .redirect(Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to build upstream client: {e}")))?;
        let manual = client_builder(config)
            .redirect(Policy::none())
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to build upstream client: {e}")))?;

        let mut template = HeaderMap::with_capacity(config.headers.len());
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProxyError::Internal(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ProxyError::Internal(format!("invalid value for {name}: {e}")))?;
            template.insert(name, value);
        }

        let forward = config
            .forward_headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| ProxyError::Internal(format!("invalid header name {name}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            following,
            manual,
            template,
            forward,
            force_identity: config.force_identity_encoding,
            timeout: config.timeout(),
        })
    }

    /// Send `request` upstream and return once the response head arrives.
    pub async fn fetch(
        &self,
        request: ProxyRequest,
        codec: &ProxyCodec,
        redirects: RedirectMode,
    ) -> Result<UpstreamResponse, ProxyError> {
        let url_text = request.target.to_string();
        let headers = OutboundHeaders {
            template: &self.template,
            forward: &self.forward,
            codec,
            target: &request.target,
            force_identity: self.force_identity,
        }
        .build(&request.headers);

        let client = match redirects {
            RedirectMode::Follow => &self.following,
            RedirectMode::Surface => &self.manual,
        };

        let mut builder = client
            .request(request.method.clone(), request.target)
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        tracing::debug!(method = %request.method, url = %url_text, "Fetching upstream");

        let response = match tokio::time::timeout(self.timeout, builder.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(map_reqwest_error(&url_text, &e, self.timeout)),
            Err(_) => {
                return Err(ProxyError::UpstreamTimeout {
                    url: url_text,
                    secs: self.timeout.as_secs(),
                })
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = guard_stream(response.bytes_stream(), url_text, self.timeout);

        Ok(UpstreamResponse {
            status,
            headers,
            url,
            body,
        })
    }
}

fn client_builder(config: &UpstreamConfig) -> reqwest::ClientBuilder {
    let builder = reqwest::Client::builder().connect_timeout(config.connect_timeout());
    if config.use_system_proxy {
        builder
    } else {
        builder.no_proxy()
    }
}

fn map_reqwest_error(url: &str, err: &reqwest::Error, timeout: Duration) -> ProxyError {
    if err.is_timeout() {
        return ProxyError::UpstreamTimeout {
            url: url.to_string(),
            secs: timeout.as_secs(),
        };
    }
    let mut reason = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        reason.push_str(": ");
        reason.push_str(&inner.to_string());
        source = inner.source();
    }
    ProxyError::UpstreamUnreachable {
        url: url.to_string(),
        reason,
    }
}

/// Apply the idle deadline to each chunk; the stream ends after the first error.
fn guard_stream<S>(inner: S, url: String, idle: Duration) -> ByteStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let inner = Box::pin(inner);
    Box::pin(stream::unfold(Some(inner), move |state| {
        let url = url.clone();
        async move {
            let mut inner = state?;
            match tokio::time::timeout(idle, inner.next()).await {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(inner))),
                Ok(Some(Err(e))) => Some((Err(map_reqwest_error(&url, &e, idle)), None)),
                Ok(None) => None,
                Err(_) => Some((
                    Err(ProxyError::UpstreamTimeout {
                        url,
                        secs: idle.as_secs(),
                    }),
                    None,
                )),
            }
        }
    }))
}

/// Split chunks larger than `chunk_size`.
pub fn rechunk(body: ByteStream, chunk_size: usize) -> ByteStream {
    let size = chunk_size.max(1);
    Box::pin(body.flat_map(move |item| {
        let pieces = match item {
            Ok(mut bytes) => {
                let mut pieces = Vec::with_capacity(bytes.len() / size + 1);
                while bytes.len() > size {
                    pieces.push(Ok(bytes.split_to(size)));
                }
                if !bytes.is_empty() {
                    pieces.push(Ok(bytes));
                }
                pieces
            }
            Err(e) => vec![Err(e)],
        };
        stream::iter(pieces)
    }))
}

/// Buffer `body` until it ends or grows past `limit`.
pub async fn read_to_limit(mut body: ByteStream, limit: usize) -> Result<BodyRead, ProxyError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buffer.extend_from_slice(&chunk?);
        if buffer.len() > limit {
            let prefix = buffer.freeze();
            let replay = stream::once(async move { Ok::<_, ProxyError>(prefix) }).chain(body);
            return Ok(BodyRead::Exceeded(Box::pin(replay)));
        }
    }
    Ok(BodyRead::Complete(buffer.freeze()))
}
