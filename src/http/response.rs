//! Response construction.
//!
//! # Responsibilities
//! - Assemble client responses from a decided status and header set
//! - Wrap upstream body streams for incremental delivery
//! - Serve the fixed endpoints (health, shim asset)
//!
//! # Design Decisions
//! - Status and headers are fixed before the body is attached, so a failure
//!   while reading upstream can never leave a half-written head
//! - Streamed bodies are polled by hyper only as the client accepts data

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;

use crate::rewrite::shim::{SHIM_CONTENT_TYPE, SHIM_JS};
use crate::upstream::ByteStream;

/// Response with a fully materialized body.
pub fn buffered(status: StatusCode, headers: HeaderMap, body: Bytes) -> Response {
    with_body(status, headers, Body::from(body))
}

/// Response whose body is forwarded chunk by chunk.
pub fn streaming(status: StatusCode, headers: HeaderMap, body: ByteStream) -> Response {
    with_body(status, headers, Body::from_stream(body))
}

/// Head-only response (HEAD requests, 204/304).
pub fn empty(status: StatusCode, headers: HeaderMap) -> Response {
    with_body(status, headers, Body::empty())
}

fn with_body(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

/// `GET /health`.
pub async fn health() -> impl IntoResponse {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET <shim_path>`.
pub async fn shim_asset() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(SHIM_CONTENT_TYPE)),
            (header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600")),
        ],
        SHIM_JS,
    )
}
