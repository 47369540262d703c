//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the path layout is unambiguous (prefixes vs. fixed endpoints)
//! - Validate value ranges (timeouts > 0, limits > 0, address parses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue};
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }
    if config.listener.max_request_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_request_body_bytes", "must be > 0"));
    }

    let paths = &config.proxy;
    for (field, prefix) in [("proxy.prefix", &paths.prefix), ("proxy.page_prefix", &paths.page_prefix)] {
        if !prefix.starts_with('/') || !prefix.ends_with('/') || prefix.len() < 3 {
            errors.push(ValidationError::new(
                field,
                format!("must look like /name/, got {prefix:?}"),
            ));
        }
        if "/health".starts_with(prefix.as_str()) || paths.shim_path.starts_with(prefix.as_str()) {
            errors.push(ValidationError::new(
                field,
                "shadows /health or the shim path",
            ));
        }
    }
    if paths.prefix == paths.page_prefix {
        errors.push(ValidationError::new("proxy.page_prefix", "must differ from proxy.prefix"));
    }
    if !paths.shim_path.starts_with('/') || paths.shim_path == "/health" {
        errors.push(ValidationError::new(
            "proxy.shim_path",
            "must start with / and differ from /health",
        ));
    }
    if let Some(origin) = &paths.public_origin {
        let ok = Url::parse(origin)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host() && u.path() == "/")
            .unwrap_or(false);
        if !ok {
            errors.push(ValidationError::new(
                "proxy.public_origin",
                format!("must be an http(s) origin without a path, got {origin:?}"),
            ));
        }
    }

    let upstream = &config.upstream;
    if upstream.timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.timeout_secs", "must be > 0"));
    }
    if upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.connect_timeout_secs", "must be > 0"));
    }
    for (name, value) in &upstream.headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(value).is_err() {
            errors.push(ValidationError::new(
                "upstream.headers",
                format!("invalid header {name:?}"),
            ));
        }
    }
    for name in &upstream.forward_headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                "upstream.forward_headers",
                format!("invalid header name {name:?}"),
            ));
        }
    }

    let content = &config.content;
    if content.chunk_size == 0 {
        errors.push(ValidationError::new("content.chunk_size", "must be > 0"));
    }
    if content.max_html_bytes == 0 {
        errors.push(ValidationError::new("content.max_html_bytes", "must be > 0"));
    }
    if content.max_html_bytes > content.max_buffered_bytes {
        errors.push(ValidationError::new(
            "content.max_html_bytes",
            "must not exceed content.max_buffered_bytes",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
