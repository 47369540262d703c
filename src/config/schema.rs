//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration for the unblocking proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, inbound limits).
    pub listener: ListenerConfig,

    /// Proxy path layout.
    pub proxy: PathConfig,

    /// Outbound fetch behaviour.
    pub upstream: UpstreamConfig,

    /// Content routing thresholds.
    pub content: ContentConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum inbound request body forwarded upstream.
    pub max_request_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_request_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Path layout of the proxy surface.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathConfig {
    /// Prefix of every proxied URL token (e.g. "/proxy/").
    pub prefix: String,

    /// Fetch-and-rewrite entry point (e.g. "/page-proxy/").
    pub page_prefix: String,

    /// Where the client shim asset is served.
    pub shim_path: String,

    /// Origin the browser uses to reach the proxy (e.g. "https://proxy.example").
    /// When unset it is taken from `X-Forwarded-Proto`/`X-Forwarded-Host`/`Host`.
    pub public_origin: Option<String>,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            prefix: "/proxy/".to_string(),
            page_prefix: "/page-proxy/".to_string(),
            shim_path: "/static/unblocker.js".to_string(),
            public_origin: None,
        }
    }
}

/// What to do with upstream 3xx responses on the raw proxy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectMode {
    /// Follow server-side; the client sees the final response.
    Follow,
    /// Return the 3xx with a proxied `Location`.
    Surface,
}

/// Outbound fetch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Deadline for the upstream response head, for each streamed chunk and
    /// for reading a whole buffered body.
    pub timeout_secs: u64,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Maximum redirects followed server-side.
    pub max_redirects: usize,

    /// Redirect handling on the raw proxy path. The page path always follows.
    pub raw_redirects: RedirectMode,

    /// Send `Accept-Encoding: identity` upstream.
    pub force_identity_encoding: bool,

    /// Outbound header template applied to every upstream request.
    pub headers: BTreeMap<String, String>,

    /// Inbound headers copied upstream (lowercase names).
    pub forward_headers: Vec<String>,

    /// Honour `HTTP_PROXY`/`HTTPS_PROXY` for outbound calls.
    pub use_system_proxy: bool,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            "User-Agent".to_string(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".to_string(),
        );
        headers.insert("Accept".to_string(), "*/*".to_string());
        headers.insert(
            "Accept-Language".to_string(),
            "ja,en-US;q=0.9,en;q=0.8".to_string(),
        );

        Self {
            timeout_secs: 25,
            connect_timeout_secs: 10,
            max_redirects: 10,
            raw_redirects: RedirectMode::Follow,
            force_identity_encoding: true,
            headers,
            forward_headers: [
                "accept",
                "accept-language",
                "authorization",
                "content-type",
                "cookie",
                "if-modified-since",
                "if-none-match",
                "if-range",
                "range",
                "x-requested-with",
            ]
            .iter()
            .map(|h| h.to_string())
            .collect(),
            use_system_proxy: false,
        }
    }
}

/// Content routing thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContentConfig {
    /// `application/octet-stream` bodies larger than this are streamed.
    pub stream_threshold_bytes: u64,

    /// HTML larger than this bypasses rewriting and streams raw.
    pub max_html_bytes: usize,

    /// Hard cap on any body held in memory.
    pub max_buffered_bytes: usize,

    /// Chunk size used when streaming to the client.
    pub chunk_size: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            stream_threshold_bytes: 1024 * 1024,
            max_html_bytes: 8 * 1024 * 1024,
            max_buffered_bytes: 64 * 1024 * 1024,
            chunk_size: 8192,
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for development.
    #[default]
    Pretty,
    /// One JSON object per line, for production.
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format ("pretty" or "json").
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
