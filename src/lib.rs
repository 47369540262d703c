//! Unblocking web proxy library.
//!
//! Fetches remote pages on behalf of a browser, rewrites every URL in HTML
//! documents so navigation stays on the proxy, and injects a client shim that
//! keeps dynamically created URLs proxied too.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod rewrite;
pub mod routing;
pub mod security;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
