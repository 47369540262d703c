//! Upstream access subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyRequest
//!     → fetcher.rs (outbound headers, deadline, redirects)
//!     → UpstreamResponse { head, body stream }
//!     → decode.rs (only for bodies the proxy re-serializes)
//! ```

pub mod decode;
pub mod fetcher;

pub use decode::{decode_body, is_encoded, DecodedBody, EncodingFallback};
pub use fetcher::{
    read_to_limit, rechunk, BodyRead, ByteStream, ProxyRequest, UpstreamClient, UpstreamResponse,
};
