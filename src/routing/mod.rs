//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! UpstreamResponse (status, headers, body stream)
//!     → content.rs (classify by content type and length)
//!     → HTML path:        buffer → decode → rewrite → no-store
//!     → Stream path:      rechunk → forward incrementally
//!     → Buffered path:    buffer → decode → return
//! ```
//!
//! # Design Decisions
//! - Classification depends only on response headers, never on sniffed bytes
//! - Deterministic: the same head always takes the same path

pub mod content;

pub use content::{classify, ContentClass, Dispatch};
