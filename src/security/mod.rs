//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request:
//!     → headers.rs (template + allowlist, Referer/Origin re-pointed upstream)
//!
//! Upstream response:
//!     → headers.rs (strip framing and origin-pinning headers,
//!                   rebind cookies and redirects to the proxy)
//! ```
//!
//! # Design Decisions
//! - Allowlist, not blocklist, for headers sent upstream
//! - No trust in upstream framing: the body is re-serialized

pub mod headers;
