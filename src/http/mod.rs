//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, entry points)
//!     → request.rs (request ID, target extraction, public origin)
//!     → [upstream fetch]
//!     → [content router picks the body path]
//!     → response.rs (assemble status, headers, body)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{extract_target, public_origin, UuidRequestId, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
