//! URL rewriting subsystem.
//!
//! # Data Flow
//! ```text
//! raw attribute value
//!     → canonical.rs (resolve against document, http(s) only)
//!     → codec.rs (percent-encode behind the proxy prefix)
//!     → html.rs writes it back into the element
//!
//! html.rs also injects:
//!     <base href=remote origin+path>   (first child of <head>)
//!     shim.rs script block             (before </head>)
//! ```
//!
//! The client shim (`assets/unblocker.js`) applies the same resolve/encode
//! rules in the browser to URLs that appear after load.

pub mod canonical;
pub mod codec;
pub mod html;
pub mod refresh;
pub mod shim;
pub mod srcset;

use url::Url;

pub use canonical::{canonicalize, is_excluded_scheme};
pub use codec::ProxyCodec;
pub use html::{rewrite_html, RewriteOutcome};

/// Everything one HTML rewrite needs; built per document, read-only during traversal.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// The document's true remote URL (final URL after redirects).
    pub target: Url,
    pub codec: ProxyCodec,
    /// Absolute URL of the shim asset.
    pub shim_src: String,
}

impl RewriteContext {
    pub fn new(target: Url, codec: ProxyCodec, shim_src: String) -> Self {
        Self {
            target,
            codec,
            shim_src,
        }
    }

    /// `href` for the injected `<base>`.
    pub fn base_href(&self) -> Url {
        canonical::document_base(&self.target)
    }

    /// Proxied form of `raw` resolved against `base`, or `None` when the
    /// value must stay as written (empty, already proxied, excluded scheme,
    /// unresolvable).
    pub fn proxify(&self, raw: &str, base: &Url) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || self.codec.is_token(trimmed) || is_excluded_scheme(trimmed) {
            return None;
        }
        let resolved = canonicalize(trimmed, Some(base)).ok()?;
        let token = self.codec.encode_url(&resolved);
        (token != raw).then_some(token)
    }
}
