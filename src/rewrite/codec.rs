//! Proxy URL codec.
//!
//! Maps an absolute upstream URL to its proxied token and back:
//!
//! ```text
//! https://a.com/x?y=1   ⇄   /proxy/https%3A%2F%2Fa.com%2Fx%3Fy%3D1
//! ```
//!
//! Everything except `A-Z a-z 0-9 - _ . ~` is percent-encoded, which is the
//! same byte-for-byte output the client shim produces, so both halves emit
//! identical tokens for identical URLs.
//!
//! Inside rewritten documents the token carries the proxy's public origin
//! (`http://proxy.host/proxy/…`): the injected `<base>` points at the remote
//! origin, so a root-relative token would resolve there instead of here.

use url::Url;

use crate::error::ProxyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCodec {
    path_prefix: String,
    public_prefix: String,
}

impl ProxyCodec {
    /// Codec emitting root-relative tokens (`/proxy/…`).
    pub fn new(path_prefix: impl Into<String>) -> Self {
        let path_prefix = path_prefix.into();
        Self {
            public_prefix: path_prefix.clone(),
            path_prefix,
        }
    }

    /// Same codec, emitting tokens anchored at `origin` (e.g. `http://localhost:8080`).
    pub fn with_origin(&self, origin: &str) -> Self {
        Self {
            path_prefix: self.path_prefix.clone(),
            public_prefix: format!("{}{}", origin.trim_end_matches('/'), self.path_prefix),
        }
    }

    /// The prefix written in front of encoded URLs.
    pub fn prefix(&self) -> &str {
        &self.public_prefix
    }

    /// The routing prefix, always a bare path.
    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    /// True if `value` is already a proxied token, in either form.
    pub fn is_token(&self, value: &str) -> bool {
        value.starts_with(&self.public_prefix) || value.starts_with(&self.path_prefix)
    }

    /// Encode an absolute URL. Already-prefixed input is returned unchanged.
    pub fn encode(&self, absolute: &str) -> String {
        if self.is_token(absolute) {
            return absolute.to_string();
        }
        format!("{}{}", self.public_prefix, urlencoding::encode(absolute))
    }

    /// Encode a resolved URL for use in a document, keeping any fragment
    /// outside the token so the browser handles it locally.
    pub fn encode_url(&self, url: &Url) -> String {
        match url.fragment() {
            Some(fragment) => {
                let mut without = url.clone();
                without.set_fragment(None);
                format!("{}#{}", self.encode(without.as_str()), fragment)
            }
            None => self.encode(url.as_str()),
        }
    }

    /// Strip either prefix and percent-decode. Input without a prefix is
    /// treated as the bare encoded part.
    pub fn decode(&self, token: &str) -> Result<String, ProxyError> {
        let encoded = token
            .strip_prefix(self.public_prefix.as_str())
            .or_else(|| token.strip_prefix(self.path_prefix.as_str()))
            .unwrap_or(token);
        let decoded = urlencoding::decode(encoded)
            .map_err(|e| ProxyError::InvalidUrl(format!("undecodable token: {e}")))?
            .into_owned();

        let head = decoded.get(..8).unwrap_or(&decoded).to_ascii_lowercase();
        if head.starts_with("http://") || head.starts_with("https://") {
            Ok(decoded)
        } else {
            Err(ProxyError::InvalidUrl(format!(
                "decoded target is not http(s): {decoded}"
            )))
        }
    }
}
