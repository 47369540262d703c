//! URL canonicalization.
//!
//! Resolves a possibly-relative reference against a base into an absolute
//! `http(s)` URL. Pure: the same `(raw, base)` always gives the same answer.

use url::Url;

use crate::error::ProxyError;

/// Schemes that are left exactly as written by every rewriter.
pub const EXCLUDED_SCHEMES: &[&str] = &["data:", "blob:", "javascript:", "about:"];

/// True when `raw` starts with one of [`EXCLUDED_SCHEMES`] (ASCII case-insensitive,
/// leading whitespace ignored the way browsers ignore it).
pub fn is_excluded_scheme(raw: &str) -> bool {
    let trimmed = raw.trim_start();
    EXCLUDED_SCHEMES.iter().any(|scheme| {
        trimmed
            .get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
    })
}

/// Resolve `raw` against `base` and require an `http`/`https` result.
///
/// `base` is `None` for top-level targets, in which case `raw` must already
/// be absolute.
pub fn canonicalize(raw: &str, base: Option<&Url>) -> Result<Url, ProxyError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProxyError::InvalidUrl("empty url".to_string()));
    }

    let parsed = match base {
        Some(base) => base.join(trimmed),
        None => Url::parse(trimmed),
    }
    .map_err(|e| ProxyError::InvalidUrl(format!("{trimmed}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some_and(|h| !h.is_empty()) => Ok(parsed),
        "http" | "https" => Err(ProxyError::InvalidUrl(format!("{trimmed}: missing host"))),
        other => Err(ProxyError::InvalidUrl(format!(
            "{trimmed}: scheme {other:?} is not proxied"
        ))),
    }
}

/// The document base used for `<base href>`: origin + path, no query or fragment.
pub fn document_base(target: &Url) -> Url {
    let mut base = target.clone();
    base.set_query(None);
    base.set_fragment(None);
    base
}
