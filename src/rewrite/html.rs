//! HTML document rewriting.
//!
//! # Pipeline
//! ```text
//! bytes ─▶ scan pass ─────────────▶ DocumentScan { head?, base?, marker? }
//!       └▶ rewrite pass (lol_html) ─▶ <head> gets <base> + shim block,
//!                                     every target attribute proxied
//!       └▶ no <head>? splice "<head>…</head>" after <html>/<!doctype>
//! ```
//!
//! # Design Decisions
//! - lol_html's tokenizer is error-tolerant; malformed markup never aborts
//! - Untouched elements are emitted byte-for-byte; an attribute is only set
//!   when its rewritten value differs, so a second pass changes nothing
//! - Any rewriter failure yields `RewriteOutcome::Degraded` with the original body

use std::borrow::Cow;
use std::cell::{Cell, RefCell};

use lol_html::html_content::ContentType;
use lol_html::{element, HtmlRewriter, MemorySettings, Settings};
use url::Url;

use crate::rewrite::shim::{self, MARKER_ATTR};
use crate::rewrite::{canonicalize, refresh, srcset, RewriteContext};

/// Closed set of rewritten `(tag, attribute)` pairs.
pub const REWRITE_TARGETS: &[(&str, &str)] = &[
    ("a", "href"),
    ("area", "href"),
    ("link", "href"),
    ("img", "src"),
    ("img", "srcset"),
    ("source", "src"),
    ("source", "srcset"),
    ("script", "src"),
    ("iframe", "src"),
    ("frame", "src"),
    ("embed", "src"),
    ("video", "src"),
    ("video", "poster"),
    ("audio", "src"),
    ("track", "src"),
    ("object", "data"),
    ("input", "src"),
    ("input", "formaction"),
    ("button", "formaction"),
    ("form", "action"),
];

/// Result of rewriting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    Rewritten(Vec<u8>),
    /// Rewriting failed; `body` is the original input.
    Degraded { body: Vec<u8>, reason: String },
}

impl RewriteOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, RewriteOutcome::Degraded { .. })
    }

    pub fn into_body(self) -> Vec<u8> {
        match self {
            RewriteOutcome::Rewritten(body) | RewriteOutcome::Degraded { body, .. } => body,
        }
    }
}

/// What the scan pass learned about a document.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct DocumentScan {
    has_head: bool,
    /// A literal `</head>` exists; minified pages often leave it out.
    head_closed: bool,
    has_base: bool,
    base_href: Option<String>,
    has_marker: bool,
}

/// Limits applied to the HTML tokenizer.
#[derive(Debug, Clone, Copy)]
pub struct HtmlLimits {
    /// Bytes fed to the rewriter per write.
    pub chunk_size: usize,
    /// Ceiling on the tokenizer's buffered memory.
    pub max_memory: usize,
}

impl Default for HtmlLimits {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            max_memory: 8 * 1024 * 1024,
        }
    }
}

/// Rewrite `body` for `ctx` with default limits.
pub fn rewrite_html(body: &[u8], ctx: &RewriteContext) -> RewriteOutcome {
    rewrite_html_with(body, ctx, HtmlLimits::default())
}

/// Rewrite `body` for `ctx`; never fails, degrades instead.
pub fn rewrite_html_with(body: &[u8], ctx: &RewriteContext, limits: HtmlLimits) -> RewriteOutcome {
    match try_rewrite(body, ctx, limits) {
        Ok(out) => RewriteOutcome::Rewritten(out),
        Err(reason) => {
            tracing::warn!(
                target_url = %ctx.target,
                degraded = true,
                reason = %reason,
                "HTML rewrite failed, serving original body"
            );
            crate::observability::metrics::record_rewrite_degraded("rewrite_error");
            RewriteOutcome::Degraded {
                body: body.to_vec(),
                reason,
            }
        }
    }
}

fn memory_settings(limits: HtmlLimits) -> MemorySettings {
    let mut settings = MemorySettings::default();
    settings.preallocated_parsing_buffer_size = limits.max_memory.min(1024);
    settings.max_allowed_memory_usage = limits.max_memory;
    settings
}

fn feed<O: lol_html::OutputSink>(
    mut rewriter: HtmlRewriter<'_, O>,
    body: &[u8],
    chunk_size: usize,
) -> Result<(), String> {
    for chunk in body.chunks(chunk_size.max(1)) {
        rewriter.write(chunk).map_err(|e| e.to_string())?;
    }
    rewriter.end().map_err(|e| e.to_string())
}

fn scan(body: &[u8], limits: HtmlLimits) -> Result<DocumentScan, String> {
    let found = RefCell::new(DocumentScan::default());

    let rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("head", |_el| {
                    found.borrow_mut().has_head = true;
                    Ok(())
                }),
                element!("base", |el| {
                    let mut found = found.borrow_mut();
                    found.has_base = true;
                    // Our own <base> never overrides resolution against the target.
                    if found.base_href.is_none() && !el.has_attribute(MARKER_ATTR) {
                        found.base_href = el.get_attribute("href").map(|v| unescape_attr(&v).into_owned());
                    }
                    Ok(())
                }),
                element!("script[data-unblocker]", |_el| {
                    found.borrow_mut().has_marker = true;
                    Ok(())
                }),
            ],
            memory_settings: memory_settings(limits),
            strict: false,
            ..Settings::default()
        },
        |_: &[u8]| {},
    );

    feed(rewriter, body, limits.chunk_size)?;
    let mut doc = found.into_inner();
    doc.head_closed = find(&body.to_ascii_lowercase(), b"</head").is_some();
    Ok(doc)
}

fn try_rewrite(body: &[u8], ctx: &RewriteContext, limits: HtmlLimits) -> Result<Vec<u8>, String> {
    let doc = scan(body, limits)?;

    // An existing <base> decides how relative references resolve.
    let resolve_base: Url = doc
        .base_href
        .as_deref()
        .and_then(|href| canonicalize(href, Some(&ctx.target)).ok())
        .unwrap_or_else(|| ctx.target.clone());

    let base_markup = if doc.has_base { String::new() } else { shim::base_tag(ctx) };
    let script_markup = if doc.has_marker { String::new() } else { shim::script_block(ctx) };

    let target_selector = REWRITE_TARGETS
        .iter()
        .map(|(tag, attr)| format!("{tag}[{attr}]"))
        .collect::<Vec<_>>()
        .join(", ");

    let head_done = Cell::new(false);
    let mut output = Vec::with_capacity(body.len() + base_markup.len() + script_markup.len());

    let rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("head", |el| {
                    if head_done.replace(true) {
                        return Ok(());
                    }
                    // Without a real </head> the implicit close lands after the
                    // body, so the shim goes first to run before page scripts.
                    if doc.head_closed {
                        el.prepend(&base_markup, ContentType::Html);
                        el.append(&script_markup, ContentType::Html);
                    } else {
                        el.prepend(&format!("{base_markup}{script_markup}"), ContentType::Html);
                    }
                    Ok(())
                }),
                element!("base[href]", |el| {
                    if el.has_attribute(MARKER_ATTR) {
                        return Ok(());
                    }
                    if let Some(raw) = el.get_attribute("href") {
                        let href = unescape_attr(&raw);
                        if let Ok(absolute) = canonicalize(&href, Some(&ctx.target)) {
                            if absolute.as_str() != href {
                                el.set_attribute("href", absolute.as_str())?;
                            }
                        }
                    }
                    Ok(())
                }),
                element!("meta[http-equiv]", |el| {
                    let equiv = el.get_attribute("http-equiv").unwrap_or_default();
                    if equiv.eq_ignore_ascii_case("content-security-policy")
                        || equiv.eq_ignore_ascii_case("content-security-policy-report-only")
                    {
                        el.remove();
                    } else if equiv.eq_ignore_ascii_case("refresh") {
                        if let Some(raw) = el.get_attribute("content") {
                            let content = unescape_attr(&raw);
                            let rewritten = refresh::rewrite_refresh(&content, |url| {
                                ctx.proxify(url, &resolve_base)
                            });
                            if rewritten != content {
                                el.set_attribute("content", &rewritten)?;
                            }
                        }
                    }
                    Ok(())
                }),
                element!("form:not([action])", |el| {
                    el.set_attribute("action", &ctx.codec.encode_url(&ctx.target))?;
                    Ok(())
                }),
                element!(target_selector.as_str(), |el| {
                    if el.has_attribute(MARKER_ATTR) {
                        return Ok(());
                    }
                    let tag = el.tag_name();
                    for (_, attr) in REWRITE_TARGETS.iter().filter(|(t, _)| *t == tag) {
                        let Some(raw) = el.get_attribute(attr) else {
                            continue;
                        };
                        let value = unescape_attr(&raw);
                        let rewritten = if *attr == "srcset" {
                            let list = srcset::rewrite_srcset(&value, |url| {
                                ctx.proxify(url, &resolve_base)
                            });
                            (list != value).then_some(list)
                        } else {
                            ctx.proxify(&value, &resolve_base)
                        };
                        if let Some(new_value) = rewritten {
                            el.set_attribute(attr, &new_value)?;
                        }
                    }
                    Ok(())
                }),
            ],
            memory_settings: memory_settings(limits),
            strict: false,
            ..Settings::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    feed(rewriter, body, limits.chunk_size)?;

    if !doc.has_head && !(base_markup.is_empty() && script_markup.is_empty()) {
        let head = format!("<head>{base_markup}{script_markup}</head>");
        output = splice_head(output, &head);
    }

    Ok(output)
}

/// Insert a synthesized `<head>` after `<html …>`, else after `<!doctype …>`,
/// else at the very start.
fn splice_head(body: Vec<u8>, head: &str) -> Vec<u8> {
    let lower = body.to_ascii_lowercase();
    let at = find_tag_end(&lower, b"<html")
        .or_else(|| find_doctype_end(&lower))
        .unwrap_or(0);

    let mut out = Vec::with_capacity(body.len() + head.len());
    out.extend_from_slice(&body[..at]);
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(&body[at..]);
    out
}

fn find_tag_end(lower: &[u8], tag: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = find(&lower[from..], tag) {
        let boundary = from + rel + tag.len();
        match lower.get(boundary) {
            Some(next) if next.is_ascii_alphanumeric() => from = boundary,
            Some(_) => return find(&lower[boundary..], b">").map(|p| boundary + p + 1),
            None => return None,
        }
    }
    None
}

fn find_doctype_end(lower: &[u8]) -> Option<usize> {
    let start = find(lower, b"<!doctype")?;
    find(&lower[start..], b">").map(|p| start + p + 1)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Decode the character references that matter inside URL attributes.
///
/// lol_html hands attribute values over exactly as written in the source.
fn unescape_attr(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest.find(';').filter(|&semi| semi <= 10).and_then(|semi| {
            let name = &rest[1..semi];
            let ch = match name {
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "lt" => Some('<'),
                "gt" => Some('>'),
                _ => name
                    .strip_prefix("#x")
                    .or_else(|| name.strip_prefix("#X"))
                    .map(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| name.strip_prefix('#').map(|dec| dec.parse::<u32>().ok()))
                    .flatten()
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi))
        });

        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}
