//! `srcset` candidate list rewriting.
//!
//! Only the URL span of each candidate is replaced; whitespace, commas and
//! descriptors are copied through byte-for-byte, so candidate count, order
//! and descriptors never change.

use std::ops::Range;

/// Byte ranges of every candidate URL in a `srcset` value, in order.
pub fn candidate_urls(value: &str) -> Vec<Range<usize>> {
    let bytes = value.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b',') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut end = i;

        if bytes[end - 1] == b',' {
            // "a.png, b.png": trailing commas close the candidate, no descriptor.
            while end > start && bytes[end - 1] == b',' {
                end -= 1;
            }
        } else {
            let mut depth = 0usize;
            while i < bytes.len() {
                match bytes[i] {
                    b'(' => depth += 1,
                    b')' => depth = depth.saturating_sub(1),
                    b',' if depth == 0 => break,
                    _ => {}
                }
                i += 1;
            }
        }

        if end > start {
            spans.push(start..end);
        }
    }

    spans
}

/// Rewrite each candidate URL with `map`; `None` keeps the URL as written.
pub fn rewrite_srcset<F>(value: &str, mut map: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len() * 2);
    let mut cursor = 0;

    for span in candidate_urls(value) {
        out.push_str(&value[cursor..span.start]);
        let url = &value[span.clone()];
        match map(url) {
            Some(replacement) => out.push_str(&replacement),
            None => out.push_str(url),
        }
        cursor = span.end;
    }
    out.push_str(&value[cursor..]);
    out
}
