//! `<meta http-equiv="refresh" content="…">` rewriting.
//!
//! The directive is `<delay>[;,] [url=]<target>`. Only the target span is
//! replaced; the delay, separator, `url=` spelling and quotes stay as written.

use std::ops::Range;

/// Byte range of the target URL inside a refresh directive, if any.
pub fn target_span(content: &str) -> Option<Range<usize>> {
    let bytes = content.as_bytes();
    let sep = content.find([';', ','])?;
    let mut i = sep + 1;

    let skip_ws = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    };

    i = skip_ws(i);
    if content
        .get(i..i + 3)
        .is_some_and(|word| word.eq_ignore_ascii_case("url"))
    {
        let after_word = skip_ws(i + 3);
        if bytes.get(after_word) == Some(&b'=') {
            i = skip_ws(after_word + 1);
        }
    }

    let quote = match bytes.get(i) {
        Some(&q @ (b'\'' | b'"')) => {
            i += 1;
            Some(q)
        }
        _ => None,
    };

    let start = i;
    let mut end = match quote {
        Some(q) => content[start..]
            .bytes()
            .position(|b| b == q)
            .map_or(content.len(), |p| start + p),
        None => content.len(),
    };
    while end > start && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }

    (end > start).then_some(start..end)
}

/// Rewrite the refresh target with `map`; unchanged when there is no target
/// or `map` declines.
pub fn rewrite_refresh<F>(content: &str, map: F) -> String
where
    F: FnOnce(&str) -> Option<String>,
{
    let Some(span) = target_span(content) else {
        return content.to_string();
    };
    match map(&content[span.clone()]) {
        Some(replacement) => {
            let mut out = String::with_capacity(content.len() + replacement.len());
            out.push_str(&content[..span.start]);
            out.push_str(&replacement);
            out.push_str(&content[span.end..]);
            out
        }
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(url: &str) -> Option<String> {
        Some(format!("<{url}>"))
    }

    #[test]
    fn test_preserves_delay_and_separator() {
        assert_eq!(rewrite_refresh("5;url=/next", tag), "5;url=</next>");
        assert_eq!(rewrite_refresh("0; URL = /next", tag), "0; URL = </next>");
        assert_eq!(rewrite_refresh("10,url=a.html", tag), "10,url=<a.html>");
    }

    #[test]
    fn test_quoted_target() {
        assert_eq!(
            rewrite_refresh("3; url='https://a.com/x' ", tag),
            "3; url='<https://a.com/x>' "
        );
        assert_eq!(rewrite_refresh("3;url=\"b\"", tag), "3;url=\"<b>\"");
    }

    #[test]
    fn test_bare_target_without_url_keyword() {
        assert_eq!(rewrite_refresh("2; https://a.com/", tag), "2; <https://a.com/>");
    }

    #[test]
    fn test_delay_only_is_untouched() {
        assert_eq!(rewrite_refresh("30", tag), "30");
        assert_eq!(rewrite_refresh("30; ", tag), "30; ");
        assert!(target_span("5;url=").is_none());
    }
}
