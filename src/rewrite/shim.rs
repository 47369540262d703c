//! Client interception shim: the embedded asset and the markup that loads it.

use serde::Serialize;

use crate::rewrite::RewriteContext;

/// The browser-side interception script, versioned with the binary.
pub const SHIM_JS: &str = include_str!("../../assets/unblocker.js");

/// Attribute carried by every element the rewriter injects.
pub const MARKER_ATTR: &str = "data-unblocker";

/// Value served as `Content-Type` for [`SHIM_JS`].
pub const SHIM_CONTENT_TYPE: &str = "application/javascript; charset=utf-8";

/// Configuration handed to the shim as `window.__UNBLOCKER_CONFIG__`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShimConfig<'a> {
    /// Prefix of emitted tokens (absolute, includes the proxy origin).
    pub prefix: &'a str,
    /// Bare path prefix, also recognised as "already proxied".
    pub path_prefix: &'a str,
    /// The true remote document URL; the visible address is the proxy's.
    pub url: &'a str,
}

/// `src` of the shim asset, cache-busted by crate version.
pub fn shim_src(origin: &str, shim_path: &str) -> String {
    format!(
        "{}{}?v={}",
        origin.trim_end_matches('/'),
        shim_path,
        env!("CARGO_PKG_VERSION")
    )
}

/// Script block injected into `<head>`: config declaration, then the shim.
pub fn script_block(ctx: &RewriteContext) -> String {
    let config = ShimConfig {
        prefix: ctx.codec.prefix(),
        path_prefix: ctx.codec.path_prefix(),
        url: ctx.target.as_str(),
    };
    // `</script>` inside the JSON would end the block early.
    let json = serde_json::to_string(&config)
        .unwrap_or_else(|_| "{}".to_string())
        .replace("</", "<\\/");

    format!(
        "<script {MARKER_ATTR}>window.__UNBLOCKER_CONFIG__ = {json};</script>\
         <script {MARKER_ATTR} src=\"{}\"></script>",
        escape_attr(&ctx.shim_src)
    )
}

/// `<base>` element anchoring unproxied relative URLs to the remote document.
pub fn base_tag(ctx: &RewriteContext) -> String {
    format!(
        "<base {MARKER_ATTR} href=\"{}\">",
        escape_attr(ctx.base_href().as_str())
    )
}

pub(crate) fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::ProxyCodec;
    use url::Url;

    fn ctx(target: &str) -> RewriteContext {
        RewriteContext::new(
            Url::parse(target).unwrap(),
            ProxyCodec::new("/proxy/").with_origin("http://proxy.local"),
            shim_src("http://proxy.local", "/static/unblocker.js"),
        )
    }

    #[test]
    fn test_script_block_declares_config_then_loads_shim() {
        let block = script_block(&ctx("https://a.com/dir/page?q=1"));
        let config_at = block.find("__UNBLOCKER_CONFIG__").unwrap();
        let src_at = block.find("src=\"http://proxy.local/static/unblocker.js?v=").unwrap();
        assert!(config_at < src_at);
        assert!(block.contains(r#""prefix":"http://proxy.local/proxy/""#));
        assert!(block.contains(r#""pathPrefix":"/proxy/""#));
        assert!(block.contains(r#""url":"https://a.com/dir/page?q=1""#));
        assert_eq!(block.matches(MARKER_ATTR).count(), 2);
    }

    #[test]
    fn test_script_block_cannot_close_early() {
        let block = script_block(&ctx("https://a.com/%3C/script%3E</script>"));
        assert_eq!(block.matches("</script>").count(), 2);
    }

    #[test]
    fn test_base_tag_is_origin_and_path() {
        assert_eq!(
            base_tag(&ctx("https://example.com/dir/page?x=1#y")),
            "<base data-unblocker href=\"https://example.com/dir/page\">"
        );
    }

    #[test]
    fn test_asset_exposes_named_patch_points() {
        for name in [
            "fixUrl",
            "patchFetch",
            "patchXhr",
            "patchCreateElement",
            "patchHistory",
            "patchWindowOpen",
            "watchMutations",
            "__UNBLOCKER_CONFIG__",
        ] {
            assert!(SHIM_JS.contains(name), "missing {name}");
        }
    }
}
