//! End-to-end flows through a running proxy.

use std::io::Write;
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use flate2::write::GzEncoder;
use flate2::Compression;
use unblock_proxy::config::{ProxyConfig, RedirectMode};

mod common;
use common::{MockResponse, SeenRequest};

const PAGE: &str = "<!doctype html><html><head><title>t</title></head>\
<body><a href=\"/x\">x</a><img srcset=\"a.png 1x, b.png 2x\"></body></html>";

#[tokio::test]
async fn test_html_page_is_rewritten() {
    let upstream = common::start_mock_upstream(
        MockResponse::new(200, "text/html; charset=utf-8", PAGE).header("ETag", "\"v1\""),
    )
    .await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let target = format!("http://{upstream}/dir/page");
    let res = common::client()
        .get(proxy.proxied("/page-proxy/", &target))
        .send()
        .await
        .expect("Proxy unreachable");

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["cache-control"], "no-store");
    assert!(res.headers().get("etag").is_none());
    assert!(res.headers().contains_key("x-request-id"));

    let body = res.text().await.unwrap();
    let x = proxy.proxied("/proxy/", &format!("http://{upstream}/x"));
    let a = proxy.proxied("/proxy/", &format!("http://{upstream}/dir/a.png"));
    let b = proxy.proxied("/proxy/", &format!("http://{upstream}/dir/b.png"));

    assert!(body.contains(&format!("<a href=\"{x}\">")), "{body}");
    assert!(body.contains(&format!("srcset=\"{a} 1x, {b} 2x\"")), "{body}");
    assert!(body.contains(&format!("<base data-unblocker href=\"{target}\">")), "{body}");
    assert!(body.contains("window.__UNBLOCKER_CONFIG__"));
    assert!(body.contains(&format!("src=\"{}?v=", proxy.url("/static/unblocker.js"))));
    assert!(body.starts_with("<!doctype html><html><head><base"));

    proxy.stop();
}

#[tokio::test]
async fn test_binary_body_is_byte_identical() {
    let png: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let upstream = common::start_mock_upstream(MockResponse::new(200, "image/png", png.clone())).await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let res = common::client()
        .get(proxy.proxied("/proxy/", &format!("http://{upstream}/img.png")))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "image/png");
    assert_eq!(res.bytes().await.unwrap().to_vec(), png);

    proxy.stop();
}

#[tokio::test]
async fn test_media_is_streamed_with_range_headers() {
    let data = vec![42u8; 300_000];
    let upstream = common::start_mock_upstream(
        MockResponse::new(206, "video/mp4", data.clone())
            .header("Accept-Ranges", "bytes")
            .header("Content-Range", "bytes 0-299999/900000"),
    )
    .await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let res = common::client()
        .get(proxy.proxied("/proxy/", &format!("http://{upstream}/v.mp4")))
        .header("Range", "bytes=0-299999")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(res.headers()["accept-ranges"], "bytes");
    assert_eq!(res.headers()["content-range"], "bytes 0-299999/900000");
    assert_eq!(res.bytes().await.unwrap().len(), data.len());

    proxy.stop();
}

#[tokio::test]
async fn test_invalid_target_is_400() {
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let res = common::client()
        .get(proxy.proxied("/proxy/", "ftp://host/file"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    proxy.stop();
}

#[tokio::test]
async fn test_health() {
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let res = common::client().get(proxy.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let json: serde_json::Value = res.json().await.unwrap();
    assert_eq!(json["status"], "ok");

    proxy.stop();
}

#[tokio::test]
async fn test_surfaced_redirect_points_back_through_proxy() {
    let upstream = common::start_mock_upstream(
        MockResponse::new(302, "text/html", "").header("Location", "/moved?a=1"),
    )
    .await;
    let mut config = ProxyConfig::default();
    config.upstream.raw_redirects = RedirectMode::Surface;
    let proxy = common::start_proxy(config).await;

    let res = common::client()
        .get(proxy.proxied("/proxy/", &format!("http://{upstream}/old")))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(
        res.headers()["location"],
        proxy
            .proxied("/proxy/", &format!("http://{upstream}/moved?a=1"))
            .as_str()
    );

    proxy.stop();
}

#[tokio::test]
async fn test_page_entry_follows_redirects_and_uses_final_url() {
    let upstream = common::start_programmable_upstream(|req: SeenRequest| async move {
        if req.path == "/start" {
            MockResponse::new(302, "text/plain", "").header("Location", "/final/doc")
        } else {
            MockResponse::new(200, "text/html", "<html><head></head><img src=\"i.png\"></html>")
        }
    })
    .await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let res = common::client()
        .get(proxy.proxied("/page-proxy/", &format!("http://{upstream}/start")))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    let body = res.text().await.unwrap();
    let img = proxy.proxied("/proxy/", &format!("http://{upstream}/final/i.png"));
    assert!(body.contains(&format!("src=\"{img}\"")), "{body}");
    assert!(body.contains(&format!("href=\"http://{upstream}/final/doc\"")), "{body}");

    proxy.stop();
}

#[tokio::test]
async fn test_gzip_html_is_decoded_and_rewritten() {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(b"<html><head></head><a href=\"/g\">g</a></html>").unwrap();
    let gz = enc.finish().unwrap();

    let upstream = common::start_mock_upstream(
        MockResponse::new(200, "text/html", gz).header("Content-Encoding", "gzip"),
    )
    .await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let res = common::client()
        .get(proxy.proxied("/proxy/", &format!("http://{upstream}/")))
        .send()
        .await
        .unwrap();

    assert!(res.headers().get("content-encoding").is_none());
    let body = res.text().await.unwrap();
    let g = proxy.proxied("/proxy/", &format!("http://{upstream}/g"));
    assert!(body.contains(&format!("href=\"{g}\"")), "{body}");

    proxy.stop();
}

#[tokio::test]
async fn test_request_headers_and_body_are_forwarded_by_policy() {
    let seen: Arc<Mutex<Option<SeenRequest>>> = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let upstream = common::start_programmable_upstream(move |req: SeenRequest| {
        let sink = sink.clone();
        async move {
            *sink.lock().unwrap() = Some(req);
            MockResponse::new(200, "application/json", "{}")
                .header("Set-Cookie", "sid=1; Domain=.remote.test; Path=/")
                .header("Content-Security-Policy", "default-src 'self'")
        }
    })
    .await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let referer = proxy.proxied("/proxy/", &format!("http://{upstream}/form"));
    let res = common::client()
        .post(proxy.proxied("/proxy/", &format!("http://{upstream}/submit")))
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Cookie", "sid=0")
        .header("Referer", &referer)
        .header("X-Secret", "do-not-forward")
        .body("a=1&b=2")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["set-cookie"], "sid=1; Path=/");
    assert!(res.headers().get("content-security-policy").is_none());

    let req = seen.lock().unwrap().clone().expect("upstream saw no request");
    assert_eq!(req.method, "POST");
    assert_eq!(req.path, "/submit");
    assert_eq!(req.body, b"a=1&b=2");
    assert_eq!(req.header("cookie"), Some("sid=0"));
    assert_eq!(req.header("accept-encoding"), Some("identity"));
    assert_eq!(req.header("referer"), Some(format!("http://{upstream}/form").as_str()));
    assert!(req.header("user-agent").is_some_and(|ua| ua.starts_with("Mozilla/5.0")));
    assert!(req.header("x-secret").is_none());

    proxy.stop();
}

#[tokio::test]
async fn test_get_form_query_replaces_target_query() {
    let seen: Arc<Mutex<Option<SeenRequest>>> = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let upstream = common::start_programmable_upstream(move |req: SeenRequest| {
        let sink = sink.clone();
        async move {
            *sink.lock().unwrap() = Some(req);
            MockResponse::new(200, "text/plain", "ok")
        }
    })
    .await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    let action = proxy.proxied("/proxy/", &format!("http://{upstream}/search?old=1"));
    let res = common::client()
        .get(format!("{action}?q=rust"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let req = seen.lock().unwrap().clone().unwrap();
    assert_eq!(req.path, "/search?q=rust");

    proxy.stop();
}
