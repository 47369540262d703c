//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, body limit, request ID)
//! - Bind server to listener and drain on shutdown
//! - Turn proxied paths into upstream fetches and hand the result to the
//!   content router
//! - Observability (metrics, correlation IDs)

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{ProxyConfig, RedirectMode};
use crate::error::ProxyError;
use crate::http::request::{extract_target, public_origin, request_id, UuidRequestId, X_REQUEST_ID};
use crate::http::response;
use crate::observability::metrics;
use crate::rewrite::{shim, ProxyCodec};
use crate::routing::Dispatch;
use crate::upstream::{ProxyRequest, UpstreamClient};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub client: UpstreamClient,
    /// Codec with root-relative tokens; anchored per request to the public origin.
    pub codec: ProxyCodec,
}

/// Which entry point a request came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    /// `<prefix><token>`: any forwardable method, redirects per config.
    Proxy,
    /// `<page_prefix><token>`: GET/HEAD, redirects always followed.
    Page,
}

impl Entry {
    fn as_str(&self) -> &'static str {
        match self {
            Entry::Proxy => "proxy",
            Entry::Page => "page",
        }
    }
}

/// HTTP server for the unblocking proxy.
pub struct HttpServer {
    router: Router,
    config: Arc<ProxyConfig>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let client = UpstreamClient::from_config(&config.upstream)?;
        let config = Arc::new(config);
        let state = AppState {
            codec: ProxyCodec::new(config.proxy.prefix.clone()),
            config: config.clone(),
            client,
        };

        let router = Self::build_router(&config, state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let paths = &config.proxy;
        let x_request_id = HeaderName::from_static(X_REQUEST_ID);

        Router::new()
            .route("/health", get(response::health))
            .route(&paths.shim_path, get(response::shim_asset))
            .route(&paths.prefix, any(proxy_handler))
            .route(&format!("{}{{*rest}}", paths.prefix), any(proxy_handler))
            .route(&paths.page_prefix, get(page_handler))
            .route(&format!("{}{{*rest}}", paths.page_prefix), get(page_handler))
            .fallback(not_found)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(x_request_id.clone(), UuidRequestId))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(x_request_id))
                    .layer(RequestBodyLimitLayer::new(config.listener.max_request_body_bytes)),
            )
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            prefix = %self.config.proxy.prefix,
            page_prefix = %self.config.proxy.page_prefix,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    forward(state, request, Entry::Proxy).await
}

async fn page_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    forward(state, request, Entry::Page).await
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

/// Run one proxied request and record its outcome.
async fn forward(state: AppState, request: Request<Body>, entry: Entry) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let request_id = request_id(request.headers()).to_string();
    let path = request.uri().path().to_string();

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        entry = entry.as_str(),
        "Proxying request"
    );

    let response = match handle(&state, request, entry).await {
        Ok(response) => response,
        Err(e) => {
            if e.status().is_server_error() {
                tracing::error!(request_id = %request_id, kind = e.kind(), error = %e, "Proxy request failed");
            } else {
                tracing::warn!(request_id = %request_id, kind = e.kind(), error = %e, "Proxy request rejected");
            }
            e.into_response()
        }
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), entry.as_str(), start);
    response
}

async fn handle(state: &AppState, request: Request<Body>, entry: Entry) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let config = &state.config;

    let (route_prefix, redirects) = match entry {
        Entry::Proxy => {
            let forwardable = [
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
            ];
            if !forwardable.contains(&parts.method) {
                return Err(ProxyError::MethodNotAllowed(parts.method.to_string()));
            }
            (&config.proxy.prefix, config.upstream.raw_redirects)
        }
        Entry::Page => (&config.proxy.page_prefix, RedirectMode::Follow),
    };

    let target = extract_target(&parts.uri, route_prefix, &state.codec)?;

    let origin = config
        .proxy
        .public_origin
        .clone()
        .or_else(|| public_origin(&parts.headers, &parts.uri));
    let codec = match &origin {
        Some(origin) => state.codec.with_origin(origin),
        None => state.codec.clone(),
    };
    let shim_src = shim::shim_src(origin.as_deref().unwrap_or_default(), &config.proxy.shim_path);

    let limit = config.listener.max_request_body_bytes;
    let body = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| ProxyError::RequestTooLarge { limit })?;

    let upstream = state
        .client
        .fetch(
            ProxyRequest {
                method: parts.method.clone(),
                target,
                headers: parts.headers,
                body,
            },
            &codec,
            redirects,
        )
        .await?;

    Dispatch {
        config: &config.content,
        codec: &codec,
        shim_src: &shim_src,
        method: &parts.method,
        timeout: config.upstream.timeout(),
    }
    .respond(upstream)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn server() -> HttpServer {
        HttpServer::new(ProxyConfig::default()).unwrap()
    }

    async fn call(method: Method, uri: &str) -> Response {
        server()
            .router()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("host", "proxy.local")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_has_request_id() {
        let response = call(Method::GET, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn test_shim_asset_served() {
        let response = call(Method::GET, "/static/unblocker.js").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            shim::SHIM_CONTENT_TYPE
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], shim::SHIM_JS.as_bytes());
    }

    #[tokio::test]
    async fn test_invalid_targets_are_400() {
        for uri in ["/proxy/ftp%3A%2F%2Fhost%2Ffile", "/proxy/", "/page-proxy/javascript%3Aalert(1)"] {
            let response = call(Method::GET, uri).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_unknown_paths_are_404() {
        let response = call(Method::GET, "/elsewhere").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_method_restrictions() {
        let response = call(Method::OPTIONS, "/proxy/https%3A%2F%2Fa.test%2F").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = call(Method::POST, "/page-proxy/https%3A%2F%2Fa.test%2F").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
