use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Environment;
use crate::ProxyApp;

async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// `/metrics`: a JSON dump of every backend's counters, exposed only in the
/// `development` environment (§6).
async fn metrics(State(app): State<Arc<ProxyApp>>) -> impl IntoResponse {
    if app.config.environment != Environment::Development {
        return StatusCode::NOT_FOUND.into_response();
    }

    let snapshot = app.registry.metrics_snapshot();
    let mut payload = serde_json::Map::new();
    for backend in app.registry.all() {
        let health = app.registry.health_of(&backend.url).unwrap_or_default();
        let m = snapshot.get(&backend.url).copied().unwrap_or_default();
        let error_rate = if m.requests > 0 {
            m.errors as f64 / m.requests as f64
        } else {
            0.0
        };
        let avg_response_time = if m.requests > 0 {
            m.total_time_ms as f64 / m.requests as f64
        } else {
            0.0
        };
        payload.insert(
            backend.url.clone(),
            json!({
                "requests": m.requests,
                "errors": m.errors,
                "errorRate": error_rate,
                "avgResponseTime": avg_response_time,
                "isHealthy": health.is_healthy,
                "consecutiveFailures": health.consecutive_failures,
            }),
        );
    }

    axum::Json(serde_json::Value::Object(payload)).into_response()
}

async fn dispatch_handler(
    State(app): State<Arc<ProxyApp>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    app.dispatcher.dispatch(req, addr.ip().to_string()).await
}

/// Adds the `X-Proxy-By` header the external-interface contract names,
/// applied after CORS decoration to every response (§6).
async fn proxy_by_header(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("x-proxy-by", HeaderValue::from_static("Cloudflare-Workers"));
    response
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::PATCH,
        ])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("accept"),
            HeaderName::from_static("origin"),
        ])
        .max_age(std::time::Duration::from_secs(86400))
}

/// Builds the full HTTP surface from §6: the special paths ahead of the
/// catch-all Dispatcher route, CORS decoration, and the `X-Proxy-By` header.
pub fn build_router(app: Arc<ProxyApp>) -> Router {
    Router::new()
        .route("/favicon.ico", get(favicon))
        .route("/metrics", get(metrics))
        .fallback(dispatch_handler)
        .layer(middleware::from_fn(proxy_by_header))
        .layer(cors_layer())
        .with_state(app)
}
