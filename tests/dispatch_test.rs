use std::net::SocketAddr;

use axum::body::Body;
use axum::Router;
use georoute_proxy::config::{BackendConfig, Config, Environment};
use georoute_proxy::ProxyApp;

async fn mock_upstream(status: u16, body: &'static str, content_type: &'static str) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let status_code = axum::http::StatusCode::from_u16(status).unwrap();
    tokio::spawn(async move {
        let app = Router::new().fallback(move || async move {
            (
                status_code,
                [(axum::http::header::CONTENT_TYPE, content_type)],
                body,
            )
        });
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn base_config(backends: Vec<BackendConfig>) -> Config {
    Config {
        port: 0,
        environment: Environment::Production,
        backends,
        retry_attempts: 0,
        enable_caching: true,
        cache_max_age: 300,
        health_check_interval_ms: 30_000,
        circuit_breaker_threshold: 2,
    }
}

fn get_request(path: &str) -> hyper::Request<Body> {
    hyper::Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn geographic_routing_prefers_matching_region() {
    let asia = mock_upstream(200, "asia", "text/plain").await;
    let us = mock_upstream(200, "us", "text/plain").await;
    let config = base_config(vec![
        BackendConfig {
            url: format!("http://{asia}"),
            region: "asia-east".into(),
            weight: 1,
        },
        BackendConfig {
            url: format!("http://{us}"),
            region: "us-west".into(),
            weight: 1,
        },
    ]);
    let app = ProxyApp::build(config);

    let mut req = get_request("/x");
    req.headers_mut()
        .insert("cf-ipcountry", "JP".parse().unwrap());
    let resp = app.dispatcher.dispatch(req, "1.1.1.1".into()).await;
    assert_eq!(resp.headers().get("x-backend-region").unwrap(), "asia-east");
}

#[tokio::test]
async fn failover_on_server_error_tries_the_next_backend() {
    let good_addr = mock_upstream(200, "fine", "text/plain").await;
    let good_url = format!("http://{good_addr}");
    let mut backends = vec![BackendConfig {
        url: good_url.clone(),
        region: "us-west".into(),
        weight: 1,
    }];
    let mut bad_urls = Vec::new();
    for _ in 0..3 {
        let bad_addr = mock_upstream(500, "broken", "text/plain").await;
        let bad_url = format!("http://{bad_addr}");
        backends.push(BackendConfig {
            url: bad_url.clone(),
            region: "us-west".into(),
            weight: 1,
        });
        bad_urls.push(bad_url);
    }
    let config = base_config(backends);
    let app = ProxyApp::build(config);
    // Bias performance weighting heavily against the three failing backends
    // so the selector overwhelmingly favors `good` on every draw, while the
    // failover loop (3 attempts for 4 healthy backends) still has enough
    // tries to reach it even on an unlucky draw.
    for bad_url in &bad_urls {
        app.registry.record_outcome(bad_url, 10_000, false);
    }

    let resp = app
        .dispatcher
        .dispatch(get_request("/x"), "1.1.1.1".into())
        .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("x-backend-url").unwrap(),
        good_url.as_str()
    );
}

#[tokio::test]
async fn client_error_passes_through_without_failover() {
    let notfound = mock_upstream(404, "nope", "text/plain").await;
    let config = base_config(vec![BackendConfig {
        url: format!("http://{notfound}"),
        region: "us-west".into(),
        weight: 1,
    }]);
    let app = ProxyApp::build(config);

    let resp = app
        .dispatcher
        .dispatch(get_request("/x"), "1.1.1.1".into())
        .await;
    assert_eq!(resp.status(), 404);
    let snap = app.registry.metrics_snapshot();
    let m = snap.values().next().unwrap();
    assert_eq!(m.requests, 1);
    assert_eq!(m.errors, 1);
}

#[tokio::test]
async fn no_healthy_backends_returns_service_unavailable() {
    let up = mock_upstream(200, "fine", "text/plain").await;
    let config = base_config(vec![BackendConfig {
        url: format!("http://{up}"),
        region: "us-west".into(),
        weight: 1,
    }]);
    let app = ProxyApp::build(config);
    app.registry.mark_failure(&format!("http://{up}"));
    app.registry.mark_failure(&format!("http://{up}"));

    let resp = app
        .dispatcher
        .dispatch(get_request("/x"), "1.1.1.1".into())
        .await;
    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn cache_hit_avoids_a_second_upstream_call() {
    let up = mock_upstream(200, "{\"ok\":true}", "application/json").await;
    let config = base_config(vec![BackendConfig {
        url: format!("http://{up}"),
        region: "us-west".into(),
        weight: 1,
    }]);
    let app = ProxyApp::build(config);

    let first = app
        .dispatcher
        .dispatch(get_request("/cacheme"), "1.1.1.1".into())
        .await;
    assert_eq!(first.status(), 200);
    let snap = app.registry.metrics_snapshot();
    assert_eq!(snap.values().next().unwrap().requests, 1);

    let second = app
        .dispatcher
        .dispatch(get_request("/cacheme"), "1.1.1.1".into())
        .await;
    assert_eq!(second.status(), 200);
    // A cache hit never calls the Registry, so requests stays at 1.
    let snap = app.registry.metrics_snapshot();
    assert_eq!(snap.values().next().unwrap().requests, 1);
}

#[tokio::test]
async fn oversize_request_is_rejected_before_contacting_upstream() {
    let up = mock_upstream(200, "fine", "text/plain").await;
    let config = base_config(vec![BackendConfig {
        url: format!("http://{up}"),
        region: "us-west".into(),
        weight: 1,
    }]);
    let app = ProxyApp::build(config);

    let mut req = hyper::Request::builder()
        .method("POST")
        .uri("/upload")
        .body(Body::empty())
        .unwrap();
    req.headers_mut()
        .insert("content-length", "20971520".parse().unwrap());

    let resp = app.dispatcher.dispatch(req, "1.1.1.1".into()).await;
    assert_eq!(resp.status(), 413);
    let snap = app.registry.metrics_snapshot();
    assert_eq!(snap.values().next().unwrap().requests, 0);
}
