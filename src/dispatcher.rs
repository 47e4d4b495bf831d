use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Response, StatusCode};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{cached_at_header, is_cacheable, CachedResponse, ResponseCache};
use crate::error::{error_body, DispatchError};
use crate::forwarder::{ForwardRequest, Forwarder, ForwarderError};
use crate::health::HealthTracker;
use crate::registry::Registry;
use crate::region::UNKNOWN_COUNTRY;
use crate::selector::{self, RequestContext};

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub struct Dispatcher {
    registry: Arc<Registry>,
    health_tracker: Arc<HealthTracker>,
    forwarder: Forwarder,
    cache: Option<ResponseCache>,
    enable_caching: bool,
    cache_max_age_secs: u64,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        health_tracker: Arc<HealthTracker>,
        forwarder: Forwarder,
        enable_caching: bool,
        cache_max_age_secs: u64,
    ) -> Self {
        let cache = enable_caching
            .then(|| ResponseCache::new(Duration::from_secs(cache_max_age_secs)));
        Self {
            registry,
            health_tracker,
            forwarder,
            cache,
            enable_caching,
            cache_max_age_secs,
        }
    }

    pub async fn dispatch(&self, req: hyper::Request<Body>, client_ip: String) -> Response<Body> {
        let request_id = short_request_id();
        let (parts, body) = req.into_parts();
        let method = parts.method.clone();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        if let Some(len) = content_length(&parts.headers) {
            if len > MAX_BODY_BYTES {
                warn!(request_id, path = %path_and_query, len, "rejecting oversize request");
                return error_response(&DispatchError::Oversize);
            }
        }

        let ctx = build_request_context(&method, &path_and_query, &client_ip, &parts.headers);

        let cache_key = ResponseCache::key("GET", &path_and_query);
        if self.enable_caching && method == hyper::Method::GET {
            if let Some(cache) = &self.cache {
                if let Some(hit) = cache.get(&cache_key).await {
                    info!(request_id, path = %path_and_query, "cache hit");
                    return cached_response(hit);
                }
            }
        }

        let body_bytes = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(_) => {
                warn!(request_id, path = %path_and_query, "rejecting oversize request body");
                return error_response(&DispatchError::Oversize);
            }
        };

        let healthy = self.health_tracker.healthy_backends();
        if healthy.is_empty() {
            warn!(request_id, "no healthy backends available");
            return error_response(&DispatchError::NoHealthyBackends);
        }

        let fwd_req = ForwardRequest {
            method: method.clone(),
            path_and_query: path_and_query.clone(),
            headers: parts.headers.clone(),
            body: body_bytes,
            client_ip: ctx.client_ip.clone(),
            scheme: parts
                .uri
                .scheme_str()
                .unwrap_or("http")
                .to_string(),
            host: parts
                .headers
                .get(hyper::header::HOST)
                .and_then(|h| h.to_str().ok())
                .unwrap_or("")
                .to_string(),
        };

        let mut rng = StdRng::from_entropy();
        let max_attempts = healthy.len().min(3);
        let mut last_error: Option<ForwarderError> = None;

        for attempt in 0..max_attempts {
            let metrics_snapshot = self.registry.metrics_snapshot();
            let selected = selector::select(&healthy, &ctx, Some(&metrics_snapshot), &mut rng).clone();

            let start = Instant::now();
            let result = self.forwarder.forward(&selected, &fwd_req).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match result {
                Err(err) => {
                    self.registry.mark_failure(&selected.url);
                    warn!(request_id, backend = %selected.url, attempt, error = %err, "upstream attempt failed");
                    last_error = Some(err);
                    continue;
                }
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() >= 500 {
                        self.registry.mark_failure(&selected.url);
                        warn!(request_id, backend = %selected.url, attempt, status = status.as_u16(), "upstream returned server error");
                        last_error = None;
                        continue;
                    }

                    self.registry.mark_healthy(&selected.url);
                    let success = status.is_success();
                    self.registry
                        .record_outcome(&selected.url, elapsed_ms, success);
                    info!(request_id, backend = %selected.url, status = status.as_u16(), elapsed_ms, "dispatched");

                    return self
                        .finish_response(response, &selected, &method, &path_and_query, &cache_key)
                        .await;
                }
            }
        }

        warn!(request_id, path = %path_and_query, "failover attempts exhausted");
        match last_error {
            Some(err) => error_response(&DispatchError::from_last_forwarder_error(&err)),
            None => error_response(&DispatchError::FailoverExhausted),
        }
    }

    async fn finish_response(
        &self,
        response: Response<hyper::body::Incoming>,
        backend: &crate::registry::Backend,
        method: &hyper::Method,
        path_and_query: &str,
        cache_key: &str,
    ) -> Response<Body> {
        let (mut parts, incoming) = response.into_parts();
        parts.headers.insert(
            "x-backend-url",
            hyper::header::HeaderValue::from_str(&backend.url).unwrap_or_else(|_| hyper::header::HeaderValue::from_static("")),
        );
        parts.headers.insert(
            "x-backend-region",
            hyper::header::HeaderValue::from_str(&backend.region).unwrap_or_else(|_| hyper::header::HeaderValue::from_static("")),
        );

        let content_type = parts
            .headers
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let cache_control = parts
            .headers
            .get(hyper::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let cacheable = is_cacheable(
            self.enable_caching,
            method.as_str(),
            parts.status.as_u16(),
            cache_control.as_deref(),
            content_type.as_deref(),
        );

        if cacheable {
            if let (Some(cache), Ok(collected)) =
                (&self.cache, incoming.collect().await)
            {
                let bytes: Bytes = collected.to_bytes();
                let mut headers: Vec<(String, String)> = parts
                    .headers
                    .iter()
                    .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
                    .collect();
                headers.push(("cache-control".to_string(), format!("max-age={}", self.cache_max_age_secs)));
                headers.push(("x-cached-at".to_string(), cached_at_header()));
                cache
                    .put(
                        cache_key.to_string(),
                        CachedResponse {
                            status: parts.status.as_u16(),
                            headers,
                            body: bytes.clone(),
                        },
                    )
                    .await;

                let mut builder = Response::builder().status(parts.status);
                for (name, value) in parts.headers.iter() {
                    builder = builder.header(name, value);
                }
                builder = builder.header("cache-control", format!("max-age={}", self.cache_max_age_secs));
                builder = builder.header("x-cached-at", cached_at_header());
                return builder.body(Body::from(bytes)).unwrap_or_else(|_| {
                    Response::new(Body::empty())
                });
            }
        }

        let _ = path_and_query;
        Response::from_parts(parts, Body::new(incoming))
    }
}

fn short_request_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
}

fn build_request_context(
    method: &hyper::Method,
    path_and_query: &str,
    client_ip: &str,
    headers: &HeaderMap,
) -> RequestContext {
    let country = headers
        .get("cf-ipcountry")
        .and_then(|v| v.to_str().ok())
        .filter(|c| !c.is_empty())
        .unwrap_or(UNKNOWN_COUNTRY)
        .to_string();
    let user_agent = headers
        .get(hyper::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    RequestContext {
        method: method.to_string(),
        path_and_query: path_and_query.to_string(),
        client_ip: client_ip.to_string(),
        country,
        user_agent,
    }
}

fn cached_response(cached: CachedResponse) -> Response<Body> {
    let mut builder = Response::builder().status(
        StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK),
    );
    for (name, value) in &cached.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(cached.body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn error_response(err: &DispatchError) -> Response<Body> {
    let (status, body) = error_body(err);
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
