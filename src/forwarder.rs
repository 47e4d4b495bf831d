use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, Request, Response, Uri};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::time::{sleep, timeout, Duration};
use tracing::debug;

use crate::registry::Backend;

pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

pub fn build_upstream_client() -> UpstreamClient {
    Client::builder(TokioExecutor::new()).build(HttpsConnector::new())
}

const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers the edge injects that must never be forwarded upstream.
const STRIPPED_HEADERS: &[&str] = ["cf-connecting-ip", "cf-ray", "cf-visitor", "cf-ipcountry"].as_slice();

/// Network-class failure: anything that prevented a complete HTTP response
/// from coming back. The Forwarder retries these internally; the Dispatcher
/// fails over on them across backends.
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("upstream request timed out")]
    Timeout,
    #[error("client disconnected before upstream responded")]
    Aborted,
    #[error("upstream connection failed: {0}")]
    Connect(String),
}

/// One client request, already parsed into the pieces the Forwarder needs to
/// build an upstream request. The body is pre-buffered by the Dispatcher
/// (bounded by the 10 MiB oversize check) so a single `ForwardRequest` can be
/// retried against multiple backends without re-reading a stream.
#[derive(Clone)]
pub struct ForwardRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: String,
    pub scheme: String,
    pub host: String,
}

pub struct Forwarder {
    client: UpstreamClient,
    retry_attempts: u32,
}

impl Forwarder {
    pub fn new(client: UpstreamClient, retry_attempts: u32) -> Self {
        Self {
            client,
            retry_attempts,
        }
    }

    fn build_upstream_request(
        &self,
        backend: &Backend,
        req: &ForwardRequest,
    ) -> Result<Request<Full<Bytes>>, ForwarderError> {
        let uri_string = format!(
            "{}{}",
            backend.url.trim_end_matches('/'),
            req.path_and_query
        );
        let uri: Uri = uri_string
            .parse()
            .map_err(|e| ForwarderError::Connect(format!("invalid upstream uri: {e}")))?;

        let mut builder = Request::builder().method(req.method.clone()).uri(uri);
        let out_headers = builder.headers_mut().expect("request builder has headers");
        copy_and_rewrite_headers(&req.headers, out_headers, req);

        let has_body = !matches!(req.method, Method::GET | Method::HEAD);
        let body = if has_body {
            Full::new(req.body.clone())
        } else {
            Full::new(Bytes::new())
        };

        builder
            .body(body)
            .map_err(|e| ForwarderError::Connect(format!("failed to build request: {e}")))
    }

    /// Executes one logical forward, retrying internally on network-class
    /// errors only, up to `retry_attempts` times, sleeping 2^attempt seconds
    /// between attempts (1s, 2s, 4s, ...). Any received HTTP response --
    /// including 5xx -- is returned immediately; cross-backend failover is
    /// the Dispatcher's job.
    pub async fn forward(
        &self,
        backend: &Backend,
        req: &ForwardRequest,
    ) -> Result<Response<hyper::body::Incoming>, ForwarderError> {
        let mut attempt = 0;
        loop {
            let upstream_req = self.build_upstream_request(backend, req)?;
            let result = timeout(FORWARD_TIMEOUT, self.client.request(upstream_req)).await;

            match result {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => {
                    let err = ForwarderError::Connect(e.to_string());
                    if attempt >= self.retry_attempts {
                        return Err(err);
                    }
                    debug!(backend = %backend.url, attempt, error = %err, "retrying after network error");
                }
                Err(_) => {
                    if attempt >= self.retry_attempts {
                        return Err(ForwarderError::Timeout);
                    }
                    debug!(backend = %backend.url, attempt, "retrying after timeout");
                }
            }

            sleep(backoff_delay(attempt)).await;
            attempt += 1;
        }
    }
}

/// `2^attempt` seconds: 1s, 2s, 4s, ... Exposed standalone so the backoff
/// schedule can be unit-tested without actually sleeping.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt)
}

fn copy_and_rewrite_headers(src: &HeaderMap, dst: &mut HeaderMap, req: &ForwardRequest) {
    for (name, value) in src.iter() {
        if STRIPPED_HEADERS
            .iter()
            .any(|h| name.as_str().eq_ignore_ascii_case(h))
        {
            continue;
        }
        dst.append(name.clone(), value.clone());
    }

    let client_ip = HeaderValue::from_str(&req.client_ip).unwrap_or_else(|_| HeaderValue::from_static("unknown"));
    dst.insert(
        HeaderName::from_static("x-forwarded-for"),
        client_ip.clone(),
    );
    dst.insert(HeaderName::from_static("x-real-ip"), client_ip);
    if let Ok(proto) = HeaderValue::from_str(&req.scheme) {
        dst.insert(HeaderName::from_static("x-forwarded-proto"), proto);
    }
    if let Ok(host) = HeaderValue::from_str(&req.host) {
        dst.insert(HeaderName::from_static("x-forwarded-host"), host);
    }
}
