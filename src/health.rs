use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http_body_util::Empty;
use hyper::Request;
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

use crate::registry::{now_ms, Registry};

pub type ProbeClient = Client<HttpsConnector<HttpConnector>, Empty<hyper::body::Bytes>>;

pub fn build_probe_client() -> ProbeClient {
    Client::builder(TokioExecutor::new()).build(HttpsConnector::new())
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wraps the Registry with active-probe scheduling: the opportunistic trigger
/// `HealthyBackends()` performs (§4.1) and the background sweep that keeps
/// probing `Unhealthy` backends so they can recover (§4.3).
pub struct HealthTracker {
    registry: Arc<Registry>,
    client: ProbeClient,
    health_check_interval_ms: u64,
    probe_in_flight: HashMap<String, AtomicBool>,
}

impl HealthTracker {
    pub fn new(
        registry: Arc<Registry>,
        client: ProbeClient,
        health_check_interval_ms: u64,
    ) -> Arc<Self> {
        let probe_in_flight = registry
            .all()
            .iter()
            .map(|b| (b.url.clone(), AtomicBool::new(false)))
            .collect();
        Arc::new(Self {
            registry,
            client,
            health_check_interval_ms,
            probe_in_flight,
        })
    }

    /// Registry.HealthyBackends(): trigger refresh probes for any backend
    /// whose last check is stale, then return the current healthy set.
    pub fn healthy_backends(self: &Arc<Self>) -> Vec<crate::registry::Backend> {
        let now = now_ms();
        for backend in self.registry.all() {
            let last_check = self.registry.last_check_ms(&backend.url);
            if last_check == 0 || now.saturating_sub(last_check) > self.health_check_interval_ms {
                self.trigger_probe(backend.url.clone());
            }
        }
        self.registry.healthy()
    }

    /// Single-flight: if a probe for this backend is already in flight, this
    /// call is a no-op; otherwise it spawns one.
    fn trigger_probe(self: &Arc<Self>, url: String) {
        let Some(gate) = self.probe_in_flight.get(&url) else {
            return;
        };
        if gate
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tracker.probe(&url).await;
            if let Some(gate) = tracker.probe_in_flight.get(&url) {
                gate.store(false, Ordering::Release);
            }
        });
    }

    async fn probe(&self, url: &str) {
        let target = format!("{}/health", url.trim_end_matches('/'));
        let result = self.send_probe(&target).await;
        let success = result.is_ok();
        if let Err(e) = &result {
            debug!(backend = url, error = %e, "health probe failed");
        }

        let was_healthy = self
            .registry
            .health_of(url)
            .map(|h| h.is_healthy)
            .unwrap_or(true);
        self.registry.apply_probe_result(url, success);
        let is_healthy = self
            .registry
            .health_of(url)
            .map(|h| h.is_healthy)
            .unwrap_or(success);

        if was_healthy && !is_healthy {
            warn!(backend = url, "backend marked unhealthy");
        } else if !was_healthy && is_healthy {
            info!(backend = url, "backend recovered, marked healthy");
        }
    }

    async fn send_probe(&self, target: &str) -> Result<(), String> {
        let uri: hyper::Uri = target
            .parse()
            .map_err(|e| format!("invalid probe uri: {e}"))?;
        let req = Request::builder()
            .method("HEAD")
            .uri(uri)
            .body(Empty::new())
            .map_err(|e| format!("failed to build probe request: {e}"))?;

        match timeout(PROBE_TIMEOUT, self.client.request(req)).await {
            Ok(Ok(resp)) if resp.status().is_success() => Ok(()),
            Ok(Ok(resp)) => Err(format!("probe returned status {}", resp.status())),
            Ok(Err(e)) => Err(format!("probe request failed: {e}")),
            Err(_) => Err("probe timed out after 5s".to_string()),
        }
    }

    /// Background sweep: probes every configured backend once per interval so
    /// `Unhealthy` backends keep getting probed even while excluded from
    /// selection (there is no other re-admission path).
    pub fn spawn_background_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_millis(self.health_check_interval_ms);
        tokio::spawn(async move {
            loop {
                for backend in self.registry.all() {
                    self.trigger_probe(backend.url.clone());
                }
                sleep(interval).await;
            }
        })
    }
}
