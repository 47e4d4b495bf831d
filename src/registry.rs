use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::BackendConfig;

/// An upstream origin, immutable after the configuration is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub url: String,
    pub region: String,
    pub weight: u32,
}

impl From<&BackendConfig> for Backend {
    fn from(cfg: &BackendConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            region: cfg.region.to_lowercase(),
            weight: cfg.weight,
        }
    }
}

/// Per-backend circuit-breaker state.
#[derive(Debug, Clone, Copy)]
pub struct Health {
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub last_check_ms: u64,
    pub avg_response_time: f64,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            is_healthy: true,
            consecutive_failures: 0,
            last_check_ms: 0,
            avg_response_time: 0.0,
        }
    }
}

/// Per-backend rolling request counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics {
    pub requests: u64,
    pub errors: u64,
    pub total_time_ms: u64,
}

struct BackendRecord {
    health: Health,
    metrics: Metrics,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

/// Owns the immutable backend list plus the mutable per-backend Health and
/// Metrics tables. The record map's key set is fixed at construction, so the
/// map itself needs no lock; only each entry's record is guarded, which is
/// what lets updates to distinct backends proceed without coordination.
pub struct Registry {
    backends: Vec<Backend>,
    records: HashMap<String, Mutex<BackendRecord>>,
    circuit_breaker_threshold: u32,
}

impl Registry {
    pub fn new(backends: Vec<Backend>, circuit_breaker_threshold: u32) -> Self {
        let records = backends
            .iter()
            .map(|b| {
                (
                    b.url.clone(),
                    Mutex::new(BackendRecord {
                        health: Health::default(),
                        metrics: Metrics::default(),
                    }),
                )
            })
            .collect();
        Self {
            backends,
            records,
            circuit_breaker_threshold,
        }
    }

    pub fn all(&self) -> &[Backend] {
        &self.backends
    }

    /// Backends whose current Health.is_healthy is true, in configured order.
    /// Does not itself trigger probes — see `health::HealthTracker`, which
    /// wraps this call with the stale-probe trigger the spec describes.
    pub fn healthy(&self) -> Vec<Backend> {
        self.backends
            .iter()
            .filter(|b| {
                self.records
                    .get(&b.url)
                    .map(|r| r.lock().unwrap().health.is_healthy)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn metrics_snapshot(&self) -> HashMap<String, Metrics> {
        self.records
            .iter()
            .map(|(url, rec)| (url.clone(), rec.lock().unwrap().metrics))
            .collect()
    }

    pub fn health_of(&self, url: &str) -> Option<Health> {
        self.records.get(url).map(|r| r.lock().unwrap().health)
    }

    pub fn last_check_ms(&self, url: &str) -> u64 {
        self.records
            .get(url)
            .map(|r| r.lock().unwrap().health.last_check_ms)
            .unwrap_or(0)
    }

    /// Increments requests/totalTime (and errors on failure), and updates the
    /// heavy EWMA `avgResponseTime = (old + d) / 2`. Reproduced verbatim per
    /// the spec's open question: the first observation yields d/2, not d.
    pub fn record_outcome(&self, url: &str, duration_ms: u64, success: bool) {
        let Some(rec) = self.records.get(url) else {
            return;
        };
        let mut rec = rec.lock().unwrap();
        rec.metrics.requests += 1;
        rec.metrics.total_time_ms += duration_ms;
        if !success {
            rec.metrics.errors += 1;
        }
        rec.health.avg_response_time = (rec.health.avg_response_time + duration_ms as f64) / 2.0;
    }

    pub fn mark_healthy(&self, url: &str) {
        let Some(rec) = self.records.get(url) else {
            return;
        };
        let mut rec = rec.lock().unwrap();
        rec.health.consecutive_failures = 0;
        rec.health.is_healthy = true;
    }

    pub fn mark_failure(&self, url: &str) {
        let Some(rec) = self.records.get(url) else {
            return;
        };
        let mut rec = rec.lock().unwrap();
        rec.health.consecutive_failures += 1;
        rec.health.is_healthy = rec.health.consecutive_failures < self.circuit_breaker_threshold;
    }

    /// Applies the outcome of an active probe: success resets the counter and
    /// marks healthy; failure bumps it and re-derives health from the
    /// threshold, same as `mark_failure`. Both branches stamp `last_check_ms`.
    pub fn apply_probe_result(&self, url: &str, success: bool) {
        let Some(rec) = self.records.get(url) else {
            return;
        };
        let mut rec = rec.lock().unwrap();
        if success {
            rec.health.consecutive_failures = 0;
            rec.health.is_healthy = true;
        } else {
            rec.health.consecutive_failures += 1;
            rec.health.is_healthy =
                rec.health.consecutive_failures < self.circuit_breaker_threshold;
        }
        rec.health.last_check_ms = now_ms();
    }
}
