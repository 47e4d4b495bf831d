use std::collections::HashMap;

use rand::Rng;

use crate::region;
use crate::registry::{Backend, Metrics};

/// Everything the selector needs about the inbound request. Built once per
/// dispatch by the caller; the selector itself never touches the network.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub path_and_query: String,
    pub client_ip: String,
    pub country: String,
    pub user_agent: String,
}

const NEW_BACKEND_SCORE: f64 = 50.0;

fn score(metrics: Option<&Metrics>) -> f64 {
    match metrics {
        None => NEW_BACKEND_SCORE,
        Some(m) if m.requests == 0 => NEW_BACKEND_SCORE,
        Some(m) => {
            let error_rate = m.errors as f64 / m.requests as f64;
            let avg_time = m.total_time_ms as f64 / m.requests as f64;
            (error_rate * 100.0 * 0.7) + (avg_time / 100.0).min(50.0) * 0.3
        }
    }
}

fn narrow_by_region<'a>(candidates: &'a [Backend], ctx: &RequestContext) -> Vec<&'a Backend> {
    let Some(preferred) = region::preferred_region(&ctx.country) else {
        return candidates.iter().collect();
    };

    let exact: Vec<&Backend> = candidates
        .iter()
        .filter(|b| b.region.eq_ignore_ascii_case(preferred))
        .collect();
    if !exact.is_empty() {
        return exact;
    }

    let parts: Vec<&str> = preferred.split('-').collect();
    let partial: Vec<&Backend> = candidates
        .iter()
        .filter(|b| parts.iter().any(|p| b.region.contains(p)))
        .collect();
    if !partial.is_empty() {
        return partial;
    }

    candidates.iter().collect()
}

/// Pure function: (candidates, request context, optional metrics snapshot) ->
/// a chosen backend. Never mutates Registry state and never sleeps, so it can
/// be property-tested directly with a seeded RNG.
pub fn select<'a>(
    candidates: &'a [Backend],
    ctx: &RequestContext,
    metrics: Option<&HashMap<String, Metrics>>,
    rng: &mut impl Rng,
) -> &'a Backend {
    assert!(!candidates.is_empty(), "select called with no candidates");

    if candidates.len() == 1 {
        return &candidates[0];
    }

    let narrowed = narrow_by_region(candidates, ctx);

    let weights: Vec<u32> = match metrics.filter(|m| !m.is_empty()) {
        None => narrowed.iter().map(|_| 1).collect(),
        Some(metrics) => {
            let scores: Vec<f64> = narrowed
                .iter()
                .map(|b| score(metrics.get(&b.url)))
                .collect();
            let max_score = scores.iter().cloned().fold(f64::MIN, f64::max) + 1.0;
            scores
                .iter()
                .map(|s| (max_score - s).floor().max(1.0) as u32)
                .collect()
        }
    };

    let total: u32 = weights.iter().sum();
    if total == 0 {
        return narrowed[0];
    }

    let mut r = rng.gen_range(0..total);
    for (backend, weight) in narrowed.iter().zip(weights.iter()) {
        if r < *weight {
            return backend;
        }
        r -= *weight;
    }

    // Unreachable given the invariant total == sum(weights), kept as a
    // defensive fallback mirroring the spec's "if sum==0 return first".
    narrowed[0]
}
