pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod forwarder;
pub mod health;
pub mod http;
pub mod region;
pub mod registry;
pub mod selector;

use std::sync::Arc;

use config::Config;
use dispatcher::Dispatcher;
use health::HealthTracker;
use registry::{Backend, Registry};

/// Everything a running proxy needs, built once from a validated `Config`.
pub struct ProxyApp {
    pub dispatcher: Arc<Dispatcher>,
    pub health_tracker: Arc<HealthTracker>,
    pub registry: Arc<Registry>,
    pub config: Config,
}

impl ProxyApp {
    pub fn build(config: Config) -> Self {
        let backends: Vec<Backend> = config.backends.iter().map(Backend::from).collect();
        let registry = Arc::new(Registry::new(backends, config.circuit_breaker_threshold));
        let health_tracker = HealthTracker::new(
            Arc::clone(&registry),
            health::build_probe_client(),
            config.health_check_interval_ms,
        );
        let forwarder = forwarder::Forwarder::new(
            forwarder::build_upstream_client(),
            config.retry_attempts,
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&health_tracker),
            forwarder,
            config.enable_caching,
            config.cache_max_age,
        ));

        Self {
            dispatcher,
            health_tracker,
            registry,
            config,
        }
    }
}
