use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

fn default_retry_attempts() -> u32 {
    2
}

fn default_enable_caching() -> bool {
    true
}

fn default_cache_max_age() -> u64 {
    300
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

/// A single configured upstream, as it appears in the TOML backend list.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    #[serde(default)]
    pub region: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub environment: Environment,
    pub backends: Vec<BackendConfig>,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_enable_caching")]
    pub enable_caching: bool,
    #[serde(default = "default_cache_max_age")]
    pub cache_max_age: u64,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            bail!("at least one backend must be configured");
        }

        let mut seen_urls = HashSet::new();
        for backend in &self.backends {
            if backend.url.is_empty() {
                bail!("backend has an empty url");
            }
            if backend.weight == 0 {
                bail!(
                    "backend '{}' has weight 0; weights must be positive",
                    backend.url
                );
            }
            if !seen_urls.insert(backend.url.as_str()) {
                bail!("duplicate backend url: {}", backend.url);
            }
        }

        if self.circuit_breaker_threshold == 0 {
            bail!("circuit_breaker_threshold must be at least 1");
        }

        if self.cache_max_age == 0 {
            bail!("cache_max_age must be greater than 0");
        }

        Ok(())
    }
}

/// Reads, parses, and validates the proxy configuration from a TOML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing TOML in {}", path.display()))?;
    config
        .validate()
        .with_context(|| "validating backend list")?;
    Ok(config)
}
