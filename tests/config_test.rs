use std::io::Write;

use georoute_proxy::config::load_config;
use tempfile::NamedTempFile;

fn write_toml(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn round_trips_a_valid_config() {
    let file = write_toml(
        r#"
        port = 9000
        environment = "development"

        [[backends]]
        url = "http://a.internal"
        region = "us-west"
        weight = 2

        [[backends]]
        url = "http://b.internal"
        region = "asia-east"
        weight = 1
        "#,
    );
    let config = load_config(file.path()).expect("valid config should load");
    assert_eq!(config.port, 9000);
    assert_eq!(config.backends.len(), 2);
    assert_eq!(config.backends[0].weight, 2);
}

#[test]
fn applies_documented_defaults() {
    let file = write_toml(
        r#"
        [[backends]]
        url = "http://a.internal"
        weight = 1
        "#,
    );
    let config = load_config(file.path()).expect("valid config should load");
    assert_eq!(config.port, 8080);
    assert_eq!(config.retry_attempts, 2);
    assert!(config.enable_caching);
    assert_eq!(config.cache_max_age, 300);
    assert_eq!(config.health_check_interval_ms, 30_000);
    assert_eq!(config.circuit_breaker_threshold, 5);
}

#[test]
fn rejects_a_missing_file() {
    let err = load_config("/nonexistent/path/does-not-exist.toml").unwrap_err();
    assert!(err.to_string().contains("reading config file"));
}

#[test]
fn rejects_malformed_toml() {
    let file = write_toml("this is not valid toml {{{");
    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("parsing TOML"));
}

#[test]
fn rejects_an_empty_backend_list() {
    let file = write_toml("backends = []\n");
    let err = load_config(file.path()).unwrap_err();
    assert!(format!("{err:?}").contains("at least one backend"));
}

#[test]
fn rejects_a_zero_weight_backend() {
    let file = write_toml(
        r#"
        [[backends]]
        url = "http://a.internal"
        weight = 0
        "#,
    );
    let err = load_config(file.path()).unwrap_err();
    assert!(format!("{err:?}").contains("weight 0"));
}

#[test]
fn rejects_a_duplicate_backend_url() {
    let file = write_toml(
        r#"
        [[backends]]
        url = "http://a.internal"
        weight = 1

        [[backends]]
        url = "http://a.internal"
        weight = 1
        "#,
    );
    let err = load_config(file.path()).unwrap_err();
    assert!(format!("{err:?}").contains("duplicate backend url"));
}
