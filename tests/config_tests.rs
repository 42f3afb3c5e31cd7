//! Tests for configuration resolution.

use gocker::constants::{
    AUTH_SERVICE_ENV, AUTH_URL_ENV, BASE_DIR_ENV, DEFAULT_BASE_DIR, DEFAULT_CPU_SHARES,
    DEFAULT_PULL_CONCURRENCY, REGISTRY_URL_ENV,
};
use gocker::{Config, RegistryConfig};
use std::collections::HashMap;
use std::path::PathBuf;

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.base_dir, PathBuf::from(DEFAULT_BASE_DIR));
    assert_eq!(config.registry.registry_url, "https://registry-1.docker.io/v2");
    assert_eq!(config.registry.auth_url, "https://auth.docker.io/token");
    assert_eq!(config.registry.auth_service, "registry.docker.io");
    assert_eq!(config.pull_concurrency, DEFAULT_PULL_CONCURRENCY);
    assert_eq!(config.cpu_shares, DEFAULT_CPU_SHARES);
}

#[test]
fn test_lookup_without_overrides_is_default() {
    assert_eq!(Config::from_lookup(|_| None), Config::default());
}

#[test]
fn test_lookup_overrides() {
    let env: HashMap<&str, &str> = [
        (BASE_DIR_ENV, "/var/lib/gocker"),
        (REGISTRY_URL_ENV, "http://127.0.0.1:5000/v2"),
        (AUTH_URL_ENV, "http://127.0.0.1:5000/token"),
        (AUTH_SERVICE_ENV, "local"),
    ]
    .into_iter()
    .collect();

    let config = Config::from_lookup(|key| env.get(key).map(|v| v.to_string()));

    assert_eq!(config.base_dir, PathBuf::from("/var/lib/gocker"));
    assert_eq!(
        config.registry,
        RegistryConfig {
            registry_url: "http://127.0.0.1:5000/v2".to_string(),
            auth_url: "http://127.0.0.1:5000/token".to_string(),
            auth_service: "local".to_string(),
        }
    );
}

#[test]
fn test_builders() {
    let config = Config::default()
        .with_base_dir("/tmp/images")
        .with_pull_concurrency(8)
        .with_cpu_shares(512)
        .with_cgroup_root("/tmp/cgroup");

    assert_eq!(config.base_dir, PathBuf::from("/tmp/images"));
    assert_eq!(config.pull_concurrency, 8);
    assert_eq!(config.cpu_shares, 512);
    assert_eq!(config.cgroup_root, PathBuf::from("/tmp/cgroup"));
}
