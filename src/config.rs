//! # Engine Configuration
//!
//! A [`Config`] value is resolved once and threaded into every component at
//! construction. Library code never reads the process environment; callers
//! supply a lookup function to [`Config::from_lookup`], and only the binary
//! passes the real environment.
//!
//! ## Overrides
//!
//! | Variable               | Field                    | Default                              |
//! |------------------------|--------------------------|--------------------------------------|
//! | `GOCKER_BASE_DIR`      | `base_dir`               | `gocker-images`                      |
//! | `GOCKER_REGISTRY_URL`  | `registry.registry_url`  | `https://registry-1.docker.io/v2`    |
//! | `GOCKER_AUTH_URL`      | `registry.auth_url`      | `https://auth.docker.io/token`       |
//! | `GOCKER_AUTH_SERVICE`  | `registry.auth_service`  | `registry.docker.io`                 |
//!
//! Empty values are treated as unset.

use crate::constants::{
    AUTH_SERVICE_ENV, AUTH_URL_ENV, BASE_DIR_ENV, DEFAULT_AUTH_SERVICE, DEFAULT_AUTH_URL,
    DEFAULT_BASE_DIR, DEFAULT_CGROUP_ROOT, DEFAULT_CPU_SHARES, DEFAULT_PULL_CONCURRENCY,
    DEFAULT_REGISTRY_URL, REGISTRY_URL_ENV,
};
use std::path::PathBuf;

/// Registry endpoints used by [`RegistryClient`](crate::registry::RegistryClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Registry API base including the `/v2` segment.
    pub registry_url: String,
    /// Token issuer URL.
    pub auth_url: String,
    /// `service` parameter sent to the token issuer.
    pub auth_service: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            auth_service: DEFAULT_AUTH_SERVICE.to_string(),
        }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root of the image store.
    pub base_dir: PathBuf,
    /// Registry endpoints.
    pub registry: RegistryConfig,
    /// Maximum number of layer blobs fetched at once.
    pub pull_concurrency: usize,
    /// Default CPU shares for launched containers.
    pub cpu_shares: u64,
    /// Mount point of the cgroup filesystem.
    pub cgroup_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            registry: RegistryConfig::default(),
            pull_concurrency: DEFAULT_PULL_CONCURRENCY,
            cpu_shares: DEFAULT_CPU_SHARES,
            cgroup_root: PathBuf::from(DEFAULT_CGROUP_ROOT),
        }
    }
}

impl Config {
    /// Resolves a configuration from defaults plus `GOCKER_*` overrides
    /// returned by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::default();
        if let Some(dir) = get(BASE_DIR_ENV) {
            config.base_dir = PathBuf::from(dir);
        }
        if let Some(url) = get(REGISTRY_URL_ENV) {
            config.registry.registry_url = url;
        }
        if let Some(url) = get(AUTH_URL_ENV) {
            config.registry.auth_url = url;
        }
        if let Some(service) = get(AUTH_SERVICE_ENV) {
            config.registry.auth_service = service;
        }
        config
    }

    /// Resolves a configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Sets the image store root.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Sets the registry endpoints.
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the layer fetch concurrency (clamped to at least 1).
    pub fn with_pull_concurrency(mut self, concurrency: usize) -> Self {
        self.pull_concurrency = concurrency.max(1);
        self
    }

    /// Sets the default CPU shares.
    pub fn with_cpu_shares(mut self, shares: u64) -> Self {
        self.cpu_shares = shares;
        self
    }

    /// Sets the cgroup filesystem mount point.
    pub fn with_cgroup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cgroup_root = root.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_override_is_ignored() {
        let config = Config::from_lookup(|key| (key == BASE_DIR_ENV).then(|| "  ".to_string()));
        assert_eq!(config.base_dir, PathBuf::from(DEFAULT_BASE_DIR));
    }

    #[test]
    fn test_concurrency_clamped() {
        assert_eq!(Config::default().with_pull_concurrency(0).pull_concurrency, 1);
    }
}
