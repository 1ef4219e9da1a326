//! Inspector configuration
//!
//! Loaded from environment variables with defaults.

use crate::error::{InspectorError, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Where service-account credentials are mounted inside a pod
pub const DEFAULT_SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Runtime settings for the inspector core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectorConfig {
    /// Backing kubeconfig document
    pub kubeconfig_path: PathBuf,
    /// Directory probed for `token` and `ca.crt` to detect in-cluster mode
    pub service_account_dir: PathBuf,
    /// How long an aggregated managed-resource list stays fresh
    pub managed_cache_ttl: Duration,
    /// Wall-clock bound for connectivity probes
    pub probe_timeout: Duration,
    /// Full re-fetch period for live watches
    pub watch_resync: Duration,
    /// Upper bound on concurrent per-type list calls during aggregation
    pub max_concurrent_queries: usize,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            kubeconfig_path: default_kubeconfig_path(),
            service_account_dir: PathBuf::from(DEFAULT_SERVICE_ACCOUNT_DIR),
            managed_cache_ttl: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(10),
            watch_resync: Duration::from_secs(30),
            max_concurrent_queries: 16,
        }
    }
}

fn default_kubeconfig_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".kube").join("config"))
        .unwrap_or_else(|| PathBuf::from(".kube/config"))
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            InspectorError::Config(format!("{} must be a number, got '{}'", name, raw))
        }),
        None => Ok(default),
    }
}

impl InspectorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let kubeconfig_path = lookup("KUBECONFIG")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.kubeconfig_path);
        let service_account_dir = lookup("INSPECTOR_SERVICE_ACCOUNT_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.service_account_dir);

        let max_concurrent_queries = parse_var(
            &lookup,
            "INSPECTOR_MAX_CONCURRENT_QUERIES",
            defaults.max_concurrent_queries,
        )?;
        if max_concurrent_queries == 0 {
            return Err(InspectorError::Config(
                "INSPECTOR_MAX_CONCURRENT_QUERIES must be at least 1".to_string(),
            ));
        }

        let watch_resync = Duration::from_secs(parse_var(
            &lookup,
            "INSPECTOR_WATCH_RESYNC_SECS",
            defaults.watch_resync.as_secs(),
        )?);
        if watch_resync.is_zero() {
            return Err(InspectorError::Config(
                "INSPECTOR_WATCH_RESYNC_SECS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            kubeconfig_path,
            service_account_dir,
            managed_cache_ttl: Duration::from_secs(parse_var(
                &lookup,
                "INSPECTOR_MANAGED_CACHE_TTL_SECS",
                defaults.managed_cache_ttl.as_secs(),
            )?),
            probe_timeout: Duration::from_secs(parse_var(
                &lookup,
                "INSPECTOR_PROBE_TIMEOUT_SECS",
                defaults.probe_timeout.as_secs(),
            )?),
            watch_resync,
            max_concurrent_queries,
        })
    }

    /// Whether mounted service-account credentials are present
    pub fn in_cluster(&self) -> bool {
        has_service_account(&self.service_account_dir)
    }
}

fn has_service_account(dir: &Path) -> bool {
    dir.is_dir() && dir.join("token").is_file() && dir.join("ca.crt").is_file()
}
