use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, TrackerError};

/// Where job records live.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one JSON file per job. `None` keeps records in memory.
    pub data_dir: Option<PathBuf>,
    /// Upper bound for a single store call.
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// JSON price table (region -> instance type -> prices).
    pub table_path: Option<PathBuf>,
    /// Region used for all price lookups
    pub region: String,
    /// How long a looked-up price is reused. 0 disables the cache.
    pub cache_ttl_secs: u64,
    pub timeout_ms: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            table_path: None,
            region: "us-west-2".to_string(),
            cache_ttl_secs: 300,
            timeout_ms: 5_000,
        }
    }
}

impl PricingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        if self.cache_ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.cache_ttl_secs))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// JSON table mapping container locators and instance ids.
    pub table_path: Option<PathBuf>,
    pub timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            table_path: None,
            timeout_ms: 5_000,
        }
    }
}

/// Conditional-write retry policy for the reconciler.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub max_conflict_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            backoff_initial_ms: 10,
            backoff_max_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub listen_addr: SocketAddr,
    pub store: StoreConfig,
    pub pricing: PricingConfig,
    pub resolver: ResolverConfig,
    pub reconciler: ReconcilerConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "0.0.0.0:5005"
                .parse()
                .expect("default listen address is valid"),
            store: StoreConfig::default(),
            pricing: PricingConfig::default(),
            resolver: ResolverConfig::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Load a config file. Missing keys fall back to their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| TrackerError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.store.data_dir = Some(dir);
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.pricing.region = region.into();
        self
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver.timeout_ms)
    }
}
