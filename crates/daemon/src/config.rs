//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// HTTP listen address
    pub listen: String,

    /// Directory holding the web UI assets
    pub static_dir: Option<PathBuf>,

    /// vCenter connection settings
    pub vcenter: VcenterConfig,

    /// Inventory caching
    pub inventory: InventoryConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: portgroup_common::default_store_path(),
            listen: "127.0.0.1:8080".to_string(),
            static_dir: None,
            vcenter: VcenterConfig::default(),
            inventory: InventoryConfig::default(),
        }
    }
}

/// vCenter-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VcenterConfig {
    /// HTTPS port of the endpoint
    pub port: u16,

    /// Skip TLS certificate verification
    pub insecure: bool,

    /// Per-request timeout
    pub timeout_secs: u64,

    /// VI/JSON API release segment, e.g. `8.0.1.0`
    pub api_release: String,

    /// Interval between task state polls
    pub task_poll_interval_ms: u64,

    /// Upper bound on waiting for a reconfiguration task
    pub task_timeout_secs: u64,
}

impl Default for VcenterConfig {
    fn default() -> Self {
        Self {
            port: 443,
            insecure: true,
            timeout_secs: 30,
            api_release: "8.0.1.0".to_string(),
            task_poll_interval_ms: 500,
            task_timeout_secs: 600,
        }
    }
}

impl VcenterConfig {
    pub fn task_poll_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Inventory configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Lifetime of the cached host map; unset keeps it until the next refresh
    pub host_cache_ttl_secs: Option<u64>,
}

impl InventoryConfig {
    pub fn host_cache_ttl(&self) -> Option<Duration> {
        self.host_cache_ttl_secs.map(Duration::from_secs)
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("vmware.db")
    }
}
