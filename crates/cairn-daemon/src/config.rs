//! Configuration file management.
//!
//! `config.toml` lives in the data directory. Every field has a default, so
//! a missing file or a partial one is fine.

use std::path::{Path, PathBuf};

use cairn_pins::{IngestConfig, RegistryConfig};
use cairn_types::{Balance, DEFAULT_MAX_REPLICAS, DEFAULT_MAX_SIZE_BYTES};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CAIRN_DATA_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub pinning: PinningConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Limits on pin submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinningConfig {
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Pool spending allowed per calendar month. Adopted at each rollover.
    #[serde(default = "default_monthly_quota_total")]
    pub monthly_quota_total: u64,
    /// Seeded only when the database has no pool row yet.
    #[serde(default)]
    pub initial_pool_balance: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSection {
    /// Initial toggle; a value set through `set_auto_pin` takes precedence.
    #[serde(default = "default_true")]
    pub auto_pin_enabled: bool,
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Buffered pin events per subscriber.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_size_bytes() -> u64 {
    DEFAULT_MAX_SIZE_BYTES
}

fn default_max_replicas() -> u32 {
    DEFAULT_MAX_REPLICAS
}

fn default_monthly_quota_total() -> u64 {
    1_000_000_000
}

fn default_true() -> bool {
    true
}

fn default_dedup_ttl_secs() -> u64 {
    86_400
}

fn default_dedup_capacity() -> usize {
    65_536
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_buffer() -> usize {
    1000
}

impl Default for PinningConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size_bytes(),
            max_replicas: default_max_replicas(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            monthly_quota_total: default_monthly_quota_total(),
            initial_pool_balance: 0,
        }
    }
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            auto_pin_enabled: true,
            dedup_ttl_secs: default_dedup_ttl_secs(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl DaemonConfig {
    /// Load `config.toml` from the data directory, or defaults if absent.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::default_data_dir().join("config.toml"))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    pub fn quota_total(&self) -> Balance {
        Balance::from(self.billing.monthly_quota_total)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_size_bytes: self.pinning.max_size_bytes,
            max_replicas: self.pinning.max_replicas,
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            enabled: self.ingest.auto_pin_enabled,
            dedup_ttl_secs: self.ingest.dedup_ttl_secs,
            dedup_capacity: self.ingest.dedup_capacity,
        }
    }

    /// `$CAIRN_DATA_DIR`, else a per-platform directory under `$HOME`.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            home_subdir("Library/Application Support/Cairn")
        }
        #[cfg(not(target_os = "macos"))]
        {
            home_subdir(".cairn")
        }
    }
}

fn home_subdir(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/cairn"))
}
