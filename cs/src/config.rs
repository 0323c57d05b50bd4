//! ChainStore configuration types and loading

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Storage configuration
///
/// Compaction thresholds, capacity ceilings, and sweep ages are deliberately
/// configuration rather than baked-in constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of chains allowed in the queue at once
    #[serde(rename = "max-queued-chains")]
    pub max_queued_chains: u64,

    /// Maximum serialized size of a single chain definition in bytes
    #[serde(rename = "max-chain-bytes")]
    pub max_chain_bytes: u64,

    /// Minimum free disk space required before large writes
    #[serde(rename = "min-free-bytes")]
    pub min_free_bytes: u64,

    /// Age in seconds after which tombstones are purged
    #[serde(rename = "tombstone-max-age-secs")]
    pub tombstone_max_age_secs: u64,

    /// Age in seconds after which one-off metadata without an explicit TTL
    /// is reclaimed
    #[serde(rename = "metadata-max-age-secs")]
    pub metadata_max_age_secs: u64,

    /// Interval in seconds between maintenance sweeps
    #[serde(rename = "maintenance-interval-secs")]
    pub maintenance_interval_secs: u64,

    /// Durable queue tuning
    pub queue: QueueConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_queued_chains: 1024,
            max_chain_bytes: 256 * 1024,
            min_free_bytes: 16 * 1024 * 1024,
            tombstone_max_age_secs: 24 * 60 * 60,
            metadata_max_age_secs: 24 * 60 * 60,
            maintenance_interval_secs: 60 * 60,
            queue: QueueConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Load configuration with fallback chain
    ///
    /// Explicit path, then project-local `.chainstore.yml`, then
    /// `~/.config/chainstore/chainstore.yml`, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self, StoreError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(".chainstore.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("chainstore").join("chainstore.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let content = fs::read_to_string(&path)?;
        let config: Self =
            serde_yaml::from_str(&content).map_err(|e| StoreError::Config(format!("{}: {e}", path.as_ref().display())))?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Durable queue tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Fraction of log payload bytes that may be consumed before compaction
    #[serde(rename = "compact-ratio")]
    pub compact_ratio: f64,

    /// Minimum records appended since the last compaction before another runs
    #[serde(rename = "compact-min-records")]
    pub compact_min_records: u64,

    /// Maximum payload size of a single queue record in bytes
    #[serde(rename = "max-record-bytes")]
    pub max_record_bytes: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            compact_ratio: 0.8,
            compact_min_records: 64,
            max_record_bytes: 4 * 1024,
        }
    }
}
