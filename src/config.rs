//! Runtime configuration.
//!
//! All tuning for the archival core comes in through this struct,
//! loaded from a TOML file with defaults for anything unspecified.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::archive::access_router::RouterConfig;
use crate::archive::migration_engine::EngineConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Records older than this are eligible for archival (days).
    pub age_threshold_days: u64,

    /// Soft-flag grace period before a hot copy may be scheduled for
    /// deletion (days).
    pub delete_grace_days: u64,

    /// Page size for the hot-store eligibility scan.
    pub scan_batch_size: usize,

    /// Router attempts against a contended record before surfacing
    /// an error to the caller.
    pub router_max_retries: usize,

    /// Base backoff between retries (ms).
    pub retry_base_delay_ms: u64,

    /// Backoff cap (ms).
    pub retry_max_delay_ms: u64,

    /// Per-step timeout for engine and router store I/O (ms).
    pub step_timeout_ms: u64,

    /// Hours a non-terminal migration may linger before the `stuck`
    /// report surfaces it.
    pub stuck_grace_hours: u64,

    /// TTL for cache entries populated on cold reads (seconds).
    pub cache_ttl_secs: u64,

    /// Cache capacity in records.
    pub cache_capacity: u64,

    /// Base directory of the file-backed hot store (CLI).
    pub hot_path: String,

    /// Base directory of the file-backed cold store (CLI).
    pub cold_path: String,

    /// Consistency log file (CLI).
    pub log_path: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            age_threshold_days: 90,
            delete_grace_days: 7,
            scan_batch_size: 100,
            router_max_retries: 3,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 1_000,
            step_timeout_ms: 10_000,
            stuck_grace_hours: 24,
            cache_ttl_secs: 300,
            cache_capacity: 10_000,
            hot_path: "./data/hot".to_string(),
            cold_path: "./data/cold".to_string(),
            log_path: "./data/consistency.jsonl".to_string(),
        }
    }
}

impl ArchiveConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        let config: ArchiveConfig =
            toml::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Write the configuration as pretty TOML.
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            age_threshold_secs: self.age_threshold_days * 86_400,
            delete_grace_secs: self.delete_grace_days * 86_400,
            scan_batch_size: self.scan_batch_size,
            step_timeout: Duration::from_millis(self.step_timeout_ms),
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_retries: self.router_max_retries,
            retry_base_delay_ms: self.retry_base_delay_ms,
            retry_max_delay_ms: self.retry_max_delay_ms,
            op_timeout: Duration::from_millis(self.step_timeout_ms),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }

    pub fn stuck_grace_secs(&self) -> u64 {
        self.stuck_grace_hours * 3_600
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ArchiveConfig::default();
        assert_eq!(config.age_threshold_days, 90);
        assert_eq!(config.delete_grace_days, 7);
        assert_eq!(config.scan_batch_size, 100);
        assert_eq!(config.router_max_retries, 3);
    }

    #[test]
    fn test_toml_round_trip() {
        let path = format!("/tmp/frostline_config_{}.toml", rand::random::<u64>());
        let config = ArchiveConfig {
            age_threshold_days: 30,
            scan_batch_size: 25,
            ..Default::default()
        };

        config.to_toml_file(&path).unwrap();
        let loaded = ArchiveConfig::from_toml_file(&path).unwrap();

        assert_eq!(loaded.age_threshold_days, 30);
        assert_eq!(loaded.scan_batch_size, 25);
        assert_eq!(loaded.delete_grace_days, 7);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let path = format!("/tmp/frostline_config_{}.toml", rand::random::<u64>());
        std::fs::write(&path, "age_threshold_days = 45\n").unwrap();

        let loaded = ArchiveConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded.age_threshold_days, 45);
        assert_eq!(loaded.scan_batch_size, 100);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unit_conversions() {
        let config = ArchiveConfig::default();
        assert_eq!(config.engine_config().age_threshold_secs, 90 * 86_400);
        assert_eq!(config.engine_config().delete_grace_secs, 7 * 86_400);
        assert_eq!(config.stuck_grace_secs(), 24 * 3_600);
    }
}
