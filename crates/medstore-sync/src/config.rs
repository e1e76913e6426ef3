//! # Sync Configuration
//!
//! Configuration for a store's sync client.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MEDSTORE_SYNC_URL=https://central.example.com                      │
//! │     MEDSTORE_STORE_ID=2                                                │
//! │     MEDSTORE_SYNC_INTERVAL=300                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/medstore/sync.toml (Linux)                               │
//! │     ~/Library/Application Support/com.medstore.medstore/sync.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     5 minute interval, 60 s error backoff, remote wins                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [store]
//! store_id = 2
//! store_name = "Jackson Medical Store"
//! license_number = "MS002"
//!
//! [server]
//! url = "https://central.example.com"
//! request_timeout_secs = 30
//!
//! [sync]
//! interval_secs = 300
//! error_backoff_secs = 60
//! batch_size = 500
//! conflict_policy = "remote_wins"   # remote_wins | last_writer_wins
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};
use medstore_core::ConflictPolicy;

// =============================================================================
// Store Identity
// =============================================================================

/// The identity this store presents to `POST /sync/connect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreIdentity {
    /// StoreID of this store in the central database.
    pub store_id: i64,

    #[serde(default)]
    pub store_name: String,

    /// Must match the license registered centrally for `store_id`.
    #[serde(default)]
    pub license_number: String,
}

impl Default for StoreIdentity {
    fn default() -> Self {
        StoreIdentity {
            store_id: 1,
            store_name: String::new(),
            license_number: String::new(),
        }
    }
}

// =============================================================================
// Central Server
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentralServer {
    /// Base URL; endpoints are resolved as `{url}/sync/...`.
    #[serde(default = "default_url")]
    pub url: String,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for CentralServer {
    fn default() -> Self {
        CentralServer {
            url: default_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync loop behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Time between cycles (seconds). Default: 300
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Wait after a failed cycle (seconds). Default: 60
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    /// Maximum queued changes pushed per cycle. Default: 500
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// How a pulled record meets a queued local change on the same row.
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

fn default_interval() -> u64 {
    300
}
fn default_error_backoff() -> u64 {
    60
}
fn default_batch_size() -> i64 {
    500
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            interval_secs: default_interval(),
            error_backoff_secs: default_error_backoff(),
            batch_size: default_batch_size(),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub store: StoreIdentity,

    #[serde(default)]
    pub server: CentralServer,

    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.store.store_id <= 0 {
            return Err(SyncError::InvalidConfig(format!(
                "store_id must be positive, got {}",
                self.store.store_id
            )));
        }

        let url = Url::parse(&self.server.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "Server URL must start with http:// or https://, got: {}",
                self.server.url
            )));
        }

        if self.sync.interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "interval_secs must be greater than 0".into(),
            ));
        }

        if self.sync.batch_size <= 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `MEDSTORE_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("MEDSTORE_SYNC_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.server.url = url;
        }

        if let Some(id) = lookup("MEDSTORE_STORE_ID") {
            match id.parse::<i64>() {
                Ok(id) => self.store.store_id = id,
                Err(_) => warn!(value = %id, "Ignoring non-numeric MEDSTORE_STORE_ID"),
            }
        }

        if let Some(interval) = lookup("MEDSTORE_SYNC_INTERVAL") {
            match interval.parse::<u64>() {
                Ok(secs) => self.sync.interval_secs = secs,
                Err(_) => warn!(value = %interval, "Ignoring non-numeric MEDSTORE_SYNC_INTERVAL"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "medstore", "medstore")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.sync.error_backoff_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.sync.error_backoff_secs, 60);
        assert_eq!(config.sync.conflict_policy, ConflictPolicy::RemoteWins);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.server.url = "ftp://central".to_string();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.server.url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.server.url = "https://central.example.com".to_string();
        config.sync.interval_secs = 0;
        assert!(config.validate().is_err());

        config.sync.interval_secs = 10;
        config.store.store_id = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MEDSTORE_SYNC_URL", "https://central.example.com"),
            ("MEDSTORE_STORE_ID", "3"),
            ("MEDSTORE_SYNC_INTERVAL", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.url, "https://central.example.com");
        assert_eq!(config.store.store_id, 3);
        assert_eq!(config.sync.interval_secs, 300);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");

        let mut config = SyncConfig::default();
        config.store.store_id = 2;
        config.store.license_number = "MS002".to_string();
        config.sync.conflict_policy = ConflictPolicy::LastWriterWins;
        config.save(Some(path.clone())).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("[store]"));
        assert!(raw.contains("last_writer_wins"));

        let loaded: SyncConfig = toml::from_str(&raw).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [store]
            store_id = 4
            license_number = "MS004"
            "#,
        )
        .unwrap();
        assert_eq!(config.store.store_id, 4);
        assert_eq!(config.server.url, "http://localhost:8000");
        assert_eq!(config.sync.batch_size, 500);
    }
}
