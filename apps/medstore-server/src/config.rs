//! Server configuration module.
//!
//! Configuration is loaded from environment variables (after an optional
//! `.env` file) with fallback to defaults. The JWT secret has no default.

use std::env;
use std::fmt;
use std::path::PathBuf;

/// Minimum accepted length of `JWT_SECRET`, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Listen address, e.g. `0.0.0.0:8000`
    pub bind_addr: String,

    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,

    pub app_name: String,

    /// HS256 key for sync tokens
    pub jwt_secret: String,

    /// Sync token lifetime in seconds
    pub token_lifetime_secs: i64,

    /// Sync client config; when set the server runs in store mode
    pub sync_config: Option<PathBuf>,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired("JWT_SECRET".to_string()))?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakSecret {
                min: MIN_SECRET_LEN,
            });
        }

        Ok(ServerConfig {
            database_path: lookup("DATABASE_PATH")
                .unwrap_or_else(|| "medical_store.db".to_string())
                .into(),

            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            app_name: lookup("APP_NAME").unwrap_or_else(|| "Medical Store Management".to_string()),

            jwt_secret,

            token_lifetime_secs: lookup("TOKEN_LIFETIME_SECS")
                .unwrap_or_else(|| "86400".to_string()) // 24 hours
                .parse()
                .ok()
                .filter(|secs: &i64| *secs > 0)
                .ok_or_else(|| ConfigError::InvalidValue("TOKEN_LIFETIME_SECS".to_string()))?,

            sync_config: lookup("SYNC_CONFIG")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    /// True when this deployment is a store that syncs with a central server.
    pub fn is_store_mode(&self) -> bool {
        self.sync_config.is_some()
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("database_path", &self.database_path)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("app_name", &self.app_name)
            .field("jwt_secret", &"<redacted>")
            .field("token_lifetime_secs", &self.token_lifetime_secs)
            .field("sync_config", &self.sync_config)
            .finish()
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("JWT_SECRET must be at least {min} bytes")]
    WeakSecret { min: usize },
}
