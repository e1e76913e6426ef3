//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Server Response     │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  Unauthorized (401)     │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  Rejected { status }    │ │
//! │  │  ConfigLoad/Save│  │  NotConnected   │  │  DeserializationFailed  │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Database     │  │     Apply       │                              │
//! │  │                 │  │                 │                              │
//! │  │  DatabaseError  │  │  ApplyFailed    │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! None of these escape the sync loop: a failed cycle is logged and retried.

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid central server URL.
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// No usable token and `connect` did not produce one.
    #[error("Not connected to the central server")]
    NotConnected,

    /// Failed to reach the central server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    // =========================================================================
    // Server Responses
    // =========================================================================
    /// The server answered 401; the token is dropped.
    #[error("Unauthorized by the central server")]
    Unauthorized,

    /// The server answered with a status other than 200 or 401.
    #[error("Request rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Failed to serialize a request body.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to read a response body.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// Local database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A pulled record could not be written locally.
    #[error("Failed to apply {entity} record: {reason}")]
    ApplyFailed { entity: String, reason: String },

    /// The sync loop is stopping.
    #[error("Sync manager is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<medstore_db::DbError> for SyncError {
    fn from(err: medstore_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(0)
        } else if err.is_decode() {
            SyncError::DeserializationFailed(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the next cycle may succeed without intervention.
    ///
    /// ## Retryable Errors
    /// - Connection failures and timeouts
    /// - Server errors (5xx) and 401 (a fresh token is requested next cycle)
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Client errors (4xx other than 401): the same batch will be rejected again
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_)
            | SyncError::Timeout(_)
            | SyncError::NotConnected
            | SyncError::Unauthorized
            | SyncError::DatabaseError(_) => true,
            SyncError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the current token must be discarded.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, SyncError::Unauthorized)
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());
        assert!(SyncError::Rejected { status: 500, message: String::new() }.is_retryable());

        assert!(!SyncError::Rejected { status: 404, message: String::new() }.is_retryable());
        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
    }

    #[test]
    fn test_auth_classification() {
        assert!(SyncError::Unauthorized.is_auth_error());
        assert!(!SyncError::Rejected { status: 403, message: String::new() }.is_auth_error());
        assert!(SyncError::InvalidUrl("x".into()).is_config_error());
    }
}
