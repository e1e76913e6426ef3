//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)     ValidationError (core)                 │
//! │       │                              │                                  │
//! │       └──────────────┬───────────────┘                                  │
//! │                      ▼                                                  │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ├──► ApiError (server) ← status code + JSON body                 │
//! │       └──► SyncError (sync client) ← logged, cycle fails               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use medstore_core::{CoreError, ValidationError};
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    ///
    /// ## When This Occurs
    /// - ID doesn't exist
    /// - ID exists but belongs to another store (scoped lookups)
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Registering a second store with the same license number
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Referencing a customer or medicine that doesn't exist
    /// - Deleting a medicine that purchase items still reference
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// A purchase line asks for more units than are in stock.
    #[error("Insufficient stock for medicine {medicine_id}: available {available}, requested {requested}")]
    InsufficientStock {
        medicine_id: i64,
        available: i64,
        requested: i64,
    },

    /// Input rejected before any SQL ran.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A JSON record (sync payload) could not be read or written.
    #[error("Invalid {entity} record: {reason}")]
    InvalidRecord { entity: String, reason: String },

    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn invalid_record(entity: impl Into<String>, reason: impl ToString) -> Self {
        DbError::InvalidRecord {
            entity: entity.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors caused by the caller's input rather than the database.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DbError::NotFound { .. }
                | DbError::UniqueViolation { .. }
                | DbError::ForeignKeyViolation { .. }
                | DbError::InsufficientStock { .. }
                | DbError::Validation(_)
                | DbError::InvalidRecord { .. }
        )
    }
}

/// Maps sqlx failures onto the variants callers branch on.
///
/// SQLite reports constraint failures only as text, e.g.
/// `UNIQUE constraint failed: MedicalStore.LicenseNumber` or
/// `CHECK constraint failed: StockQuantity >= 0`.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),
            sqlx::Error::Database(db_err) => classify_constraint(db_err.message()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),
            _ => DbError::Internal(err.to_string()),
        }
    }
}

fn classify_constraint(message: &str) -> DbError {
    let detail = |prefix: &str| {
        message
            .split_once(prefix)
            .map(|(_, rest)| rest.trim().to_string())
            .unwrap_or_default()
    };

    if message.contains("UNIQUE constraint failed") {
        let column = detail("UNIQUE constraint failed:");
        let field = column.rsplit('.').next().unwrap_or("unknown").to_string();
        DbError::UniqueViolation {
            field,
            value: "unknown".to_string(),
        }
    } else if message.contains("FOREIGN KEY constraint failed") {
        DbError::ForeignKeyViolation {
            message: message.to_string(),
        }
    } else if message.contains("CHECK constraint failed") {
        DbError::invalid_record("row", format!("violates {}", detail("CHECK constraint failed:")))
    } else if message.contains("NOT NULL constraint failed") {
        DbError::invalid_record("row", format!("{} is required", detail("NOT NULL constraint failed:")))
    } else {
        DbError::QueryFailed(message.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<CoreError> for DbError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => DbError::Validation(v),
            CoreError::InsufficientStock {
                medicine_id,
                available,
                requested,
            } => DbError::InsufficientStock {
                medicine_id,
                available,
                requested,
            },
            CoreError::UnknownEntity(name) => DbError::invalid_record(name, "unknown entity type"),
            CoreError::MalformedRecord { entity, reason } => DbError::InvalidRecord { entity, reason },
        }
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(DbError::not_found("Medicine", 4).is_client_error());
        assert!(DbError::Validation(ValidationError::required("name")).is_client_error());
        assert!(!DbError::PoolExhausted.is_client_error());
        assert!(!DbError::QueryFailed("disk I/O error".into()).is_client_error());
    }

    #[test]
    fn test_core_error_conversion() {
        let err: DbError = CoreError::InsufficientStock {
            medicine_id: 1,
            available: 2,
            requested: 3,
        }
        .into();
        assert!(matches!(err, DbError::InsufficientStock { available: 2, .. }));
    }

    #[test]
    fn test_constraint_messages() {
        match classify_constraint("UNIQUE constraint failed: MedicalStore.LicenseNumber") {
            DbError::UniqueViolation { field, .. } => assert_eq!(field, "LicenseNumber"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            classify_constraint("FOREIGN KEY constraint failed"),
            DbError::ForeignKeyViolation { .. }
        ));

        let check = classify_constraint("CHECK constraint failed: StockQuantity >= 0");
        assert!(check.is_client_error());
        assert!(check.to_string().contains("StockQuantity >= 0"));

        assert!(matches!(
            classify_constraint("disk I/O error"),
            DbError::QueryFailed(_)
        ));
    }
}
