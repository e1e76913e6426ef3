//! # Error Types
//!
//! Domain-specific error types for medstore-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  medstore-core errors (this file)                                      │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  medstore-db     └── DbError    - Database operation failures          │
//! │  medstore-sync   └── SyncError  - Sync client failures                 │
//! │  medstore-server └── ApiError   - What HTTP clients see                │
//! │                                                                         │
//! │  Flow: ValidationError → DbError → ApiError → 400 response             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Not enough stock to complete a purchase line.
    ///
    /// ## When This Occurs
    /// - A purchase asks for more units than the medicine has on hand
    #[error("Insufficient stock for medicine {medicine_id}: available {available}, requested {requested}")]
    InsufficientStock {
        medicine_id: i64,
        available: i64,
        requested: i64,
    },

    /// Table name in a change record is not one the sync protocol carries.
    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    /// A change payload could not be interpreted as the expected record.
    #[error("Malformed {entity} record: {reason}")]
    MalformedRecord { entity: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when user input doesn't meet requirements.
/// Every variant maps to a 400 response at the HTTP edge.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., unparseable date or amount).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Date lies in the past where only today or later is accepted.
    #[error("{field} cannot be in the past")]
    DateInPast { field: String },

    /// Claimed purchase total disagrees with its items.
    #[error("Total amount {claimed} does not match sum of items {computed}")]
    TotalMismatch { claimed: String, computed: String },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::Required`].
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Shorthand for [`ValidationError::InvalidFormat`].
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            medicine_id: 7,
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for medicine 7: available 3, requested 5"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        assert_eq!(ValidationError::required("name").to_string(), "name is required");

        let err = ValidationError::TooLong {
            field: "address".to_string(),
            max: 200,
        };
        assert_eq!(err.to_string(), "address must be at most 200 characters");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::required("store_id").into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
