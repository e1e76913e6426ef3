//! # API Error Types
//!
//! Every handler returns `Result<_, ApiError>`; this module turns failures
//! into HTTP responses.
//!
//! ## Status Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ApiError               Status   Body message                           │
//! │  ─────────────────────  ──────   ────────────────────────────────────   │
//! │  BadRequest / Validation  400    the reason                             │
//! │  Unauthorized             401    "Invalid token" (always)               │
//! │  InvalidCredentials       401    "Invalid store credentials"            │
//! │  NotFound                 404    the reason                             │
//! │  Conflict                 409    the reason                             │
//! │  Internal                 500    "Internal server error" (logged)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Body: `{"error": {"code": "not_found", "message": "..."}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use medstore_core::ValidationError;
use medstore_db::DbError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Validation(String),

    /// Token missing, malformed, expired or signed with another key.
    #[error("Invalid token")]
    Unauthorized,

    #[error("Invalid store credentials")]
    InvalidCredentials,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Validation(_) => "validation_error",
            Self::Unauthorized | Self::InvalidCredentials => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message,
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            DbError::ForeignKeyViolation { .. } => {
                ApiError::NotFound("Referenced record does not exist".to_string())
            }
            DbError::UniqueViolation { .. } => ApiError::Conflict(err.to_string()),
            DbError::InsufficientStock { .. } | DbError::InvalidRecord { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            DbError::Validation(e) => ApiError::Validation(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err.to_string())
    }
}
