//! JWT authentication module.
//!
//! Issues the bearer tokens returned by `POST /sync/connect` and guards the
//! other `/sync/*` endpoints.
//!
//! ## Verification
//! ```text
//! Authorization: Bearer <jwt>
//!        │
//!        ▼
//!  extract_bearer_token ──► JwtManager::verify (HS256, exp) ──► Claims
//!        │                          │                              │
//!        └──────── any failure ─────┘                              ▼
//!                     │                               request.extensions
//!                     ▼
//!           401 {"error": {"message": "Invalid token"}}
//! ```
//!
//! Failures are logged with their cause but answered uniformly, so a client
//! cannot tell an expired token from a forged one.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

/// JWT claims structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (store_id as a string)
    pub sub: String,

    /// Store the token was issued to
    pub store_id: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration (Unix timestamp)
    pub exp: i64,

    /// JWT ID (unique identifier for this token)
    pub jti: String,
}

/// JWT token manager.
#[derive(Clone)]
pub struct JwtManager {
    secret: String,
    lifetime_secs: i64,
}

impl JwtManager {
    pub fn new(secret: impl Into<String>, lifetime_secs: i64) -> Self {
        JwtManager {
            secret: secret.into(),
            lifetime_secs,
        }
    }

    pub fn lifetime_secs(&self) -> i64 {
        self.lifetime_secs
    }

    /// Issues a token bound to `store_id`.
    pub fn issue(&self, store_id: i64) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: store_id.to_string(),
            store_id,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.lifetime_secs)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String, ApiError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ApiError::internal(format!("Failed to generate token: {}", e)))
    }

    /// Validates signature and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| {
            debug!(error = %e, "Token rejected");
            ApiError::Unauthorized
        })
    }
}

/// Extract bearer token from the authorization header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(ApiError::Unauthorized)?
        .to_str()
        .map_err(|_| ApiError::Unauthorized)?;

    let (scheme, token) = value.split_once(' ').ok_or(ApiError::Unauthorized)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(ApiError::Unauthorized);
    }
    Ok(token.trim())
}

/// Middleware: verifies the bearer token and stores its [`Claims`] in the
/// request extensions.
pub async fn require_store_token(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    let claims = state.jwt.verify(token)?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
