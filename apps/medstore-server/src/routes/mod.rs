//! # Routes
//!
//! ```text
//! /health
//! /sync/{connect,changes,push,status}       (also under /api/sync)
//! /stores, /stores/add, /stores/{id}[/medicines|customers|operators|purchases]
//! /medicines[...], /customers[...], /operators[...], /purchases[...]
//! ```
//!
//! Creates and updates take form-encoded bodies; every response is JSON.

pub mod customers;
pub mod medicines;
pub mod operators;
pub mod purchases;
pub mod stores;
pub mod sync;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::AppState;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let sync_routes = sync::router(state.clone());

    Router::new()
        .route("/health", get(health))
        .nest("/sync", sync_routes.clone())
        .nest("/api/sync", sync_routes)
        .merge(stores::router())
        .merge(medicines::router())
        .merge(customers::router())
        .merge(operators::router())
        .merge(purchases::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    app: String,
    database: bool,
    store_mode: bool,
    timestamp: i64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        app: state.config.app_name.clone(),
        database: state.db.health_check().await,
        store_mode: state.config.is_store_mode(),
        timestamp: Utc::now().timestamp(),
    })
}

// =============================================================================
// Shared Request/Response Shapes
// =============================================================================

/// `{"status": "success", "message": ...}` for writes without a body.
#[derive(Debug, Serialize)]
pub struct Ack {
    pub status: &'static str,
    pub message: String,
}

impl Ack {
    pub fn success(message: impl Into<String>) -> Json<Ack> {
        Json(Ack {
            status: "success",
            message: message.into(),
        })
    }
}

/// `?store_id=` filter on list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct StoreQuery {
    #[serde(default)]
    pub store_id: Option<i64>,
}

/// Form body naming the store a delete is scoped to.
#[derive(Debug, Deserialize)]
pub struct StoreScopeForm {
    pub store_id: i64,
}

// =============================================================================
// Form Field Helpers
// =============================================================================
// HTML forms send every field as text and empty inputs as "".

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn parse_optional<T: std::str::FromStr>(
    field: &str,
    value: Option<String>,
) -> Result<Option<T>, ApiError> {
    non_empty(value)
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| ApiError::Validation(format!("{} has invalid format", field)))
        })
        .transpose()
}

pub(crate) fn parse_date(field: &str, value: Option<String>) -> Result<Option<NaiveDate>, ApiError> {
    parse_optional::<NaiveDate>(field, value)
}

/// Checkbox semantics: present and not "false"/"0"/"off".
pub(crate) fn parse_flag(value: Option<String>) -> bool {
    non_empty(value)
        .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "off" | "no"))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-process app over an in-memory database.

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use axum::Router;
    use medstore_db::{Database, DbConfig};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::{AppState, ServerConfig};

    pub const SECRET: &str = "route-test-secret-route-test-secret";

    pub fn test_config() -> ServerConfig {
        ServerConfig {
            database_path: ":memory:".into(),
            bind_addr: "127.0.0.1:0".into(),
            log_level: "debug".into(),
            app_name: "Medical Store Management".into(),
            jwt_secret: SECRET.into(),
            token_lifetime_secs: 3600,
            sync_config: None,
        }
    }

    /// App with stores 1 (MS001) and 2 (MS002).
    pub async fn test_app() -> (Router, AppState) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.stores().ensure_exists(1, "Michael Medical Store", "MS001").await.unwrap();
        db.stores().ensure_exists(2, "Jackson Medical Store", "MS002").await.unwrap();
        let state = AppState::new(db, test_config());
        (super::router(state.clone()), state)
    }

    pub async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<(&str, String)>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some((content_type, body)) => builder
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
        send(app, Method::GET, uri, None, None).await
    }

    pub async fn post_form(app: &Router, uri: &str, form: &str) -> (StatusCode, Value) {
        send(
            app,
            Method::POST,
            uri,
            None,
            Some(("application/x-www-form-urlencoded", form.to_string())),
        )
        .await
    }
}
