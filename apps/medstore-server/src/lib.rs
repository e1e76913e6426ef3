//! # MedStore Server
//!
//! HTTP API for the pharmacy database and the server side of the store sync
//! protocol.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           MedStore Server                               │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────────┐│
//! │  │  /sync/*       │  │  CRUD routes   │  │  Store mode (optional)     ││
//! │  │                │  │                │  │                            ││
//! │  │ • connect      │  │ • /stores      │  │ SyncManager loop pushing   ││
//! │  │ • changes      │  │ • /medicines   │  │ this store's changes to a  ││
//! │  │ • push         │  │ • /customers   │  │ central server             ││
//! │  │ • status       │  │ • /operators   │  │                            ││
//! │  │ (JWT guarded)  │  │ • /purchases   │  │                            ││
//! │  └───────┬────────┘  └───────┬────────┘  └─────────────┬──────────────┘│
//! │          └───────────────────┼─────────────────────────┘               │
//! │                              ▼                                          │
//! │                     medstore-db (SQLite)                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! Environment variables (a `.env` file is read first when present):
//! - `JWT_SECRET` - Secret for token signing (required, at least 32 bytes)
//! - `DATABASE_PATH` - SQLite file (default: medical_store.db)
//! - `BIND_ADDR` - Listen address (default: 0.0.0.0:8000)
//! - `LOG_LEVEL` - Default log filter (default: info)
//! - `TOKEN_LIFETIME_SECS` - Sync token lifetime (default: 86400)
//! - `SYNC_CONFIG` - Sync client TOML; enables store mode

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use medstore_db::Database;

// Re-exports
pub use auth::JwtManager;
pub use config::ServerConfig;
pub use error::ApiError;
pub use routes::router;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub jwt: Arc<JwtManager>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        AppState {
            db,
            jwt: Arc::new(JwtManager::new(
                config.jwt_secret.clone(),
                config.token_lifetime_secs,
            )),
            config: Arc::new(config),
        }
    }
}
