//! # medstore-sync: Store Sync Client
//!
//! Replicates a store's local database with the central server: local writes
//! are queued durably and pushed, server changes are pulled and applied.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Client Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                     SyncManager (orchestrator)                    │  │
//! │  │                                                                  │  │
//! │  │  Spawned as a Tokio task by the server in store mode             │  │
//! │  │  One cycle at a time: connect → pull → apply → push → advance    │  │
//! │  └───────┬──────────────────────┬──────────────────────┬────────────┘  │
//! │          ▼                      ▼                      ▼               │
//! │  ┌────────────────┐   ┌────────────────┐   ┌────────────────────────┐  │
//! │  │  TokenCache    │   │ SyncTransport  │   │  ChangeApplier         │  │
//! │  │                │   │                │   │                        │  │
//! │  │ bearer token,  │   │ HttpTransport  │   │ DatabaseApplier:       │  │
//! │  │ 60 s expiry    │   │ (reqwest)      │   │ upsert pulled rows,    │  │
//! │  │ margin         │   │                │   │ ConflictPolicy         │  │
//! │  └────────────────┘   └────────────────┘   └────────────────────────┘  │
//! │                                                                         │
//! │  DURABLE STATE (medstore-db)                                           │
//! │  • SyncQueue  - pending local changes, deleted only after HTTP 200     │
//! │  • SyncState  - last_sync_time watermark                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`applier`] - Applies pulled changes locally
//! - [`config`] - Sync configuration (store identity, server URL, intervals)
//! - [`error`] - Sync error types
//! - [`manager`] - `SyncManager` state machine and loop
//! - [`token`] - Token cache
//! - [`transport`] - Transport trait and HTTP implementation
//!
//! ## Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use medstore_sync::{SyncConfig, SyncManager};
//!
//! let config = SyncConfig::load(None)?;
//! let manager = Arc::new(SyncManager::new(config, db)?);
//! let handle = manager.spawn();
//!
//! // ... on shutdown
//! handle.shutdown().await;
//! ```

pub mod applier;
pub mod config;
pub mod error;
pub mod manager;
pub mod token;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use applier::{ApplyReport, ChangeApplier, DatabaseApplier};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use manager::{ConnectionState, SyncManager, SyncManagerHandle, SyncStatus};
pub use token::{TokenCache, TokenInfo};
pub use transport::{HttpTransport, SyncTransport};
