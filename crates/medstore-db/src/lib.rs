//! # medstore-db: Database Layer for MedStore
//!
//! SQLite access for both deployments of the pharmacy application: a store's
//! local database and the central server's database. Same schema, same
//! repositories; only change tracking differs.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MedStore Data Flow                               │
//! │                                                                         │
//! │  HTTP handler (POST /purchases/add)      SyncManager cycle              │
//! │       │                                       │                         │
//! │       ▼                                       ▼                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   medstore-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ MedicineRepo  │    │ 001_initial  │  │   │
//! │  │   │ SqlitePool    │◄───│ PurchaseRepo  │    │ 002_sync     │  │   │
//! │  │   │ track_changes │    │ ChangeQueue   │    │ 003_id_map   │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   medical_store.db                                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use medstore_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("medical_store.db").track_changes(true)).await?;
//! let low = db.medicines().low_stock(Some(1), 10).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use migrations::MigrationStatus;
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::change_queue::ChangeQueueRepository;
pub use repository::customer::CustomerRepository;
pub use repository::id_map::{IdMapRepository, IdMapping};
pub use repository::medicine::MedicineRepository;
pub use repository::operator::OperatorRepository;
pub use repository::purchase::{PurchaseFilter, PurchaseRepository};
pub use repository::replication::{OutgoingBatch, PushOutcome, ReplicationRepository};
pub use repository::store::StoreRepository;
pub use repository::sync_state::SyncStateRepository;
