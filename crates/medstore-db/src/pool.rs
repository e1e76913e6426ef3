//! # Database Handle
//!
//! One `Database` per SQLite file. It owns the pool and hands out
//! repositories.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Who Shares the Pool                                │
//! │                                                                         │
//! │   HTTP handlers ───┐                                                    │
//! │                    │    ┌──────────────────────────────┐                │
//! │   Sync loop ───────┼───►│  SqlitePool (WAL, FK on,     │──► store.db    │
//! │                    │    │  busy timeout)               │                │
//! │   seed binary ─────┘    └──────────────────────────────┘                │
//! │                                                                         │
//! │   db.medicines()  db.purchases()  db.change_queue()  db.replication()  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Change Tracking
//! A store opens its file with `track_changes(true)`: every repository write
//! then appends to `SyncQueue` in the same transaction. Central leaves it off,
//! and so do writes that apply pulled changes.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::migrations::{self, MigrationStatus};
use crate::repository::change_queue::ChangeQueueRepository;
use crate::repository::customer::CustomerRepository;
use crate::repository::id_map::IdMapRepository;
use crate::repository::medicine::MedicineRepository;
use crate::repository::operator::OperatorRepository;
use crate::repository::purchase::PurchaseRepository;
use crate::repository::replication::ReplicationRepository;
use crate::repository::store::StoreRepository;
use crate::repository::sync_state::SyncStateRepository;

const MEMORY: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// How to open a database.
///
/// ```rust,ignore
/// let store = DbConfig::new("medical_store.db").track_changes(true);
/// let central = DbConfig::new("central.db").max_connections(10);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file, or `:memory:`.
    pub database_path: PathBuf,

    /// Default: 5 (always 1 in memory, where each connection is its own database)
    pub max_connections: u32,

    /// How long a write waits on SQLite's lock before failing. Default: 5s
    pub busy_timeout: Duration,

    /// Record repository writes in `SyncQueue`. Default: off
    pub track_changes: bool,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            track_changes: false,
        }
    }

    /// A private in-memory database, for tests.
    pub fn in_memory() -> Self {
        DbConfig {
            max_connections: 1,
            ..DbConfig::new(MEMORY)
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn track_changes(mut self, track: bool) -> Self {
        self.track_changes = track;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == MEMORY
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.database_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };

        Ok(options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout))
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared handle to one SQLite database. Clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    track_changes: bool,
}

impl Database {
    /// Opens the database and brings its schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let max_connections = if config.is_in_memory() {
            1
        } else {
            config.max_connections.max(1)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            // An in-memory database lives as long as its one connection.
            .min_connections(if config.is_in_memory() { 1 } else { 0 })
            .idle_timeout(if config.is_in_memory() { None } else { Some(Duration::from_secs(600)) })
            .max_lifetime(if config.is_in_memory() { None } else { Some(Duration::from_secs(1800)) })
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        migrations::run_migrations(&pool).await?;

        info!(
            path = %config.database_path.display(),
            max_connections,
            track_changes = config.track_changes,
            "Database opened"
        );

        Ok(Database {
            pool,
            track_changes: config.track_changes,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// True for a store database whose writes feed the sync queue.
    pub fn tracks_changes(&self) -> bool {
        self.track_changes
    }

    pub fn stores(&self) -> StoreRepository {
        StoreRepository::new(self.pool.clone())
    }

    pub fn medicines(&self) -> MedicineRepository {
        MedicineRepository::new(self.pool.clone(), self.track_changes)
    }

    pub fn customers(&self) -> CustomerRepository {
        CustomerRepository::new(self.pool.clone(), self.track_changes)
    }

    pub fn operators(&self) -> OperatorRepository {
        OperatorRepository::new(self.pool.clone(), self.track_changes)
    }

    pub fn purchases(&self) -> PurchaseRepository {
        PurchaseRepository::new(self.pool.clone(), self.track_changes)
    }

    pub fn change_queue(&self) -> ChangeQueueRepository {
        ChangeQueueRepository::new(self.pool.clone())
    }

    pub fn sync_state(&self) -> SyncStateRepository {
        SyncStateRepository::new(self.pool.clone())
    }

    /// Which local row is which central row.
    pub fn id_map(&self) -> IdMapRepository {
        IdMapRepository::new(self.pool.clone())
    }

    /// Change sets in and out: pull, push and applying pulled records.
    pub fn replication(&self) -> ReplicationRepository {
        ReplicationRepository::new(self.pool.clone())
    }

    pub async fn migration_status(&self) -> DbResult<MigrationStatus> {
        migrations::migration_status(&self.pool).await
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Waits for checked-out connections and closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database closed");
    }
}
