//! # Database Migrations
//!
//! The schema lives in `migrations/sqlite/` at the workspace root and is
//! compiled into the binary.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  001_initial_schema.sql   MedicalStore, Medicine, Customer, Operator,   │
//! │                           Purchase, PurchaseItem and the reference      │
//! │                           tables (StorageLocation, Batch, ...)          │
//! │  002_sync_state.sql       SyncQueue, SyncState, StoreSyncLog            │
//! │  003_sync_id_map.sql      SyncIdMap (store), SyncOrigin (central)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! New schema changes go in a new `NNN_description.sql` file. Applied files
//! are checksummed by sqlx and must never be edited.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// How far a database is behind the embedded schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    pub embedded: usize,
    pub applied: usize,
}

impl MigrationStatus {
    pub fn is_current(&self) -> bool {
        self.applied >= self.embedded
    }
}

/// Applies every embedded migration the database has not seen yet.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    MIGRATOR.run(pool).await?;
    info!(embedded = MIGRATOR.migrations.len(), "Schema up to date");
    Ok(())
}

pub async fn migration_status(pool: &SqlitePool) -> DbResult<MigrationStatus> {
    let applied: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;

    Ok(MigrationStatus {
        embedded: MIGRATOR.migrations.len(),
        applied: usize::try_from(applied).unwrap_or_default(),
    })
}
