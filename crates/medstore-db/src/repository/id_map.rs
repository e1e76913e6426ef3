//! # Row Identity Map
//!
//! A store and the central server number their rows independently, so the
//! same medicine is `MedicineID 3` in the store and `MedicineID 41` at
//! central. This module keeps the two apart.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  STORE: SyncIdMap                        CENTRAL: SyncOrigin            │
//! │                                                                         │
//! │  (table, local id) ◄──► central id       (store, table, local id)       │
//! │  + RemoteUpdatedAt                               ──► central row        │
//! │                                                                         │
//! │  written when a push is acknowledged     written when a pushed insert   │
//! │  (AssignedId) and when a pulled          is applied; a retried insert   │
//! │  record is applied                       finds it and updates instead   │
//! │                                                                         │
//! │  read to translate ids both ways and to recognise a pulled record       │
//! │  that is only this store's own write coming back                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DbError, DbResult};
use medstore_core::EntityKind;

/// One store-side mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMapping {
    pub table: EntityKind,
    pub local_id: i64,
    pub remote_id: i64,
    /// Central `UpdatedAt` of the newest version this store wrote or applied.
    pub remote_updated_at: Option<DateTime<Utc>>,
}

impl IdMapping {
    /// True when a pulled version stamped `updated_at` is not newer than
    /// what this store already has.
    pub fn has_seen(&self, updated_at: Option<DateTime<Utc>>) -> bool {
        matches!(
            (self.remote_updated_at, updated_at),
            (Some(seen), Some(at)) if at <= seen
        )
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MapRow {
    #[sqlx(rename = "TableName")]
    table_name: String,
    #[sqlx(rename = "LocalID")]
    local_id: i64,
    #[sqlx(rename = "RemoteID")]
    remote_id: i64,
    #[sqlx(rename = "RemoteUpdatedAt")]
    remote_updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<MapRow> for IdMapping {
    type Error = DbError;

    fn try_from(row: MapRow) -> Result<Self, Self::Error> {
        Ok(IdMapping {
            table: row.table_name.parse()?,
            local_id: row.local_id,
            remote_id: row.remote_id,
            remote_updated_at: row.remote_updated_at,
        })
    }
}

/// Read access to the store-side map.
#[derive(Debug, Clone)]
pub struct IdMapRepository {
    pool: SqlitePool,
}

impl IdMapRepository {
    pub fn new(pool: SqlitePool) -> Self {
        IdMapRepository { pool }
    }

    pub async fn by_remote(&self, table: EntityKind, remote_id: i64) -> DbResult<Option<IdMapping>> {
        let mut conn = self.pool.acquire().await?;
        by_remote_on(&mut conn, table, remote_id).await
    }

    pub async fn by_local(&self, table: EntityKind, local_id: i64) -> DbResult<Option<IdMapping>> {
        let mut conn = self.pool.acquire().await?;
        by_local_on(&mut conn, table, local_id).await
    }
}

// =============================================================================
// Store side
// =============================================================================

pub(crate) async fn by_remote_on(
    conn: &mut SqliteConnection,
    table: EntityKind,
    remote_id: i64,
) -> DbResult<Option<IdMapping>> {
    let row: Option<MapRow> = sqlx::query_as(
        r#"
        SELECT TableName, LocalID, RemoteID, RemoteUpdatedAt
        FROM SyncIdMap WHERE TableName = ?1 AND RemoteID = ?2
        "#,
    )
    .bind(table.as_str())
    .bind(remote_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(IdMapping::try_from).transpose()
}

pub(crate) async fn by_local_on(
    conn: &mut SqliteConnection,
    table: EntityKind,
    local_id: i64,
) -> DbResult<Option<IdMapping>> {
    let row: Option<MapRow> = sqlx::query_as(
        r#"
        SELECT TableName, LocalID, RemoteID, RemoteUpdatedAt
        FROM SyncIdMap WHERE TableName = ?1 AND LocalID = ?2
        "#,
    )
    .bind(table.as_str())
    .bind(local_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(IdMapping::try_from).transpose()
}

/// Records that local row `local_id` is central row `remote_id`, last seen
/// at `remote_updated_at`. A version stamp never moves backwards.
pub(crate) async fn remember_on(
    conn: &mut SqliteConnection,
    table: EntityKind,
    local_id: i64,
    remote_id: i64,
    remote_updated_at: Option<DateTime<Utc>>,
) -> DbResult<()> {
    // A central id belongs to one local row.
    sqlx::query("DELETE FROM SyncIdMap WHERE TableName = ?1 AND RemoteID = ?2 AND LocalID <> ?3")
        .bind(table.as_str())
        .bind(remote_id)
        .bind(local_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO SyncIdMap (TableName, LocalID, RemoteID, RemoteUpdatedAt)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (TableName, LocalID) DO UPDATE SET
            RemoteID = excluded.RemoteID,
            RemoteUpdatedAt = CASE
                WHEN SyncIdMap.RemoteID <> excluded.RemoteID THEN excluded.RemoteUpdatedAt
                WHEN excluded.RemoteUpdatedAt IS NULL THEN SyncIdMap.RemoteUpdatedAt
                WHEN SyncIdMap.RemoteUpdatedAt IS NULL THEN excluded.RemoteUpdatedAt
                WHEN julianday(excluded.RemoteUpdatedAt) > julianday(SyncIdMap.RemoteUpdatedAt)
                    THEN excluded.RemoteUpdatedAt
                ELSE SyncIdMap.RemoteUpdatedAt
            END
        "#,
    )
    .bind(table.as_str())
    .bind(local_id)
    .bind(remote_id)
    .bind(remote_updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn forget_local_on(conn: &mut SqliteConnection, table: EntityKind, local_id: i64) -> DbResult<()> {
    sqlx::query("DELETE FROM SyncIdMap WHERE TableName = ?1 AND LocalID = ?2")
        .bind(table.as_str())
        .bind(local_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// =============================================================================
// Central side
// =============================================================================

/// The central row a store's pushed insert created, if it still exists.
pub(crate) async fn origin_on(
    conn: &mut SqliteConnection,
    store_id: i64,
    table: EntityKind,
    local_id: i64,
) -> DbResult<Option<i64>> {
    let name = table.table_name();
    let row_id: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT o.RowID FROM SyncOrigin o \
         JOIN {name} t ON t.{name}ID = o.RowID AND t.StoreID = o.StoreID \
         WHERE o.StoreID = ?1 AND o.TableName = ?2 AND o.LocalID = ?3"
    ))
    .bind(store_id)
    .bind(table.as_str())
    .bind(local_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row_id)
}

pub(crate) async fn record_origin_on(
    conn: &mut SqliteConnection,
    store_id: i64,
    table: EntityKind,
    local_id: i64,
    row_id: i64,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO SyncOrigin (StoreID, TableName, LocalID, RowID) VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (StoreID, TableName, LocalID) DO UPDATE SET RowID = excluded.RowID
        "#,
    )
    .bind(store_id)
    .bind(table.as_str())
    .bind(local_id)
    .bind(row_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
