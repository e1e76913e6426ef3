//! # Change Queue Repository
//!
//! Durable queue of local mutations waiting to be pushed to the central server.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL OPERATION (e.g., purchases().create)                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │  1. INSERT INTO Purchase / PurchaseItem, UPDATE Medicine stock  │   │
//! │  │  2. INSERT INTO SyncQueue (TableName, Operation, Payload) × N   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← Both succeed or both fail                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            SYNC WORKER                                          │   │
//! │  │  1. pending(limit)           ordered by ChangeID                │   │
//! │  │  2. POST /sync/push                                             │   │
//! │  │  3. HTTP 200 → remove(ids)   only the rows that were sent       │   │
//! │  │     otherwise → nothing, rows stay for the next cycle           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Producers only ever INSERT and the worker only deletes the rows it    │
//! │  read, so a write landing mid-push is never lost.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use medstore_core::{ChangeOperation, ChangeRecord, EntityKind, NewChange};

/// Raw `SyncQueue` row.
#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    #[sqlx(rename = "ChangeID")]
    id: i64,
    #[sqlx(rename = "Timestamp")]
    timestamp: DateTime<Utc>,
    #[sqlx(rename = "TableName")]
    table_name: String,
    #[sqlx(rename = "Operation")]
    operation: String,
    #[sqlx(rename = "Payload")]
    payload: String,
}

impl TryFrom<QueueRow> for ChangeRecord {
    type Error = DbError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let table: EntityKind = row.table_name.parse()?;
        let operation: ChangeOperation = row.operation.parse()?;
        let payload = serde_json::from_str(&row.payload)
            .map_err(|e| DbError::invalid_record("SyncQueue", e))?;
        Ok(ChangeRecord {
            id: row.id,
            timestamp: row.timestamp,
            table,
            operation,
            payload,
        })
    }
}

/// Appends one change on an existing connection or transaction.
///
/// Repositories call this inside their write transaction so the change and
/// the write commit together.
pub(crate) async fn enqueue_on(conn: &mut SqliteConnection, change: &NewChange) -> DbResult<i64> {
    let payload = serde_json::to_string(&change.payload)
        .map_err(|e| DbError::invalid_record(change.table.as_str(), e))?;
    let record_id = change.payload.get("id").and_then(|v| v.as_i64());

    let result = sqlx::query(
        r#"
        INSERT INTO SyncQueue (Timestamp, TableName, Operation, RecordID, Payload)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(Utc::now())
    .bind(change.table.as_str())
    .bind(change.operation.as_str())
    .bind(record_id)
    .bind(payload)
    .execute(&mut *conn)
    .await?;

    let id = result.last_insert_rowid();
    debug!(
        change_id = id,
        table = %change.table,
        operation = %change.operation,
        "Change queued"
    );
    Ok(id)
}

/// Repository for the sync queue.
#[derive(Debug, Clone)]
pub struct ChangeQueueRepository {
    pool: SqlitePool,
}

impl ChangeQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ChangeQueueRepository { pool }
    }

    /// Appends a change in its own transaction.
    pub async fn enqueue(&self, change: &NewChange) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        enqueue_on(&mut *conn, change).await
    }

    /// Oldest pending changes first, at most `limit`.
    pub async fn pending(&self, limit: i64) -> DbResult<Vec<ChangeRecord>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            r#"
            SELECT ChangeID, Timestamp, TableName, Operation, Payload
            FROM SyncQueue
            ORDER BY ChangeID ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChangeRecord::try_from).collect()
    }

    /// Pending changes that touch one row.
    pub async fn for_record(&self, table: EntityKind, record_id: i64) -> DbResult<Vec<ChangeRecord>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            r#"
            SELECT ChangeID, Timestamp, TableName, Operation, Payload
            FROM SyncQueue
            WHERE TableName = ?1 AND RecordID = ?2
            ORDER BY ChangeID ASC
            "#,
        )
        .bind(table.as_str())
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChangeRecord::try_from).collect()
    }

    /// Removes exactly the given changes (after a confirmed push).
    ///
    /// Returns the number of rows deleted.
    pub async fn remove(&self, ids: &[i64]) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;
        let removed = remove_on(&mut *tx, ids).await?;
        tx.commit().await?;
        Ok(removed)
    }

    /// Number of pending changes.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM SyncQueue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Deletes queue rows by id on an existing connection or transaction.
pub(crate) async fn remove_on(conn: &mut SqliteConnection, ids: &[i64]) -> DbResult<u64> {
    let mut removed = 0;
    for id in ids {
        removed += sqlx::query("DELETE FROM SyncQueue WHERE ChangeID = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(removed)
}

// =============================================================================
// Unit Tests
// =============================================================================
