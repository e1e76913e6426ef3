//! # Sync State Repository
//!
//! Small persistent bookkeeping for both sides of the sync protocol:
//!
//! - **Store side**: the watermark (`last_sync_time`) in the `SyncState`
//!   key/value table, so a restart does not re-pull everything.
//! - **Central side**: `StoreSyncLog`, the time of each store's last accepted
//!   push, returned as `last_sync` by `/sync/connect`.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use medstore_core::Watermark;

/// `SyncState` key holding the store's watermark.
pub const WATERMARK_KEY: &str = "last_sync_time";

#[derive(Debug, Clone)]
pub struct SyncStateRepository {
    pool: SqlitePool,
}

impl SyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncStateRepository { pool }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT Value FROM SyncState WHERE Key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO SyncState (Key, Value, UpdatedAt) VALUES (?1, ?2, ?3)
            ON CONFLICT (Key) DO UPDATE SET Value = excluded.Value, UpdatedAt = excluded.UpdatedAt
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The stored watermark, `Never` when none has been saved.
    pub async fn watermark(&self) -> DbResult<Watermark> {
        match self.get(WATERMARK_KEY).await? {
            Some(raw) => raw
                .parse()
                .map_err(|e| DbError::invalid_record("SyncState", e)),
            None => Ok(Watermark::Never),
        }
    }

    pub async fn set_watermark(&self, watermark: Watermark) -> DbResult<()> {
        debug!(%watermark, "Saving watermark");
        self.set(WATERMARK_KEY, &watermark.to_string()).await
    }

    /// When the central server last accepted a push from `store_id`.
    pub async fn store_last_sync(&self, store_id: i64) -> DbResult<Watermark> {
        let at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT LastSyncAt FROM StoreSyncLog WHERE StoreID = ?1")
                .bind(store_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(at.map(Watermark::At).unwrap_or_default())
    }
}

/// Records an accepted push on the push transaction.
pub(crate) async fn record_push_on(
    conn: &mut SqliteConnection,
    store_id: i64,
    at: DateTime<Utc>,
    count: usize,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO StoreSyncLog (StoreID, LastSyncAt, LastPushCount) VALUES (?1, ?2, ?3)
        ON CONFLICT (StoreID) DO UPDATE SET
            LastSyncAt = excluded.LastSyncAt, LastPushCount = excluded.LastPushCount
        "#,
    )
    .bind(store_id)
    .bind(at)
    .bind(count as i64)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
