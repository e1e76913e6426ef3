//! # Repository Module
//!
//! Database repository implementations for MedStore.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  HTTP handler / sync worker                                            │
//! │       │  db.medicines().create(store_id, &input)                        │
//! │       ▼                                                                 │
//! │  MedicineRepository                                                    │
//! │  ├── public API: one transaction per call                              │
//! │  └── *_on(conn, ..): statement helpers that run on a caller's          │
//! │                      transaction (purchases, sync batches)             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`store::StoreRepository`] - stores, dashboards, identity check
//! - [`medicine::MedicineRepository`] - medicines, stock reports
//! - [`customer::CustomerRepository`] - customers, purchase history
//! - [`operator::OperatorRepository`] - operators, activity
//! - [`purchase::PurchaseRepository`] - transactional purchases, daily report
//! - [`change_queue::ChangeQueueRepository`] - durable sync queue
//! - [`sync_state::SyncStateRepository`] - watermark and per-store sync log
//! - [`id_map::IdMapRepository`] - local ↔ central row ids
//! - [`replication::ReplicationRepository`] - change sets in and out

pub mod change_queue;
pub mod customer;
pub mod id_map;
pub mod medicine;
pub mod operator;
pub mod purchase;
pub mod replication;
pub mod store;
pub mod sync_state;

use serde::Serialize;
use serde_json::Value;
use sqlx::SqliteConnection;

use crate::error::{DbError, DbResult};
use medstore_core::{ChangeOperation, EntityKind, NewChange};

/// Serializes a record for the sync queue.
pub(crate) fn to_payload<T: Serialize>(kind: EntityKind, record: &T) -> DbResult<Value> {
    serde_json::to_value(record).map_err(|e| DbError::invalid_record(kind.as_str(), e))
}

/// Queues a change on the caller's transaction when tracking is enabled.
pub(crate) async fn record_change(
    conn: &mut SqliteConnection,
    enabled: bool,
    kind: EntityKind,
    operation: ChangeOperation,
    payload: Value,
) -> DbResult<()> {
    if enabled {
        change_queue::enqueue_on(conn, &NewChange::new(kind, operation, payload)).await?;
    }
    Ok(())
}
