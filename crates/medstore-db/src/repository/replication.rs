//! # Replication Repository
//!
//! Moves change sets in and out of the database.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  CENTRAL                                    STORE                       │
//! │                                                                         │
//! │  changes_since(store, watermark) ──pull──► apply_remote(kind, record)   │
//! │    rows of that store with                   central id → local row via │
//! │    UpdatedAt > watermark                     SyncIdMap (new row when    │
//! │                                              unmapped), no queueing,    │
//! │                                              drops superseded changes   │
//! │                                                                         │
//! │  apply_push(store, set) ◄──────push─────── outgoing(pending)            │
//! │    one transaction:                          local ids → central ids;   │
//! │      id            → update the row          unmapped rows travel as    │
//! │      local_id      → update the row the      local_id                   │
//! │                      store inserted before,                             │
//! │                      else insert it                                     │
//! │      deleted: true → delete the row                                     │
//! │    + StoreSyncLog                                                       │
//! │    ──► assigned ids, synced_at ──────────► complete_push(batch, resp)   │
//! │                                              map ids, drop queue rows   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use super::{change_queue, customer, id_map, medicine, operator, purchase, sync_state};
use crate::error::{DbError, DbResult};
use medstore_core::changes::{is_deleted, record_id, record_local_id, record_updated_at, PushResponse, LOCAL_ID_KEY};
use medstore_core::validation::{validate_new_customer, validate_new_medicine, validate_new_operator};
use medstore_core::{
    AssignedId, ChangeOperation, ChangeRecord, ChangeSet, Customer, EntityKind, Medicine, NewCustomer, NewMedicine,
    NewOperator, NewPurchase, Operator, PurchaseDetail, Watermark,
};

/// What central did with one pushed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PushOutcome {
    pub applied: usize,
    /// Central ids of the rows pushed with a `local_id`.
    pub assigned: Vec<AssignedId>,
    /// `UpdatedAt` written on every row of the batch.
    pub synced_at: DateTime<Utc>,
}

/// Queued changes rewritten with central ids, ready to push.
///
/// Covers a prefix of the pending queue: a purchase that references a row
/// inserted earlier in the same batch waits for the next batch, once that
/// row has a central id.
#[derive(Debug, Clone, Default)]
pub struct OutgoingBatch {
    pub changes: ChangeSet,
    change_ids: Vec<i64>,
    /// Mapped rows written by this batch: (kind, local id, central id).
    sent: Vec<(EntityKind, i64, i64)>,
    deleted: Vec<(EntityKind, i64)>,
}

impl OutgoingBatch {
    /// Queue rows this batch covers.
    pub fn change_ids(&self) -> &[i64] {
        &self.change_ids
    }

    pub fn len(&self) -> usize {
        self.change_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.change_ids.is_empty()
    }
}

/// Repository for sync change sets.
#[derive(Debug, Clone)]
pub struct ReplicationRepository {
    pool: SqlitePool,
}

impl ReplicationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReplicationRepository { pool }
    }

    // =========================================================================
    // Central
    // =========================================================================

    /// Every record of `store_id` modified strictly after `since`.
    ///
    /// `Watermark::Never` returns the store's full data set.
    pub async fn changes_since(&self, store_id: i64, since: Watermark) -> DbResult<ChangeSet> {
        let after = since.as_datetime();

        let set = ChangeSet {
            medicines: to_values(EntityKind::Medicines, medicine::changed_since(&self.pool, store_id, after).await?)?,
            customers: to_values(EntityKind::Customers, customer::changed_since(&self.pool, store_id, after).await?)?,
            operators: to_values(EntityKind::Operators, operator::changed_since(&self.pool, store_id, after).await?)?,
            purchases: to_values(EntityKind::Purchases, purchase::changed_since(&self.pool, store_id, after).await?)?,
        };

        debug!(store_id, %since, records = set.len(), "Collected changes");
        Ok(set)
    }

    /// Applies a pushed batch for `store_id` in a single transaction.
    ///
    /// Any failing record rolls back the whole batch. Every row written gets
    /// the same `UpdatedAt`, returned as `synced_at`.
    ///
    /// ## Errors
    /// - `DbError::NotFound` when a record's `id` names a row that does not
    ///   exist or belongs to another store
    /// - `DbError::InvalidRecord` / `DbError::Validation` for malformed records
    pub async fn apply_push(&self, store_id: i64, changes: &ChangeSet) -> DbResult<PushOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let mut applied = 0;
        let mut assigned = Vec::new();
        for kind in EntityKind::ALL {
            for record in changes.records(kind) {
                if let Some(id) = apply_pushed_on(&mut tx, store_id, kind, record, now).await? {
                    assigned.push(id);
                }
                applied += 1;
            }
        }

        sync_state::record_push_on(&mut tx, store_id, now, applied).await?;
        tx.commit().await?;

        info!(store_id, applied, assigned = assigned.len(), "Push applied");
        Ok(PushOutcome {
            applied,
            assigned,
            synced_at: now,
        })
    }

    // =========================================================================
    // Store
    // =========================================================================

    /// Rewrites `pending` (in queue order) for central.
    ///
    /// Mapped rows carry their central `id`. Rows central has not numbered
    /// yet drop `id` and carry `local_id`. Purchase references are
    /// translated too.
    ///
    /// ## Errors
    /// - `DbError::InvalidRecord` when a purchase line names a medicine that
    ///   has no central id and is not part of the batch
    pub async fn outgoing(&self, pending: &[ChangeRecord]) -> DbResult<OutgoingBatch> {
        let mut conn = self.pool.acquire().await?;
        let mut batch = OutgoingBatch::default();
        // Inserted by this batch, so central numbers them only on ack.
        let mut unacked: HashSet<(EntityKind, i64)> = HashSet::new();

        for change in pending {
            let kind = change.table;
            let Some(local_id) = change.record_id() else {
                if change.operation == ChangeOperation::Delete {
                    warn!(change_id = change.id, %kind, "Dropping delete without a row id");
                } else {
                    batch.changes.records_mut(kind).push(change.payload.clone());
                }
                batch.change_ids.push(change.id);
                continue;
            };
            let remote_id = id_map::by_local_on(&mut conn, kind, local_id)
                .await?
                .map(|m| m.remote_id);

            let record = if change.operation == ChangeOperation::Delete {
                batch.deleted.push((kind, local_id));
                match remote_id {
                    Some(id) => json!({"id": id, "deleted": true}),
                    None => json!({LOCAL_ID_KEY: local_id, "deleted": true}),
                }
            } else {
                let mut record = change.payload.clone();
                if kind == EntityKind::Purchases && !central_refs_on(&mut conn, &mut record, &unacked).await? {
                    debug!(change_id = change.id, "Purchase waits for its references");
                    break;
                }
                set_identity(&mut record, remote_id, local_id);
                match remote_id {
                    Some(id) => batch.sent.push((kind, local_id, id)),
                    None => {
                        unacked.insert((kind, local_id));
                    }
                }
                record
            };

            batch.changes.records_mut(kind).push(record);
            batch.change_ids.push(change.id);
        }

        Ok(batch)
    }

    /// Records what central acknowledged for `batch` and removes its queue
    /// rows, in one transaction.
    pub async fn complete_push(&self, batch: &OutgoingBatch, response: &PushResponse) -> DbResult<()> {
        let synced_at = response.synced_at;
        let mut tx = self.pool.begin().await?;

        for assigned in &response.assigned {
            id_map::remember_on(&mut tx, assigned.table, assigned.local_id, assigned.id, synced_at).await?;
        }
        for (kind, local_id, remote_id) in &batch.sent {
            id_map::remember_on(&mut tx, *kind, *local_id, *remote_id, synced_at).await?;
        }
        for (kind, local_id) in &batch.deleted {
            id_map::forget_local_on(&mut tx, *kind, *local_id).await?;
        }
        change_queue::remove_on(&mut tx, &batch.change_ids).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Writes one pulled record into the local row mapped to its central id
    /// (a new row when unmapped) and discards the queued changes it
    /// supersedes, in one transaction. Never enqueues.
    ///
    /// Returns the local row id; `None` for a delete.
    pub async fn apply_remote(&self, kind: EntityKind, record: &Value, discard: &[i64]) -> DbResult<Option<i64>> {
        let remote_id =
            record_id(record).ok_or_else(|| DbError::invalid_record(kind.as_str(), "pulled record without id"))?;
        let mut tx = self.pool.begin().await?;
        let local_id = id_map::by_remote_on(&mut tx, kind, remote_id)
            .await?
            .map(|m| m.local_id);

        let written = if is_deleted(record) {
            if let Some(local_id) = local_id {
                let table = kind.table_name();
                sqlx::query(&format!("DELETE FROM {table} WHERE {table}ID = ?1"))
                    .bind(local_id)
                    .execute(&mut *tx)
                    .await?;
                id_map::forget_local_on(&mut tx, kind, local_id).await?;
            }
            None
        } else {
            let id = match kind {
                EntityKind::Medicines => {
                    medicine::upsert_on(&mut tx, local_id, &parse::<Medicine>(kind, record)?).await?
                }
                EntityKind::Customers => {
                    customer::upsert_on(&mut tx, local_id, &parse::<Customer>(kind, record)?).await?
                }
                EntityKind::Operators => {
                    operator::upsert_on(&mut tx, local_id, &parse::<Operator>(kind, record)?).await?
                }
                EntityKind::Purchases => {
                    let mut detail = parse::<PurchaseDetail>(kind, record)?;
                    local_refs_on(&mut tx, &mut detail).await?;
                    purchase::upsert_on(&mut tx, local_id, &detail).await?
                }
            };
            id_map::remember_on(&mut tx, kind, id, remote_id, record_updated_at(record)).await?;
            Some(id)
        };

        change_queue::remove_on(&mut tx, discard).await?;
        tx.commit().await?;
        Ok(written)
    }
}

// =============================================================================
// Pushed Records (central)
// =============================================================================

async fn apply_pushed_on(
    conn: &mut SqliteConnection,
    store_id: i64,
    kind: EntityKind,
    record: &Value,
    now: DateTime<Utc>,
) -> DbResult<Option<AssignedId>> {
    let local_id = record_local_id(record);
    let target = match (record_id(record), local_id) {
        (Some(id), _) => Some(id),
        (None, Some(local_id)) => id_map::origin_on(conn, store_id, kind, local_id).await?,
        (None, None) => None,
    };

    if is_deleted(record) {
        return match target {
            Some(id) => delete_pushed_on(conn, store_id, kind, id).await.map(|()| None),
            None if local_id.is_some() => {
                debug!(store_id, %kind, ?local_id, "Deleted before it reached central");
                Ok(None)
            }
            None => Err(DbError::invalid_record(kind.as_str(), "deleted record without id")),
        };
    }

    let id = write_pushed_on(conn, store_id, kind, target, record, now).await?;
    match local_id {
        Some(local_id) => {
            id_map::record_origin_on(conn, store_id, kind, local_id, id).await?;
            Ok(Some(AssignedId {
                table: kind,
                local_id,
                id,
            }))
        }
        None => Ok(None),
    }
}

async fn delete_pushed_on(conn: &mut SqliteConnection, store_id: i64, kind: EntityKind, id: i64) -> DbResult<()> {
    match kind {
        EntityKind::Medicines => medicine::delete_on(conn, Some(store_id), id).await,
        EntityKind::Customers => customer::delete_on(conn, Some(store_id), id).await,
        EntityKind::Operators => operator::delete_on(conn, Some(store_id), id).await,
        EntityKind::Purchases => purchase::delete_on(conn, store_id, id).await,
    }
}

/// Updates row `target` of the store, or inserts when `None`. Returns the
/// row id.
async fn write_pushed_on(
    conn: &mut SqliteConnection,
    store_id: i64,
    kind: EntityKind,
    target: Option<i64>,
    record: &Value,
    now: DateTime<Utc>,
) -> DbResult<i64> {
    match kind {
        EntityKind::Medicines => {
            let input: NewMedicine = parse(kind, record)?;
            validate_new_medicine(&input)?;
            let row = match target {
                Some(id) => medicine::update_on(conn, Some(store_id), id, &input, now).await?,
                None => medicine::insert_on(conn, store_id, &input, now).await?,
            };
            Ok(row.id)
        }
        EntityKind::Customers => {
            let input: NewCustomer = parse(kind, record)?;
            validate_new_customer(&input)?;
            let row = match target {
                Some(id) => customer::update_on(conn, Some(store_id), id, &input, now).await?,
                None => customer::insert_on(conn, store_id, &input, now).await?,
            };
            Ok(row.id)
        }
        EntityKind::Operators => {
            let input: NewOperator = parse(kind, record)?;
            validate_new_operator(&input)?;
            let row = match target {
                Some(id) => operator::update_on(conn, Some(store_id), id, &input, now).await?,
                None => operator::insert_on(conn, store_id, &input, now).await?,
            };
            Ok(row.id)
        }
        EntityKind::Purchases => {
            let input: NewPurchase = parse(kind, record)?;
            match target {
                Some(id) => purchase::update_synced_on(conn, store_id, id, &input, now).await.map(|()| id),
                None => purchase::insert_synced_on(conn, store_id, &input, now).await,
            }
        }
    }
}

// =============================================================================
// Id Translation (store)
// =============================================================================

/// Points `record` at central row `remote_id`, or at local row `local_id`
/// when central has not numbered it yet.
fn set_identity(record: &mut Value, remote_id: Option<i64>, local_id: i64) {
    if let Some(fields) = record.as_object_mut() {
        match remote_id {
            Some(id) => {
                fields.insert("id".to_string(), json!(id));
            }
            None => {
                fields.remove("id");
                fields.insert(LOCAL_ID_KEY.to_string(), json!(local_id));
            }
        }
    }
}

/// Rewrites the references of a queued purchase to central ids.
///
/// Returns `false` when one of them was inserted earlier in the same batch.
/// A customer or operator central never heard of is dropped from the sale.
async fn central_refs_on(
    conn: &mut SqliteConnection,
    record: &mut Value,
    unacked: &HashSet<(EntityKind, i64)>,
) -> DbResult<bool> {
    for (key, kind) in [("customer_id", EntityKind::Customers), ("operator_id", EntityKind::Operators)] {
        let Some(local_id) = record.get(key).and_then(Value::as_i64) else {
            continue;
        };
        match id_map::by_local_on(conn, kind, local_id).await? {
            Some(mapping) => record[key] = json!(mapping.remote_id),
            None if unacked.contains(&(kind, local_id)) => return Ok(false),
            None => {
                warn!(%kind, local_id, "Reference has no central id, pushing the purchase without it");
                record[key] = Value::Null;
            }
        }
    }

    if let Some(items) = record.get_mut("items").and_then(Value::as_array_mut) {
        for item in items {
            let Some(local_id) = item.get("medicine_id").and_then(Value::as_i64) else {
                continue;
            };
            match id_map::by_local_on(conn, EntityKind::Medicines, local_id).await? {
                Some(mapping) => item["medicine_id"] = json!(mapping.remote_id),
                None if unacked.contains(&(EntityKind::Medicines, local_id)) => return Ok(false),
                None => {
                    return Err(DbError::invalid_record(
                        EntityKind::Purchases.as_str(),
                        format!("medicine {local_id} has no central id"),
                    ))
                }
            }
        }
    }
    Ok(true)
}

/// Rewrites the references of a pulled purchase to local ids.
async fn local_refs_on(conn: &mut SqliteConnection, detail: &mut PurchaseDetail) -> DbResult<()> {
    let purchase = &mut detail.purchase;
    for (reference, kind) in [
        (&mut purchase.customer_id, EntityKind::Customers),
        (&mut purchase.operator_id, EntityKind::Operators),
    ] {
        if let Some(remote_id) = *reference {
            let local = id_map::by_remote_on(conn, kind, remote_id).await?;
            if local.is_none() {
                warn!(%kind, remote_id, "Pulled purchase references an unknown row, dropping the reference");
            }
            *reference = local.map(|m| m.local_id);
        }
    }

    for item in &mut detail.items {
        let remote_id = item.medicine_id;
        item.medicine_id = id_map::by_remote_on(conn, EntityKind::Medicines, remote_id)
            .await?
            .map(|m| m.local_id)
            .ok_or_else(|| {
                DbError::invalid_record(
                    EntityKind::Purchases.as_str(),
                    format!("medicine {remote_id} has not been pulled"),
                )
            })?;
    }
    Ok(())
}

fn parse<T: DeserializeOwned>(kind: EntityKind, record: &Value) -> DbResult<T> {
    T::deserialize(record).map_err(|e| DbError::invalid_record(kind.as_str(), e))
}

fn to_values<T: serde::Serialize>(kind: EntityKind, rows: Vec<T>) -> DbResult<Vec<Value>> {
    rows.iter()
        .map(|row| serde_json::to_value(row).map_err(|e| DbError::invalid_record(kind.as_str(), e)))
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::TimeZone;
    use medstore_core::{Money, NewChange, NewPurchaseItem};

    fn medicine_input(name: &str) -> NewMedicine {
        NewMedicine {
            name: name.to_string(),
            brand: None,
            description: None,
            batch_number: None,
            expiry_date: None,
            price_cents: Money::from_cents(500),
            stock_quantity: 20,
            medicine_type: None,
            requires_prescription: false,
            schedule_category: None,
            storage_location_id: None,
        }
    }

    async fn central() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.stores().ensure_exists(1, "Michael Medical Store", "MS001").await.unwrap();
        db.stores().ensure_exists(2, "Jackson Medical Store", "MS002").await.unwrap();
        db
    }

    async fn store() -> Database {
        let db = Database::new(DbConfig::in_memory().track_changes(true)).await.unwrap();
        db.stores().ensure_exists(1, "Michael Medical Store", "MS001").await.unwrap();
        db
    }

    fn acked(assigned: Vec<AssignedId>) -> PushResponse {
        PushResponse {
            status: "success".to_string(),
            message: "ok".to_string(),
            assigned,
            synced_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
        }
    }

    async fn set_updated_at(db: &Database, id: i64, at: &str) {
        sqlx::query("UPDATE Medicine SET UpdatedAt = ?1 WHERE MedicineID = ?2")
            .bind(at)
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_changes_since_filters_by_watermark() {
        let db = central().await;
        let old = db.medicines().create(1, &medicine_input("Old")).await.unwrap();
        let new = db.medicines().create(1, &medicine_input("New")).await.unwrap();
        set_updated_at(&db, old.id, "2023-01-01T00:00:00+00:00").await;
        set_updated_at(&db, new.id, "2024-02-01T00:00:00+00:00").await;

        let since: Watermark = "2024-01-01".parse().unwrap();
        let set = db.replication().changes_since(1, since).await.unwrap();
        assert_eq!(set.medicines.len(), 1);
        assert_eq!(set.medicines[0]["name"], "New");

        let full = db.replication().changes_since(1, Watermark::Never).await.unwrap();
        assert_eq!(full.medicines.len(), 2);
    }

    #[tokio::test]
    async fn test_changes_are_scoped_to_store() {
        let db = central().await;
        db.medicines().create(1, &medicine_input("Mine")).await.unwrap();
        db.medicines().create(2, &medicine_input("Theirs")).await.unwrap();

        let set = db.replication().changes_since(1, Watermark::Never).await.unwrap();
        assert_eq!(set.medicines.len(), 1);
        assert_eq!(set.medicines[0]["store_id"], 1);
    }

    #[tokio::test]
    async fn test_apply_push_insert_update_delete() {
        let db = central().await;
        let existing = db.medicines().create(1, &medicine_input("Existing")).await.unwrap();
        let doomed = db
            .customers()
            .create(
                1,
                &NewCustomer {
                    name: "Gone".to_string(),
                    contact_number: None,
                    email: None,
                    age: None,
                    gender: None,
                    address: None,
                },
            )
            .await
            .unwrap();

        let set = ChangeSet {
            medicines: vec![
                json!({"local_id": 7, "name": "Pushed", "price_cents": 150, "stock_quantity": 3}),
                json!({"id": existing.id, "name": "Existing", "price_cents": 500, "stock_quantity": 7}),
            ],
            customers: vec![json!({"id": doomed.id, "deleted": true})],
            ..ChangeSet::default()
        };

        let outcome = db.replication().apply_push(1, &set).await.unwrap();
        assert_eq!(outcome.applied, 3);
        assert_eq!(outcome.assigned.len(), 1);
        assert_eq!(outcome.assigned[0].table, EntityKind::Medicines);
        assert_eq!(outcome.assigned[0].local_id, 7);

        let pushed = db.medicines().get(outcome.assigned[0].id).await.unwrap();
        assert_eq!(pushed.name, "Pushed");
        assert_eq!(pushed.updated_at, outcome.synced_at);

        let updated = db.medicines().get(existing.id).await.unwrap();
        assert_eq!(updated.stock_quantity, 7);
        assert_eq!(updated.updated_at, outcome.synced_at);
        assert!(db.customers().list(Some(1)).await.unwrap().is_empty());
        assert!(!db.sync_state().store_last_sync(1).await.unwrap().is_never());
    }

    #[tokio::test]
    async fn test_pushed_ids_never_touch_other_stores_rows() {
        let db = central().await;
        let theirs = db.medicines().create(2, &medicine_input("Theirs")).await.unwrap();

        // The pushing store numbers its row like the other store's row.
        let set = ChangeSet {
            medicines: vec![json!({"local_id": theirs.id, "name": "Mine", "price_cents": 150, "stock_quantity": 3})],
            ..ChangeSet::default()
        };
        let outcome = db.replication().apply_push(1, &set).await.unwrap();

        assert_ne!(outcome.assigned[0].id, theirs.id);
        assert_eq!(db.medicines().get(theirs.id).await.unwrap().name, "Theirs");
        assert_eq!(db.medicines().list(Some(1)).await.unwrap()[0].name, "Mine");
    }

    #[tokio::test]
    async fn test_repeated_insert_updates_the_first_copy() {
        let db = central().await;
        let set = ChangeSet {
            medicines: vec![json!({"local_id": 1, "name": "Paracetamol", "price_cents": 150, "stock_quantity": 3})],
            ..ChangeSet::default()
        };
        let first = db.replication().apply_push(1, &set).await.unwrap();

        // Same insert again, as after a lost acknowledgement, then an edit.
        let again = ChangeSet {
            medicines: vec![
                json!({"local_id": 1, "name": "Paracetamol", "price_cents": 150, "stock_quantity": 3}),
                json!({"local_id": 1, "name": "Paracetamol", "price_cents": 150, "stock_quantity": 9}),
            ],
            ..ChangeSet::default()
        };
        let second = db.replication().apply_push(1, &again).await.unwrap();

        assert_eq!(second.assigned[0].id, first.assigned[0].id);
        assert_eq!(second.assigned[1].id, first.assigned[0].id);
        let rows = db.medicines().list(Some(1)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stock_quantity, 9);

        let gone = ChangeSet {
            medicines: vec![json!({"local_id": 1, "deleted": true}), json!({"local_id": 99, "deleted": true})],
            ..ChangeSet::default()
        };
        db.replication().apply_push(1, &gone).await.unwrap();
        assert!(db.medicines().list(Some(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_push_rolls_back_on_foreign_row() {
        let db = central().await;
        let theirs = db.medicines().create(2, &medicine_input("Theirs")).await.unwrap();

        let set = ChangeSet {
            medicines: vec![
                json!({"name": "Would be inserted", "price_cents": 150, "stock_quantity": 3}),
                json!({"id": theirs.id, "name": "Hijack", "price_cents": 1, "stock_quantity": 0}),
            ],
            ..ChangeSet::default()
        };

        let err = db.replication().apply_push(1, &set).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
        assert!(db.medicines().list(Some(1)).await.unwrap().is_empty());
        assert_eq!(db.medicines().get(theirs.id).await.unwrap().name, "Theirs");
        assert!(db.sync_state().store_last_sync(1).await.unwrap().is_never());
    }

    #[tokio::test]
    async fn test_outgoing_uses_central_ids_once_acknowledged() {
        let db = store().await;
        let local = db.medicines().create(1, &medicine_input("Paracetamol")).await.unwrap();

        let pending = db.change_queue().pending(10).await.unwrap();
        let batch = db.replication().outgoing(&pending).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch.changes.medicines[0].get("id").is_none());
        assert_eq!(batch.changes.medicines[0]["local_id"], local.id);

        let response = acked(vec![AssignedId {
            table: EntityKind::Medicines,
            local_id: local.id,
            id: 41,
        }]);
        db.replication().complete_push(&batch, &response).await.unwrap();
        assert_eq!(db.change_queue().count().await.unwrap(), 0);

        let mapping = db.id_map().by_local(EntityKind::Medicines, local.id).await.unwrap().unwrap();
        assert_eq!(mapping.remote_id, 41);
        assert_eq!(mapping.remote_updated_at, response.synced_at);

        db.medicines().update(local.id, Some(1), &medicine_input("Paracetamol 500")).await.unwrap();
        db.medicines().delete(local.id, Some(1)).await.unwrap();
        let pending = db.change_queue().pending(10).await.unwrap();
        let batch = db.replication().outgoing(&pending).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.changes.medicines[0]["id"], 41);
        assert!(batch.changes.medicines[0].get("local_id").is_none());
        assert_eq!(batch.changes.medicines[1], json!({"id": 41, "deleted": true}));

        db.replication().complete_push(&batch, &acked(Vec::new())).await.unwrap();
        assert!(db.id_map().by_local(EntityKind::Medicines, local.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purchase_waits_for_medicine_pushed_in_same_batch() {
        let db = store().await;
        let medicine = db.medicines().create(1, &medicine_input("Paracetamol")).await.unwrap();
        db.purchases()
            .create(
                1,
                &NewPurchase {
                    customer_id: None,
                    operator_id: None,
                    date_of_purchase: None,
                    total_cents: None,
                    items: vec![NewPurchaseItem {
                        medicine_id: medicine.id,
                        quantity: 2,
                        price_per_unit_cents: None,
                    }],
                },
            )
            .await
            .unwrap();

        // medicine insert, purchase insert, stock update
        let pending = db.change_queue().pending(10).await.unwrap();
        assert_eq!(pending.len(), 3);

        let first = db.replication().outgoing(&pending).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(first.changes.purchases.is_empty());

        let response = acked(vec![AssignedId {
            table: EntityKind::Medicines,
            local_id: medicine.id,
            id: 41,
        }]);
        db.replication().complete_push(&first, &response).await.unwrap();

        let rest = &pending[first.len()..];
        let second = db.replication().outgoing(rest).await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second.changes.purchases[0]["items"][0]["medicine_id"], 41);
        assert_eq!(second.changes.medicines[0]["id"], 41);
        assert_eq!(second.changes.medicines[0]["stock_quantity"], 18);
    }

    #[tokio::test]
    async fn test_outgoing_rejects_medicine_without_central_id() {
        let db = store().await;
        let queue = db.change_queue();
        queue
            .enqueue(&NewChange::new(
                EntityKind::Purchases,
                ChangeOperation::Insert,
                json!({"id": 1, "store_id": 1, "items": [{"medicine_id": 5, "quantity": 1}]}),
            ))
            .await
            .unwrap();

        let pending = queue.pending(10).await.unwrap();
        let err = db.replication().outgoing(&pending).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidRecord { .. }));
    }

    #[tokio::test]
    async fn test_apply_remote_maps_new_rows_without_queueing() {
        let db = store().await;
        let remote = json!({
            "id": 42,
            "store_id": 1,
            "name": "From central",
            "price_cents": 990,
            "stock_quantity": 12,
            "requires_prescription": true,
            "updated_at": Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        });
        let local_id = db
            .replication()
            .apply_remote(EntityKind::Medicines, &remote, &[])
            .await
            .unwrap()
            .unwrap();

        let local = db.medicines().get(local_id).await.unwrap();
        assert_eq!(local.name, "From central");
        assert!(local.requires_prescription);
        assert_eq!(db.change_queue().count().await.unwrap(), 0);

        let mapping = db.id_map().by_remote(EntityKind::Medicines, 42).await.unwrap().unwrap();
        assert_eq!(mapping.local_id, local_id);
        assert_eq!(
            mapping.remote_updated_at,
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_apply_remote_updates_mapped_row_and_discards() {
        let db = store().await;
        let local = db.medicines().create(1, &medicine_input("Paracetamol")).await.unwrap();
        let pending = db.change_queue().pending(10).await.unwrap();
        let batch = db.replication().outgoing(&pending).await.unwrap();
        let response = acked(vec![AssignedId {
            table: EntityKind::Medicines,
            local_id: local.id,
            id: 42,
        }]);
        db.replication().complete_push(&batch, &response).await.unwrap();

        let stale = db
            .change_queue()
            .enqueue(&NewChange::new(
                EntityKind::Medicines,
                ChangeOperation::Update,
                json!({"id": local.id, "name": "Local edit"}),
            ))
            .await
            .unwrap();

        let remote = json!({
            "id": 42,
            "store_id": 1,
            "name": "From central",
            "price_cents": 990,
            "stock_quantity": 12,
            "requires_prescription": false,
            "updated_at": Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        });
        let written = db
            .replication()
            .apply_remote(EntityKind::Medicines, &remote, &[stale])
            .await
            .unwrap();

        assert_eq!(written, Some(local.id));
        assert_eq!(db.medicines().list(Some(1)).await.unwrap().len(), 1);
        assert_eq!(db.medicines().get(local.id).await.unwrap().name, "From central");
        assert_eq!(db.change_queue().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pulled_purchase_references_local_rows() {
        let db = store().await;
        let medicine = json!({
            "id": 300,
            "store_id": 1,
            "name": "Amoxicillin",
            "price_cents": 400,
            "stock_quantity": 10,
            "requires_prescription": false,
            "updated_at": Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        });
        let medicine_id = db
            .replication()
            .apply_remote(EntityKind::Medicines, &medicine, &[])
            .await
            .unwrap()
            .unwrap();

        let sale = json!({
            "id": 900,
            "store_id": 1,
            "customer_id": 555,
            "operator_id": null,
            "date_of_purchase": Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap(),
            "total_cents": 800,
            "updated_at": Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap(),
            "items": [{"id": 1, "purchase_id": 900, "medicine_id": 300, "quantity": 2, "price_per_unit_cents": 400}],
        });
        let purchase_id = db
            .replication()
            .apply_remote(EntityKind::Purchases, &sale, &[])
            .await
            .unwrap()
            .unwrap();

        let detail = db.purchases().get(purchase_id).await.unwrap();
        assert_eq!(detail.items[0].medicine_id, medicine_id);
        assert_eq!(detail.purchase.customer_id, None);

        let orphan = json!({
            "id": 901,
            "store_id": 1,
            "date_of_purchase": Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap(),
            "total_cents": 400,
            "updated_at": Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap(),
            "items": [{"id": 2, "purchase_id": 901, "medicine_id": 301, "quantity": 1, "price_per_unit_cents": 400}],
        });
        let err = db
            .replication()
            .apply_remote(EntityKind::Purchases, &orphan, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidRecord { .. }));
    }
}
