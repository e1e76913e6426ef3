//! # Medicine Repository
//!
//! Medicine CRUD, stock reports, and the statement helpers used by purchases
//! and sync.
//!
//! ## Store Scope
//! Methods taking `store_scope: Option<i64>` only touch rows of that store
//! when it is `Some`. The sync endpoints always pass the authenticated store,
//! so a pushed update can never reach another store's row.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::{record_change, to_payload};
use crate::error::{DbError, DbResult};
use medstore_core::validation::{validate_expiry_not_past, validate_new_medicine};
use medstore_core::{ChangeOperation, EntityKind, Medicine, NewMedicine};

pub(crate) const MEDICINE_COLUMNS: &str = "MedicineID, StoreID, Name, Brand, Description, \
    BatchNumber, ExpiryDate, PriceCents, StockQuantity, Type, RequiresPrescription, \
    ScheduleCategory, StorageLocationID, UpdatedAt";

/// Repository for medicine operations.
#[derive(Debug, Clone)]
pub struct MedicineRepository {
    pool: SqlitePool,
    track_changes: bool,
}

impl MedicineRepository {
    pub fn new(pool: SqlitePool, track_changes: bool) -> Self {
        MedicineRepository {
            pool,
            track_changes,
        }
    }

    /// Adds a medicine to a store.
    ///
    /// ## Validation
    /// Field rules plus "expiry not in the past" against today's date.
    pub async fn create(&self, store_id: i64, input: &NewMedicine) -> DbResult<Medicine> {
        let created = self.create_batch(store_id, std::slice::from_ref(input)).await?;
        created
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Internal("insert returned no medicine".to_string()))
    }

    /// Adds several medicines in one transaction; nothing is stored if any fails.
    pub async fn create_batch(&self, store_id: i64, inputs: &[NewMedicine]) -> DbResult<Vec<Medicine>> {
        let today = Utc::now().date_naive();
        for input in inputs {
            validate_new_medicine(input)?;
            validate_expiry_not_past(input.expiry_date, today)?;
        }

        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
            let medicine = insert_on(&mut tx, store_id, input, Utc::now()).await?;
            let payload = to_payload(EntityKind::Medicines, &medicine)?;
            record_change(
                &mut tx,
                self.track_changes,
                EntityKind::Medicines,
                ChangeOperation::Insert,
                payload,
            )
            .await?;
            created.push(medicine);
        }
        tx.commit().await?;

        info!(store_id, count = created.len(), "Medicines added");
        Ok(created)
    }

    pub async fn get(&self, id: i64) -> DbResult<Medicine> {
        let mut conn = self.pool.acquire().await?;
        fetch_on(&mut conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Medicine", id))
    }

    /// All medicines, or only one store's.
    pub async fn list(&self, store_id: Option<i64>) -> DbResult<Vec<Medicine>> {
        let medicines = sqlx::query_as::<_, Medicine>(&format!(
            "SELECT {MEDICINE_COLUMNS} FROM Medicine \
             WHERE (?1 IS NULL OR StoreID = ?1) ORDER BY Name, MedicineID"
        ))
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(medicines)
    }

    /// Replaces a medicine's fields.
    pub async fn update(&self, id: i64, store_scope: Option<i64>, input: &NewMedicine) -> DbResult<Medicine> {
        validate_new_medicine(input)?;

        let mut tx = self.pool.begin().await?;
        let medicine = update_on(&mut tx, store_scope, id, input, Utc::now()).await?;
        let payload = to_payload(EntityKind::Medicines, &medicine)?;
        record_change(
            &mut tx,
            self.track_changes,
            EntityKind::Medicines,
            ChangeOperation::Update,
            payload,
        )
        .await?;
        tx.commit().await?;

        debug!(medicine_id = id, "Medicine updated");
        Ok(medicine)
    }

    pub async fn delete(&self, id: i64, store_scope: Option<i64>) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        let medicine = fetch_on(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Medicine", id))?;
        delete_on(&mut tx, store_scope, id).await?;
        let payload = to_payload(EntityKind::Medicines, &medicine)?;
        record_change(
            &mut tx,
            self.track_changes,
            EntityKind::Medicines,
            ChangeOperation::Delete,
            payload,
        )
        .await?;
        tx.commit().await?;

        info!(medicine_id = id, "Medicine deleted");
        Ok(())
    }

    /// Medicines with stock strictly below `threshold`.
    pub async fn low_stock(&self, store_id: Option<i64>, threshold: i64) -> DbResult<Vec<Medicine>> {
        let medicines = sqlx::query_as::<_, Medicine>(&format!(
            "SELECT {MEDICINE_COLUMNS} FROM Medicine \
             WHERE (?1 IS NULL OR StoreID = ?1) AND StockQuantity < ?2 \
             ORDER BY StockQuantity, Name"
        ))
        .bind(store_id)
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;
        Ok(medicines)
    }

    /// Medicines expiring between `today` and `today + days`, both inclusive.
    pub async fn expiring(&self, store_id: Option<i64>, today: NaiveDate, days: i64) -> DbResult<Vec<Medicine>> {
        let until = today + Duration::days(days.max(0));
        let medicines = sqlx::query_as::<_, Medicine>(&format!(
            "SELECT {MEDICINE_COLUMNS} FROM Medicine \
             WHERE (?1 IS NULL OR StoreID = ?1) \
               AND ExpiryDate IS NOT NULL AND ExpiryDate >= ?2 AND ExpiryDate <= ?3 \
             ORDER BY ExpiryDate, Name"
        ))
        .bind(store_id)
        .bind(today)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;
        Ok(medicines)
    }
}

// =============================================================================
// Statement helpers (run on a caller's transaction)
// =============================================================================

pub(crate) async fn fetch_on(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Medicine>> {
    let medicine = sqlx::query_as::<_, Medicine>(&format!(
        "SELECT {MEDICINE_COLUMNS} FROM Medicine WHERE MedicineID = ?1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(medicine)
}

pub(crate) async fn insert_on(
    conn: &mut SqliteConnection,
    store_id: i64,
    input: &NewMedicine,
    now: DateTime<Utc>,
) -> DbResult<Medicine> {
    let result = sqlx::query(
        r#"
        INSERT INTO Medicine (
            StoreID, Name, Brand, Description, BatchNumber, ExpiryDate, PriceCents,
            StockQuantity, Type, RequiresPrescription, ScheduleCategory, StorageLocationID,
            UpdatedAt
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(store_id)
    .bind(input.name.trim())
    .bind(input.brand.as_deref())
    .bind(input.description.as_deref())
    .bind(input.batch_number.as_deref())
    .bind(input.expiry_date)
    .bind(input.price_cents)
    .bind(input.stock_quantity)
    .bind(input.medicine_type.as_deref())
    .bind(input.requires_prescription)
    .bind(input.schedule_category.as_deref())
    .bind(input.storage_location_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let id = result.last_insert_rowid();
    fetch_on(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Medicine", id))
}

pub(crate) async fn update_on(
    conn: &mut SqliteConnection,
    store_scope: Option<i64>,
    id: i64,
    input: &NewMedicine,
    now: DateTime<Utc>,
) -> DbResult<Medicine> {
    let result = sqlx::query(
        r#"
        UPDATE Medicine SET
            Name = ?1, Brand = ?2, Description = ?3, BatchNumber = ?4, ExpiryDate = ?5,
            PriceCents = ?6, StockQuantity = ?7, Type = ?8, RequiresPrescription = ?9,
            ScheduleCategory = ?10, StorageLocationID = ?11, UpdatedAt = ?12
        WHERE MedicineID = ?13 AND (?14 IS NULL OR StoreID = ?14)
        "#,
    )
    .bind(input.name.trim())
    .bind(input.brand.as_deref())
    .bind(input.description.as_deref())
    .bind(input.batch_number.as_deref())
    .bind(input.expiry_date)
    .bind(input.price_cents)
    .bind(input.stock_quantity)
    .bind(input.medicine_type.as_deref())
    .bind(input.requires_prescription)
    .bind(input.schedule_category.as_deref())
    .bind(input.storage_location_id)
    .bind(now)
    .bind(id)
    .bind(store_scope)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Medicine", id));
    }
    fetch_on(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Medicine", id))
}

pub(crate) async fn delete_on(conn: &mut SqliteConnection, store_scope: Option<i64>, id: i64) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM Medicine WHERE MedicineID = ?1 AND (?2 IS NULL OR StoreID = ?2)")
        .bind(id)
        .bind(store_scope)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Medicine", id));
    }
    Ok(())
}

/// Takes `quantity` units out of stock, failing when not enough are on hand.
pub(crate) async fn decrement_stock_on(
    conn: &mut SqliteConnection,
    id: i64,
    quantity: i64,
    now: DateTime<Utc>,
) -> DbResult<Medicine> {
    let result = sqlx::query(
        r#"
        UPDATE Medicine SET StockQuantity = StockQuantity - ?1, UpdatedAt = ?2
        WHERE MedicineID = ?3 AND StockQuantity >= ?1
        "#,
    )
    .bind(quantity)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    let medicine = fetch_on(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Medicine", id))?;

    if result.rows_affected() == 0 {
        return Err(DbError::InsufficientStock {
            medicine_id: id,
            available: medicine.stock_quantity,
            requested: quantity,
        });
    }
    Ok(medicine)
}

/// Writes a record received from the central server into local row
/// `local_id`, or into a new row when `None`. Returns the local id.
pub(crate) async fn upsert_on(
    conn: &mut SqliteConnection,
    local_id: Option<i64>,
    medicine: &Medicine,
) -> DbResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO Medicine (
            MedicineID, StoreID, Name, Brand, Description, BatchNumber, ExpiryDate, PriceCents,
            StockQuantity, Type, RequiresPrescription, ScheduleCategory, StorageLocationID,
            UpdatedAt
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT (MedicineID) DO UPDATE SET
            StoreID = excluded.StoreID, Name = excluded.Name, Brand = excluded.Brand,
            Description = excluded.Description, BatchNumber = excluded.BatchNumber,
            ExpiryDate = excluded.ExpiryDate, PriceCents = excluded.PriceCents,
            StockQuantity = excluded.StockQuantity, Type = excluded.Type,
            RequiresPrescription = excluded.RequiresPrescription,
            ScheduleCategory = excluded.ScheduleCategory,
            StorageLocationID = excluded.StorageLocationID, UpdatedAt = excluded.UpdatedAt
        "#,
    )
    .bind(local_id)
    .bind(medicine.store_id)
    .bind(&medicine.name)
    .bind(medicine.brand.as_deref())
    .bind(medicine.description.as_deref())
    .bind(medicine.batch_number.as_deref())
    .bind(medicine.expiry_date)
    .bind(medicine.price_cents)
    .bind(medicine.stock_quantity)
    .bind(medicine.medicine_type.as_deref())
    .bind(medicine.requires_prescription)
    .bind(medicine.schedule_category.as_deref())
    .bind(medicine.storage_location_id)
    .bind(medicine.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(local_id.unwrap_or_else(|| result.last_insert_rowid()))
}

/// One store's medicines modified strictly after `since` (all when `None`).
pub(crate) async fn changed_since(
    pool: &SqlitePool,
    store_id: i64,
    since: Option<DateTime<Utc>>,
) -> DbResult<Vec<Medicine>> {
    let medicines = sqlx::query_as::<_, Medicine>(&format!(
        "SELECT {MEDICINE_COLUMNS} FROM Medicine \
         WHERE StoreID = ?1 AND (?2 IS NULL OR julianday(UpdatedAt) > julianday(?2)) \
         ORDER BY UpdatedAt, MedicineID"
    ))
    .bind(store_id)
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(medicines)
}

// =============================================================================
// Unit Tests
// =============================================================================
