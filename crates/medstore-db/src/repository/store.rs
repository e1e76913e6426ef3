//! # Store Repository
//!
//! Pharmacies (MedicalStore table), their dashboards, and the identity check
//! behind `POST /sync/connect`.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use medstore_core::changes::EntityCounts;
use medstore_core::validation::validate_new_store;
use medstore_core::{NewStore, Store, StoreDashboard};

const STORE_COLUMNS: &str =
    "StoreID, StoreName, Address, ContactNumber, LicenseNumber, OpeningDate";

/// Repository for store operations.
#[derive(Debug, Clone)]
pub struct StoreRepository {
    pool: SqlitePool,
}

impl StoreRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StoreRepository { pool }
    }

    /// Registers a new store.
    ///
    /// ## Errors
    /// - `DbError::Validation` on bad input
    /// - `DbError::UniqueViolation` when the license number is taken
    pub async fn create(&self, store: &NewStore) -> DbResult<Store> {
        validate_new_store(store)?;

        let result = sqlx::query(
            r#"
            INSERT INTO MedicalStore (StoreName, Address, ContactNumber, LicenseNumber, OpeningDate)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(store.store_name.trim())
        .bind(store.address.trim())
        .bind(store.contact_number.as_deref())
        .bind(store.license_number.trim())
        .bind(store.opening_date)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: store.license_number.clone(),
            },
            other => other,
        })?;

        let id = result.last_insert_rowid();
        info!(store_id = id, name = %store.store_name, "Store created");
        self.get(id).await
    }

    pub async fn get(&self, id: i64) -> DbResult<Store> {
        self.find(id)
            .await?
            .ok_or_else(|| DbError::not_found("Store", id))
    }

    pub async fn find(&self, id: i64) -> DbResult<Option<Store>> {
        let store = sqlx::query_as::<_, Store>(&format!(
            "SELECT {STORE_COLUMNS} FROM MedicalStore WHERE StoreID = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(store)
    }

    pub async fn list(&self) -> DbResult<Vec<Store>> {
        let stores = sqlx::query_as::<_, Store>(&format!(
            "SELECT {STORE_COLUMNS} FROM MedicalStore ORDER BY StoreID"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(stores)
    }

    /// Checks a presented store identity.
    ///
    /// Returns the store only when `id` exists and `license_number` matches
    /// its license exactly; `None` otherwise, without saying which part failed.
    pub async fn authenticate(&self, id: i64, license_number: &str) -> DbResult<Option<Store>> {
        let store = self.find(id).await?;
        let matched = store.filter(|s| s.license_number == license_number.trim());
        debug!(store_id = id, matched = matched.is_some(), "Store identity check");
        Ok(matched)
    }

    /// Makes sure a store row with this id exists, creating a minimal one if not.
    ///
    /// A store-mode database needs its own store row before any scoped entity
    /// can reference it.
    pub async fn ensure_exists(&self, id: i64, name: &str, license_number: &str) -> DbResult<Store> {
        sqlx::query(
            r#"
            INSERT INTO MedicalStore (StoreID, StoreName, Address, LicenseNumber)
            VALUES (?1, ?2, '', ?3)
            ON CONFLICT (StoreID) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(license_number)
        .execute(&self.pool)
        .await?;
        self.get(id).await
    }

    /// Number of store-scoped rows per synced entity.
    pub async fn entity_counts(&self, id: i64) -> DbResult<EntityCounts> {
        let (medicines, customers, operators, purchases): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM Medicine WHERE StoreID = ?1),
                (SELECT COUNT(*) FROM Customer WHERE StoreID = ?1),
                (SELECT COUNT(*) FROM Operator WHERE StoreID = ?1),
                (SELECT COUNT(*) FROM Purchase WHERE StoreID = ?1)
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(EntityCounts {
            medicines,
            customers,
            operators,
            purchases,
        })
    }

    /// Dashboard numbers for one store.
    pub async fn dashboard(&self, id: i64, low_stock_threshold: i64) -> DbResult<StoreDashboard> {
        let store = self.get(id).await?;
        let counts = self.entity_counts(id).await?;

        let low_stock: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM Medicine WHERE StoreID = ?1 AND StockQuantity < ?2",
        )
        .bind(id)
        .bind(low_stock_threshold)
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreDashboard {
            store,
            total_medicines: counts.medicines,
            low_stock_medicines: low_stock,
            customers: counts.customers,
            operators: counts.operators,
            purchases: counts.purchases,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
