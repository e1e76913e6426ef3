//! # Purchase Repository
//!
//! Purchases, their line items, and the daily sales report.
//!
//! ## Recording a Sale
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    purchases().create(store_id, input)                  │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │   ├── for each item: medicine in this store?        no  → NotFound      │
//! │   ├── total = Σ qty × unit price (claimed total ±1¢) no  → Validation    │
//! │   ├── INSERT Purchase                                                   │
//! │   ├── for each item: INSERT PurchaseItem                                │
//! │   │                  UPDATE Medicine stock -= qty   short → Insufficient │
//! │   └── SyncQueue: purchase insert + medicine updates (store mode)        │
//! │  COMMIT  (any error above rolls the whole sale back)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use super::medicine;
use super::{record_change, to_payload};
use crate::error::{DbError, DbResult};
use medstore_core::validation::{
    line_total, sum_line_totals, validate_new_purchase, validate_purchase_total,
};
use medstore_core::{
    ChangeOperation, DailyReport, EntityKind, Medicine, MedicineSales, Money, NewPurchase, Purchase,
    PurchaseDetail, PurchaseItem,
};

const PURCHASE_COLUMNS: &str =
    "PurchaseID, StoreID, CustomerID, OperatorID, DateOfPurchase, TotalCents, UpdatedAt";

/// Which purchases a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseFilter {
    All,
    Store(i64),
    Customer(i64),
    Operator(i64),
}

impl PurchaseFilter {
    fn binds(self) -> (Option<i64>, Option<i64>, Option<i64>) {
        match self {
            PurchaseFilter::All => (None, None, None),
            PurchaseFilter::Store(id) => (Some(id), None, None),
            PurchaseFilter::Customer(id) => (None, Some(id), None),
            PurchaseFilter::Operator(id) => (None, None, Some(id)),
        }
    }
}

/// Repository for purchase operations.
#[derive(Debug, Clone)]
pub struct PurchaseRepository {
    pool: SqlitePool,
    track_changes: bool,
}

impl PurchaseRepository {
    pub fn new(pool: SqlitePool, track_changes: bool) -> Self {
        PurchaseRepository {
            pool,
            track_changes,
        }
    }

    /// Records a sale and takes its items out of stock, atomically.
    ///
    /// ## Errors
    /// - `DbError::Validation` for an empty or malformed purchase, or a claimed
    ///   total that disagrees with the items by more than a cent
    /// - `DbError::NotFound` when an item's medicine is not in this store
    /// - `DbError::InsufficientStock` when a line asks for more than is on hand
    pub async fn create(&self, store_id: i64, input: &NewPurchase) -> DbResult<PurchaseDetail> {
        validate_new_purchase(input)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let mut unit_prices = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let medicine = medicine::fetch_on(&mut tx, item.medicine_id)
                .await?
                .filter(|m| m.store_id == store_id)
                .ok_or_else(|| DbError::not_found("Medicine", item.medicine_id))?;
            unit_prices.push(item.price_per_unit_cents.unwrap_or(medicine.price_cents));
        }

        let line_totals = input
            .items
            .iter()
            .zip(&unit_prices)
            .map(|(item, price)| line_total(*price, item.quantity))
            .collect::<Result<Vec<Money>, _>>()?;
        let total = match input.total_cents {
            Some(claimed) => validate_purchase_total(claimed, &line_totals)?,
            None => sum_line_totals(&line_totals)?,
        };

        let purchase_id = insert_header_on(&mut tx, store_id, input, total, now).await?;

        let mut touched: Vec<Medicine> = Vec::with_capacity(input.items.len());
        for (item, price) in input.items.iter().zip(&unit_prices) {
            insert_item_on(&mut tx, purchase_id, item.medicine_id, item.quantity, *price).await?;
            let medicine = medicine::decrement_stock_on(&mut tx, item.medicine_id, item.quantity, now).await?;
            touched.retain(|m| m.id != medicine.id);
            touched.push(medicine);
        }

        let detail = fetch_detail_on(&mut tx, purchase_id)
            .await?
            .ok_or_else(|| DbError::not_found("Purchase", purchase_id))?;

        if self.track_changes {
            let payload = to_payload(EntityKind::Purchases, &detail)?;
            record_change(&mut tx, true, EntityKind::Purchases, ChangeOperation::Insert, payload).await?;
            for medicine in &touched {
                let payload = to_payload(EntityKind::Medicines, medicine)?;
                record_change(&mut tx, true, EntityKind::Medicines, ChangeOperation::Update, payload).await?;
            }
        }

        tx.commit().await?;

        info!(
            purchase_id,
            store_id,
            items = detail.items.len(),
            total = %detail.purchase.total_cents,
            "Purchase recorded"
        );
        Ok(detail)
    }

    /// A purchase with its items.
    pub async fn get(&self, id: i64) -> DbResult<PurchaseDetail> {
        let mut conn = self.pool.acquire().await?;
        fetch_detail_on(&mut conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Purchase", id))
    }

    pub async fn list(&self, filter: PurchaseFilter) -> DbResult<Vec<PurchaseDetail>> {
        list_details(&self.pool, filter).await
    }

    /// Sales totals for one calendar day (UTC), optionally for one store.
    pub async fn daily_report(&self, date: NaiveDate, store_id: Option<i64>) -> DbResult<DailyReport> {
        let (purchase_count, total_revenue_cents): (i64, Money) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(TotalCents), 0)
            FROM Purchase
            WHERE date(DateOfPurchase) = ?1 AND (?2 IS NULL OR StoreID = ?2)
            "#,
        )
        .bind(date)
        .bind(store_id)
        .fetch_one(&self.pool)
        .await?;

        let medicines = sqlx::query_as::<_, MedicineSales>(
            r#"
            SELECT
                pi.MedicineID AS medicine_id,
                m.Name AS name,
                SUM(pi.Quantity) AS quantity,
                SUM(pi.Quantity * pi.PricePerUnitCents) AS revenue_cents
            FROM PurchaseItem pi
            JOIN Purchase p ON p.PurchaseID = pi.PurchaseID
            JOIN Medicine m ON m.MedicineID = pi.MedicineID
            WHERE date(p.DateOfPurchase) = ?1 AND (?2 IS NULL OR p.StoreID = ?2)
            GROUP BY pi.MedicineID, m.Name
            ORDER BY revenue_cents DESC, m.Name
            "#,
        )
        .bind(date)
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(DailyReport {
            date,
            purchase_count,
            total_revenue_cents,
            medicines,
        })
    }
}

// =============================================================================
// Statement helpers
// =============================================================================

pub(crate) async fn list_details(pool: &SqlitePool, filter: PurchaseFilter) -> DbResult<Vec<PurchaseDetail>> {
    let (store_id, customer_id, operator_id) = filter.binds();
    let purchases = sqlx::query_as::<_, Purchase>(&format!(
        "SELECT {PURCHASE_COLUMNS} FROM Purchase \
         WHERE (?1 IS NULL OR StoreID = ?1) \
           AND (?2 IS NULL OR CustomerID = ?2) \
           AND (?3 IS NULL OR OperatorID = ?3) \
         ORDER BY DateOfPurchase DESC, PurchaseID DESC"
    ))
    .bind(store_id)
    .bind(customer_id)
    .bind(operator_id)
    .fetch_all(pool)
    .await?;

    attach_items(pool, purchases).await
}

async fn attach_items(pool: &SqlitePool, purchases: Vec<Purchase>) -> DbResult<Vec<PurchaseDetail>> {
    let mut conn = pool.acquire().await?;
    let mut details = Vec::with_capacity(purchases.len());
    for purchase in purchases {
        let items = items_on(&mut conn, purchase.id).await?;
        details.push(PurchaseDetail { purchase, items });
    }
    Ok(details)
}

async fn items_on(conn: &mut SqliteConnection, purchase_id: i64) -> DbResult<Vec<PurchaseItem>> {
    let items = sqlx::query_as::<_, PurchaseItem>(
        r#"
        SELECT PurchaseItemID, PurchaseID, MedicineID, Quantity, PricePerUnitCents
        FROM PurchaseItem WHERE PurchaseID = ?1 ORDER BY PurchaseItemID
        "#,
    )
    .bind(purchase_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}

pub(crate) async fn fetch_detail_on(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<PurchaseDetail>> {
    let purchase = sqlx::query_as::<_, Purchase>(&format!(
        "SELECT {PURCHASE_COLUMNS} FROM Purchase WHERE PurchaseID = ?1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match purchase {
        Some(purchase) => {
            let items = items_on(conn, purchase.id).await?;
            Ok(Some(PurchaseDetail { purchase, items }))
        }
        None => Ok(None),
    }
}

async fn insert_header_on(
    conn: &mut SqliteConnection,
    store_id: i64,
    input: &NewPurchase,
    total: Money,
    now: DateTime<Utc>,
) -> DbResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO Purchase (StoreID, CustomerID, OperatorID, DateOfPurchase, TotalCents, UpdatedAt)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(store_id)
    .bind(input.customer_id)
    .bind(input.operator_id)
    .bind(input.date_of_purchase.unwrap_or(now))
    .bind(total)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn insert_item_on(
    conn: &mut SqliteConnection,
    purchase_id: i64,
    medicine_id: i64,
    quantity: i64,
    unit_price: Money,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO PurchaseItem (PurchaseID, MedicineID, Quantity, PricePerUnitCents)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(purchase_id)
    .bind(medicine_id)
    .bind(quantity)
    .bind(unit_price)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Resolves item prices and the total of a purchase received through sync.
///
/// Missing unit prices fall back to the medicine's current price in `store_id`.
async fn priced_items_on(
    conn: &mut SqliteConnection,
    store_id: i64,
    input: &NewPurchase,
) -> DbResult<(Vec<Money>, Money)> {
    let mut prices = Vec::with_capacity(input.items.len());
    for item in &input.items {
        let price = match item.price_per_unit_cents {
            Some(price) => price,
            None => {
                medicine::fetch_on(conn, item.medicine_id)
                    .await?
                    .filter(|m| m.store_id == store_id)
                    .ok_or_else(|| DbError::not_found("Medicine", item.medicine_id))?
                    .price_cents
            }
        };
        prices.push(price);
    }
    let line_totals = input
        .items
        .iter()
        .zip(&prices)
        .map(|(item, price)| line_total(*price, item.quantity))
        .collect::<Result<Vec<Money>, _>>()?;
    let total = match input.total_cents {
        Some(total) => total,
        None => sum_line_totals(&line_totals)?,
    };
    Ok((prices, total))
}

/// Inserts a pushed purchase with its items. Stock is not touched: the
/// pushing store sends its own medicine updates.
pub(crate) async fn insert_synced_on(
    conn: &mut SqliteConnection,
    store_id: i64,
    input: &NewPurchase,
    now: DateTime<Utc>,
) -> DbResult<i64> {
    validate_new_purchase(input)?;
    let (prices, total) = priced_items_on(conn, store_id, input).await?;
    let id = insert_header_on(conn, store_id, input, total, now).await?;
    for (item, price) in input.items.iter().zip(&prices) {
        insert_item_on(conn, id, item.medicine_id, item.quantity, *price).await?;
    }
    Ok(id)
}

/// Rewrites a pushed purchase and replaces its items.
pub(crate) async fn update_synced_on(
    conn: &mut SqliteConnection,
    store_id: i64,
    id: i64,
    input: &NewPurchase,
    now: DateTime<Utc>,
) -> DbResult<()> {
    validate_new_purchase(input)?;
    let (prices, total) = priced_items_on(conn, store_id, input).await?;

    let result = sqlx::query(
        r#"
        UPDATE Purchase SET
            CustomerID = ?1, OperatorID = ?2, DateOfPurchase = COALESCE(?3, DateOfPurchase),
            TotalCents = ?4, UpdatedAt = ?5
        WHERE PurchaseID = ?6 AND StoreID = ?7
        "#,
    )
    .bind(input.customer_id)
    .bind(input.operator_id)
    .bind(input.date_of_purchase)
    .bind(total)
    .bind(now)
    .bind(id)
    .bind(store_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Purchase", id));
    }

    sqlx::query("DELETE FROM PurchaseItem WHERE PurchaseID = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    for (item, price) in input.items.iter().zip(&prices) {
        insert_item_on(conn, id, item.medicine_id, item.quantity, *price).await?;
    }
    Ok(())
}

pub(crate) async fn delete_on(conn: &mut SqliteConnection, store_id: i64, id: i64) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM Purchase WHERE PurchaseID = ?1 AND StoreID = ?2")
        .bind(id)
        .bind(store_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Purchase", id));
    }
    Ok(())
}

/// Writes a purchase received from the central server into local row
/// `local_id` (a new row when `None`) and replaces its items. References in
/// `detail` must already be local ids. Returns the local purchase id.
pub(crate) async fn upsert_on(
    conn: &mut SqliteConnection,
    local_id: Option<i64>,
    detail: &PurchaseDetail,
) -> DbResult<i64> {
    let purchase = &detail.purchase;
    let result = sqlx::query(
        r#"
        INSERT INTO Purchase (PurchaseID, StoreID, CustomerID, OperatorID, DateOfPurchase, TotalCents, UpdatedAt)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT (PurchaseID) DO UPDATE SET
            StoreID = excluded.StoreID, CustomerID = excluded.CustomerID,
            OperatorID = excluded.OperatorID, DateOfPurchase = excluded.DateOfPurchase,
            TotalCents = excluded.TotalCents, UpdatedAt = excluded.UpdatedAt
        "#,
    )
    .bind(local_id)
    .bind(purchase.store_id)
    .bind(purchase.customer_id)
    .bind(purchase.operator_id)
    .bind(purchase.date_of_purchase)
    .bind(purchase.total_cents)
    .bind(purchase.updated_at)
    .execute(&mut *conn)
    .await?;
    let id = local_id.unwrap_or_else(|| result.last_insert_rowid());

    sqlx::query("DELETE FROM PurchaseItem WHERE PurchaseID = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    for item in &detail.items {
        insert_item_on(conn, id, item.medicine_id, item.quantity, item.price_per_unit_cents).await?;
    }
    Ok(id)
}

pub(crate) async fn changed_since(
    pool: &SqlitePool,
    store_id: i64,
    since: Option<DateTime<Utc>>,
) -> DbResult<Vec<PurchaseDetail>> {
    let purchases = sqlx::query_as::<_, Purchase>(&format!(
        "SELECT {PURCHASE_COLUMNS} FROM Purchase \
         WHERE StoreID = ?1 AND (?2 IS NULL OR julianday(UpdatedAt) > julianday(?2)) \
         ORDER BY UpdatedAt, PurchaseID"
    ))
    .bind(store_id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    attach_items(pool, purchases).await
}

// =============================================================================
// Unit Tests
// =============================================================================
