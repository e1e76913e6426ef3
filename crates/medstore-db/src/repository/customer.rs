//! # Customer Repository
//!
//! Customers of a store and their purchase history.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::purchase::{self, PurchaseFilter};
use super::{record_change, to_payload};
use crate::error::{DbError, DbResult};
use medstore_core::validation::validate_new_customer;
use medstore_core::{ChangeOperation, Customer, EntityKind, NewCustomer, PurchaseDetail};

pub(crate) const CUSTOMER_COLUMNS: &str =
    "CustomerID, StoreID, Name, ContactNumber, Email, Age, Gender, Address, UpdatedAt";

/// Repository for customer operations.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
    track_changes: bool,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool, track_changes: bool) -> Self {
        CustomerRepository {
            pool,
            track_changes,
        }
    }

    pub async fn create(&self, store_id: i64, input: &NewCustomer) -> DbResult<Customer> {
        validate_new_customer(input)?;

        let mut tx = self.pool.begin().await?;
        let customer = insert_on(&mut tx, store_id, input, Utc::now()).await?;
        let payload = to_payload(EntityKind::Customers, &customer)?;
        record_change(
            &mut tx,
            self.track_changes,
            EntityKind::Customers,
            ChangeOperation::Insert,
            payload,
        )
        .await?;
        tx.commit().await?;

        info!(customer_id = customer.id, store_id, "Customer added");
        Ok(customer)
    }

    pub async fn get(&self, id: i64) -> DbResult<Customer> {
        let mut conn = self.pool.acquire().await?;
        fetch_on(&mut conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Customer", id))
    }

    pub async fn list(&self, store_id: Option<i64>) -> DbResult<Vec<Customer>> {
        let customers = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM Customer \
             WHERE (?1 IS NULL OR StoreID = ?1) ORDER BY Name, CustomerID"
        ))
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(customers)
    }

    pub async fn update(&self, id: i64, store_scope: Option<i64>, input: &NewCustomer) -> DbResult<Customer> {
        validate_new_customer(input)?;

        let mut tx = self.pool.begin().await?;
        let customer = update_on(&mut tx, store_scope, id, input, Utc::now()).await?;
        let payload = to_payload(EntityKind::Customers, &customer)?;
        record_change(
            &mut tx,
            self.track_changes,
            EntityKind::Customers,
            ChangeOperation::Update,
            payload,
        )
        .await?;
        tx.commit().await?;

        debug!(customer_id = id, "Customer updated");
        Ok(customer)
    }

    /// Removes a customer. Their purchases stay, with the customer cleared.
    pub async fn delete(&self, id: i64, store_scope: Option<i64>) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        let customer = fetch_on(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Customer", id))?;
        delete_on(&mut tx, store_scope, id).await?;
        let payload = to_payload(EntityKind::Customers, &customer)?;
        record_change(
            &mut tx,
            self.track_changes,
            EntityKind::Customers,
            ChangeOperation::Delete,
            payload,
        )
        .await?;
        tx.commit().await?;

        info!(customer_id = id, "Customer deleted");
        Ok(())
    }

    /// Everything a customer has bought, newest first.
    pub async fn history(&self, id: i64) -> DbResult<Vec<PurchaseDetail>> {
        self.get(id).await?;
        purchase::list_details(&self.pool, PurchaseFilter::Customer(id)).await
    }
}

// =============================================================================
// Statement helpers
// =============================================================================

pub(crate) async fn fetch_on(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Customer>> {
    let customer = sqlx::query_as::<_, Customer>(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM Customer WHERE CustomerID = ?1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(customer)
}

pub(crate) async fn insert_on(
    conn: &mut SqliteConnection,
    store_id: i64,
    input: &NewCustomer,
    now: DateTime<Utc>,
) -> DbResult<Customer> {
    let result = sqlx::query(
        r#"
        INSERT INTO Customer (StoreID, Name, ContactNumber, Email, Age, Gender, Address, UpdatedAt)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(store_id)
    .bind(input.name.trim())
    .bind(input.contact_number.as_deref())
    .bind(input.email.as_deref())
    .bind(input.age)
    .bind(input.gender)
    .bind(input.address.as_deref())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let id = result.last_insert_rowid();
    fetch_on(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Customer", id))
}

pub(crate) async fn update_on(
    conn: &mut SqliteConnection,
    store_scope: Option<i64>,
    id: i64,
    input: &NewCustomer,
    now: DateTime<Utc>,
) -> DbResult<Customer> {
    let result = sqlx::query(
        r#"
        UPDATE Customer SET
            Name = ?1, ContactNumber = ?2, Email = ?3, Age = ?4, Gender = ?5,
            Address = ?6, UpdatedAt = ?7
        WHERE CustomerID = ?8 AND (?9 IS NULL OR StoreID = ?9)
        "#,
    )
    .bind(input.name.trim())
    .bind(input.contact_number.as_deref())
    .bind(input.email.as_deref())
    .bind(input.age)
    .bind(input.gender)
    .bind(input.address.as_deref())
    .bind(now)
    .bind(id)
    .bind(store_scope)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Customer", id));
    }
    fetch_on(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Customer", id))
}

pub(crate) async fn delete_on(conn: &mut SqliteConnection, store_scope: Option<i64>, id: i64) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM Customer WHERE CustomerID = ?1 AND (?2 IS NULL OR StoreID = ?2)")
        .bind(id)
        .bind(store_scope)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Customer", id));
    }
    Ok(())
}

pub(crate) async fn upsert_on(
    conn: &mut SqliteConnection,
    local_id: Option<i64>,
    customer: &Customer,
) -> DbResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO Customer (CustomerID, StoreID, Name, ContactNumber, Email, Age, Gender, Address, UpdatedAt)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT (CustomerID) DO UPDATE SET
            StoreID = excluded.StoreID, Name = excluded.Name,
            ContactNumber = excluded.ContactNumber, Email = excluded.Email,
            Age = excluded.Age, Gender = excluded.Gender, Address = excluded.Address,
            UpdatedAt = excluded.UpdatedAt
        "#,
    )
    .bind(local_id)
    .bind(customer.store_id)
    .bind(&customer.name)
    .bind(customer.contact_number.as_deref())
    .bind(customer.email.as_deref())
    .bind(customer.age)
    .bind(customer.gender)
    .bind(customer.address.as_deref())
    .bind(customer.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(local_id.unwrap_or_else(|| result.last_insert_rowid()))
}

pub(crate) async fn changed_since(
    pool: &SqlitePool,
    store_id: i64,
    since: Option<DateTime<Utc>>,
) -> DbResult<Vec<Customer>> {
    let customers = sqlx::query_as::<_, Customer>(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM Customer \
         WHERE StoreID = ?1 AND (?2 IS NULL OR julianday(UpdatedAt) > julianday(?2)) \
         ORDER BY UpdatedAt, CustomerID"
    ))
    .bind(store_id)
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(customers)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use medstore_core::Gender;

    fn jane() -> NewCustomer {
        NewCustomer {
            name: "Jane Doe".to_string(),
            contact_number: Some("555-0101".to_string()),
            email: None,
            age: Some(34),
            gender: Some(Gender::Female),
            address: None,
        }
    }

    #[tokio::test]
    async fn test_customer_lifecycle() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.stores().ensure_exists(1, "Michael Medical Store", "MS001").await.unwrap();
        let repo = db.customers();

        let created = repo.create(1, &jane()).await.unwrap();
        assert_eq!(created.gender, Some(Gender::Female));
        assert_eq!(repo.list(Some(1)).await.unwrap().len(), 1);
        assert!(repo.list(Some(2)).await.unwrap().is_empty());

        let mut input = jane();
        input.age = Some(35);
        assert_eq!(repo.update(created.id, Some(1), &input).await.unwrap().age, Some(35));

        assert!(repo.history(created.id).await.unwrap().is_empty());

        repo.delete(created.id, None).await.unwrap();
        assert!(matches!(repo.get(created.id).await, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_age_out_of_range_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.stores().ensure_exists(1, "Michael Medical Store", "MS001").await.unwrap();

        let mut input = jane();
        input.age = Some(151);
        let err = db.customers().create(1, &input).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(_)));
    }
}
