//! # Operator Repository
//!
//! Staff members who record purchases at a store.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use super::purchase::{self, PurchaseFilter};
use super::{record_change, to_payload};
use crate::error::{DbError, DbResult};
use medstore_core::validation::validate_new_operator;
use medstore_core::{ChangeOperation, EntityKind, NewOperator, Operator, PurchaseDetail};

pub(crate) const OPERATOR_COLUMNS: &str =
    "OperatorID, StoreID, Name, ContactNumber, Email, Role, UpdatedAt";

/// Repository for operator operations.
#[derive(Debug, Clone)]
pub struct OperatorRepository {
    pool: SqlitePool,
    track_changes: bool,
}

impl OperatorRepository {
    pub fn new(pool: SqlitePool, track_changes: bool) -> Self {
        OperatorRepository {
            pool,
            track_changes,
        }
    }

    pub async fn create(&self, store_id: i64, input: &NewOperator) -> DbResult<Operator> {
        validate_new_operator(input)?;

        let mut tx = self.pool.begin().await?;
        let operator = insert_on(&mut tx, store_id, input, Utc::now()).await?;
        let payload = to_payload(EntityKind::Operators, &operator)?;
        record_change(
            &mut tx,
            self.track_changes,
            EntityKind::Operators,
            ChangeOperation::Insert,
            payload,
        )
        .await?;
        tx.commit().await?;

        info!(operator_id = operator.id, store_id, "Operator added");
        Ok(operator)
    }

    pub async fn get(&self, id: i64) -> DbResult<Operator> {
        let mut conn = self.pool.acquire().await?;
        fetch_on(&mut conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("Operator", id))
    }

    pub async fn list(&self, store_id: Option<i64>) -> DbResult<Vec<Operator>> {
        let operators = sqlx::query_as::<_, Operator>(&format!(
            "SELECT {OPERATOR_COLUMNS} FROM Operator \
             WHERE (?1 IS NULL OR StoreID = ?1) ORDER BY Name, OperatorID"
        ))
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(operators)
    }

    pub async fn update(&self, id: i64, store_scope: Option<i64>, input: &NewOperator) -> DbResult<Operator> {
        validate_new_operator(input)?;

        let mut tx = self.pool.begin().await?;
        let operator = update_on(&mut tx, store_scope, id, input, Utc::now()).await?;
        let payload = to_payload(EntityKind::Operators, &operator)?;
        record_change(
            &mut tx,
            self.track_changes,
            EntityKind::Operators,
            ChangeOperation::Update,
            payload,
        )
        .await?;
        tx.commit().await?;
        Ok(operator)
    }

    pub async fn delete(&self, id: i64, store_scope: Option<i64>) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        let operator = fetch_on(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Operator", id))?;
        delete_on(&mut tx, store_scope, id).await?;
        let payload = to_payload(EntityKind::Operators, &operator)?;
        record_change(
            &mut tx,
            self.track_changes,
            EntityKind::Operators,
            ChangeOperation::Delete,
            payload,
        )
        .await?;
        tx.commit().await?;

        info!(operator_id = id, "Operator deleted");
        Ok(())
    }

    /// Purchases an operator has recorded, newest first.
    pub async fn activity(&self, id: i64) -> DbResult<Vec<PurchaseDetail>> {
        self.get(id).await?;
        purchase::list_details(&self.pool, PurchaseFilter::Operator(id)).await
    }
}

// =============================================================================
// Statement helpers
// =============================================================================

pub(crate) async fn fetch_on(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Operator>> {
    let operator = sqlx::query_as::<_, Operator>(&format!(
        "SELECT {OPERATOR_COLUMNS} FROM Operator WHERE OperatorID = ?1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(operator)
}

pub(crate) async fn insert_on(
    conn: &mut SqliteConnection,
    store_id: i64,
    input: &NewOperator,
    now: DateTime<Utc>,
) -> DbResult<Operator> {
    let result = sqlx::query(
        r#"
        INSERT INTO Operator (StoreID, Name, ContactNumber, Email, Role, UpdatedAt)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(store_id)
    .bind(input.name.trim())
    .bind(input.contact_number.as_deref())
    .bind(input.email.as_deref())
    .bind(input.role.as_deref())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let id = result.last_insert_rowid();
    fetch_on(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Operator", id))
}

pub(crate) async fn update_on(
    conn: &mut SqliteConnection,
    store_scope: Option<i64>,
    id: i64,
    input: &NewOperator,
    now: DateTime<Utc>,
) -> DbResult<Operator> {
    let result = sqlx::query(
        r#"
        UPDATE Operator SET Name = ?1, ContactNumber = ?2, Email = ?3, Role = ?4, UpdatedAt = ?5
        WHERE OperatorID = ?6 AND (?7 IS NULL OR StoreID = ?7)
        "#,
    )
    .bind(input.name.trim())
    .bind(input.contact_number.as_deref())
    .bind(input.email.as_deref())
    .bind(input.role.as_deref())
    .bind(now)
    .bind(id)
    .bind(store_scope)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Operator", id));
    }
    fetch_on(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Operator", id))
}

pub(crate) async fn delete_on(conn: &mut SqliteConnection, store_scope: Option<i64>, id: i64) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM Operator WHERE OperatorID = ?1 AND (?2 IS NULL OR StoreID = ?2)")
        .bind(id)
        .bind(store_scope)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Operator", id));
    }
    Ok(())
}

pub(crate) async fn upsert_on(
    conn: &mut SqliteConnection,
    local_id: Option<i64>,
    operator: &Operator,
) -> DbResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO Operator (OperatorID, StoreID, Name, ContactNumber, Email, Role, UpdatedAt)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT (OperatorID) DO UPDATE SET
            StoreID = excluded.StoreID, Name = excluded.Name,
            ContactNumber = excluded.ContactNumber, Email = excluded.Email,
            Role = excluded.Role, UpdatedAt = excluded.UpdatedAt
        "#,
    )
    .bind(local_id)
    .bind(operator.store_id)
    .bind(&operator.name)
    .bind(operator.contact_number.as_deref())
    .bind(operator.email.as_deref())
    .bind(operator.role.as_deref())
    .bind(operator.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(local_id.unwrap_or_else(|| result.last_insert_rowid()))
}

pub(crate) async fn changed_since(
    pool: &SqlitePool,
    store_id: i64,
    since: Option<DateTime<Utc>>,
) -> DbResult<Vec<Operator>> {
    let operators = sqlx::query_as::<_, Operator>(&format!(
        "SELECT {OPERATOR_COLUMNS} FROM Operator \
         WHERE StoreID = ?1 AND (?2 IS NULL OR julianday(UpdatedAt) > julianday(?2)) \
         ORDER BY UpdatedAt, OperatorID"
    ))
    .bind(store_id)
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(operators)
}
