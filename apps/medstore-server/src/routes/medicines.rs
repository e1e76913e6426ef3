//! Medicine routes: stock maintenance plus the low-stock and expiry views.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::{NaiveDate, Utc};
use medstore_core::{Medicine, Money, NewMedicine, EXPIRY_WINDOW_DAYS, LOW_STOCK_THRESHOLD};
use serde::Deserialize;

use super::{non_empty, parse_date, parse_flag, parse_optional, Ack, StoreQuery, StoreScopeForm};
use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/medicines", get(list))
        .route("/medicines/add", post(add))
        .route("/medicines/batch/add", post(add_batch))
        .route("/medicines/low-stock", get(low_stock))
        .route("/medicines/expiring", get(expiring))
        .route("/medicines/{id}/update", post(update))
        .route("/medicines/{id}/delete", post(delete))
}

// =============================================================================
// Inputs
// =============================================================================

#[derive(Debug, Deserialize)]
struct MedicineForm {
    store_id: i64,
    name: String,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    batch_number: Option<String>,
    #[serde(default)]
    expiry_date: Option<String>,
    /// Decimal amount, e.g. `12.50`
    price: String,
    stock_quantity: i64,
    #[serde(default, alias = "type")]
    medicine_type: Option<String>,
    #[serde(default)]
    requires_prescription: Option<String>,
    #[serde(default)]
    schedule_category: Option<String>,
    #[serde(default)]
    storage_location_id: Option<String>,
}

impl MedicineForm {
    fn into_input(self) -> Result<(i64, NewMedicine), ApiError> {
        let input = NewMedicine {
            name: self.name,
            brand: non_empty(self.brand),
            description: non_empty(self.description),
            batch_number: non_empty(self.batch_number),
            expiry_date: parse_date("expiry_date", self.expiry_date)?,
            price_cents: Money::parse(&self.price)?,
            stock_quantity: self.stock_quantity,
            medicine_type: non_empty(self.medicine_type),
            requires_prescription: parse_flag(self.requires_prescription),
            schedule_category: non_empty(self.schedule_category),
            storage_location_id: parse_optional("storage_location_id", self.storage_location_id)?,
        };
        Ok((self.store_id, input))
    }
}

/// Batch form: `medicines` is a JSON array.
#[derive(Debug, Deserialize)]
struct BatchForm {
    store_id: i64,
    medicines: String,
}

/// Price as a JSON number (`12.5`) or string (`"12.50"`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum PriceInput {
    Number(f64),
    Text(String),
}

impl PriceInput {
    pub(super) fn to_money(&self) -> Result<Money, ApiError> {
        let money = match self {
            PriceInput::Number(n) => Money::parse(&format!("{:.2}", n))?,
            PriceInput::Text(s) => Money::parse(s)?,
        };
        Ok(money)
    }
}

#[derive(Debug, Deserialize)]
struct BatchMedicine {
    name: String,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    batch_number: Option<String>,
    #[serde(default)]
    expiry_date: Option<NaiveDate>,
    price: PriceInput,
    stock_quantity: i64,
    #[serde(default, alias = "type")]
    medicine_type: Option<String>,
    #[serde(default)]
    requires_prescription: bool,
    #[serde(default)]
    schedule_category: Option<String>,
}

impl BatchMedicine {
    fn into_input(self) -> Result<NewMedicine, ApiError> {
        Ok(NewMedicine {
            price_cents: self.price.to_money()?,
            name: self.name,
            brand: self.brand,
            description: self.description,
            batch_number: self.batch_number,
            expiry_date: self.expiry_date,
            stock_quantity: self.stock_quantity,
            medicine_type: self.medicine_type,
            requires_prescription: self.requires_prescription,
            schedule_category: self.schedule_category,
            storage_location_id: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LowStockQuery {
    #[serde(default)]
    store_id: Option<i64>,
    #[serde(default)]
    threshold: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ExpiringQuery {
    #[serde(default)]
    store_id: Option<i64>,
    #[serde(default)]
    days: Option<i64>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn list(
    State(state): State<AppState>,
    Query(query): Query<StoreQuery>,
) -> Result<Json<Vec<Medicine>>, ApiError> {
    Ok(Json(state.db.medicines().list(query.store_id).await?))
}

async fn add(
    State(state): State<AppState>,
    Form(form): Form<MedicineForm>,
) -> Result<(StatusCode, Json<Medicine>), ApiError> {
    let (store_id, input) = form.into_input()?;
    let medicine = state.db.medicines().create(store_id, &input).await?;
    Ok((StatusCode::CREATED, Json(medicine)))
}

async fn add_batch(
    State(state): State<AppState>,
    Form(form): Form<BatchForm>,
) -> Result<(StatusCode, Json<Vec<Medicine>>), ApiError> {
    let rows: Vec<BatchMedicine> = serde_json::from_str(&form.medicines)
        .map_err(|e| ApiError::bad_request(format!("medicines must be a JSON array: {}", e)))?;
    let inputs = rows
        .into_iter()
        .map(BatchMedicine::into_input)
        .collect::<Result<Vec<_>, _>>()?;

    let created = state.db.medicines().create_batch(form.store_id, &inputs).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Form(form): Form<MedicineForm>,
) -> Result<Json<Medicine>, ApiError> {
    let (store_id, input) = form.into_input()?;
    Ok(Json(state.db.medicines().update(id, Some(store_id), &input).await?))
}

async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Form(form): Form<StoreScopeForm>,
) -> Result<Json<Ack>, ApiError> {
    state.db.medicines().delete(id, Some(form.store_id)).await?;
    Ok(Ack::success(format!("Medicine {} deleted", id)))
}

async fn low_stock(
    State(state): State<AppState>,
    Query(query): Query<LowStockQuery>,
) -> Result<Json<Vec<Medicine>>, ApiError> {
    let threshold = query.threshold.unwrap_or(LOW_STOCK_THRESHOLD);
    Ok(Json(state.db.medicines().low_stock(query.store_id, threshold).await?))
}

async fn expiring(
    State(state): State<AppState>,
    Query(query): Query<ExpiringQuery>,
) -> Result<Json<Vec<Medicine>>, ApiError> {
    let days = query.days.unwrap_or(EXPIRY_WINDOW_DAYS);
    let today = Utc::now().date_naive();
    Ok(Json(state.db.medicines().expiring(query.store_id, today, days).await?))
}
