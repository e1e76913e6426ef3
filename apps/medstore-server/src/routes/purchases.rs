//! Purchase routes: recording sales and the daily sales report.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::{NaiveDate, Utc};
use medstore_core::{DailyReport, Money, NewPurchase, NewPurchaseItem, PurchaseDetail};
use medstore_db::PurchaseFilter;
use serde::Deserialize;

use super::medicines::PriceInput;
use super::{non_empty, parse_optional, StoreQuery};
use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/purchases", get(list))
        .route("/purchases/add", post(add))
        .route("/purchases/daily-report", get(daily_report))
        .route("/purchases/{id}", get(detail))
}

/// Sale form. `items` is a JSON array of
/// `{"medicine_id": 1, "quantity": 2, "price": 12.5}`; `price` is optional.
#[derive(Debug, Deserialize)]
struct PurchaseForm {
    store_id: i64,
    #[serde(default)]
    customer_id: Option<String>,
    #[serde(default)]
    operator_id: Option<String>,
    items: String,
    #[serde(default, alias = "total_amount")]
    total: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PurchaseLine {
    medicine_id: i64,
    quantity: i64,
    #[serde(default, alias = "price_per_unit")]
    price: Option<PriceInput>,
}

impl PurchaseLine {
    fn into_item(self) -> Result<NewPurchaseItem, ApiError> {
        Ok(NewPurchaseItem {
            medicine_id: self.medicine_id,
            quantity: self.quantity,
            price_per_unit_cents: self.price.as_ref().map(PriceInput::to_money).transpose()?,
        })
    }
}

impl PurchaseForm {
    fn into_input(self) -> Result<(i64, NewPurchase), ApiError> {
        let lines: Vec<PurchaseLine> = serde_json::from_str(&self.items)
            .map_err(|e| ApiError::bad_request(format!("items must be a JSON array: {}", e)))?;
        let items = lines
            .into_iter()
            .map(PurchaseLine::into_item)
            .collect::<Result<Vec<_>, _>>()?;

        let total_cents = non_empty(self.total)
            .map(|t| Money::parse(&t))
            .transpose()?;

        let input = NewPurchase {
            customer_id: parse_optional("customer_id", self.customer_id)?,
            operator_id: parse_optional("operator_id", self.operator_id)?,
            date_of_purchase: None,
            total_cents,
            items,
        };
        Ok((self.store_id, input))
    }
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    #[serde(default)]
    date: Option<NaiveDate>,
    #[serde(default)]
    store_id: Option<i64>,
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<StoreQuery>,
) -> Result<Json<Vec<PurchaseDetail>>, ApiError> {
    let filter = match query.store_id {
        Some(id) => PurchaseFilter::Store(id),
        None => PurchaseFilter::All,
    };
    Ok(Json(state.db.purchases().list(filter).await?))
}

async fn add(
    State(state): State<AppState>,
    Form(form): Form<PurchaseForm>,
) -> Result<(StatusCode, Json<PurchaseDetail>), ApiError> {
    let (store_id, input) = form.into_input()?;
    let detail = state.db.purchases().create(store_id, &input).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PurchaseDetail>, ApiError> {
    Ok(Json(state.db.purchases().get(id).await?))
}

/// Defaults to today (UTC) across all stores.
async fn daily_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<DailyReport>, ApiError> {
    let date = query.date.unwrap_or_else(|| Utc::now().date_naive());
    Ok(Json(state.db.purchases().daily_report(date, query.store_id).await?))
}
