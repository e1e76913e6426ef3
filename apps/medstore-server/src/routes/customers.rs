//! Customer routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use medstore_core::{Customer, Gender, NewCustomer, PurchaseDetail};
use serde::Deserialize;

use super::{non_empty, parse_optional, Ack, StoreQuery, StoreScopeForm};
use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/customers", get(list))
        .route("/customers/add", post(add))
        .route("/customers/{id}/update", post(update))
        .route("/customers/{id}/delete", post(delete))
        .route("/customers/{id}/history", get(history))
}

#[derive(Debug, Deserialize)]
struct CustomerForm {
    store_id: i64,
    name: String,
    #[serde(default)]
    contact_number: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    age: Option<String>,
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

impl CustomerForm {
    fn into_input(self) -> Result<(i64, NewCustomer), ApiError> {
        let input = NewCustomer {
            name: self.name,
            contact_number: non_empty(self.contact_number),
            email: non_empty(self.email),
            age: parse_optional::<i64>("age", self.age)?,
            gender: parse_optional::<Gender>("gender", self.gender)?,
            address: non_empty(self.address),
        };
        Ok((self.store_id, input))
    }
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<StoreQuery>,
) -> Result<Json<Vec<Customer>>, ApiError> {
    Ok(Json(state.db.customers().list(query.store_id).await?))
}

async fn add(
    State(state): State<AppState>,
    Form(form): Form<CustomerForm>,
) -> Result<(StatusCode, Json<Customer>), ApiError> {
    let (store_id, input) = form.into_input()?;
    let customer = state.db.customers().create(store_id, &input).await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Form(form): Form<CustomerForm>,
) -> Result<Json<Customer>, ApiError> {
    let (store_id, input) = form.into_input()?;
    Ok(Json(state.db.customers().update(id, Some(store_id), &input).await?))
}

async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Form(form): Form<StoreScopeForm>,
) -> Result<Json<Ack>, ApiError> {
    state.db.customers().delete(id, Some(form.store_id)).await?;
    Ok(Ack::success(format!("Customer {} deleted", id)))
}

async fn history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<PurchaseDetail>>, ApiError> {
    Ok(Json(state.db.customers().history(id).await?))
}
