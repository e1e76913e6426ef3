//! Store routes: registration, dashboard and per-store listings.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use medstore_core::{
    Customer, Medicine, NewStore, Operator, PurchaseDetail, Store, StoreDashboard,
    LOW_STOCK_THRESHOLD,
};
use medstore_db::PurchaseFilter;
use serde::Deserialize;

use super::{non_empty, parse_date};
use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stores", get(list))
        .route("/stores/add", post(add))
        .route("/stores/{id}", get(dashboard))
        .route("/stores/{id}/medicines", get(medicines))
        .route("/stores/{id}/customers", get(customers))
        .route("/stores/{id}/operators", get(operators))
        .route("/stores/{id}/purchases", get(purchases))
}

#[derive(Debug, Deserialize)]
struct StoreForm {
    store_name: String,
    address: String,
    #[serde(default)]
    contact_number: Option<String>,
    license_number: String,
    #[serde(default)]
    opening_date: Option<String>,
}

async fn list(State(state): State<AppState>) -> Result<Json<Vec<Store>>, ApiError> {
    Ok(Json(state.db.stores().list().await?))
}

async fn add(
    State(state): State<AppState>,
    Form(form): Form<StoreForm>,
) -> Result<(StatusCode, Json<Store>), ApiError> {
    let input = NewStore {
        store_name: form.store_name,
        address: form.address,
        contact_number: non_empty(form.contact_number),
        license_number: form.license_number,
        opening_date: parse_date("opening_date", form.opening_date)?,
    };
    let store = state.db.stores().create(&input).await?;
    Ok((StatusCode::CREATED, Json(store)))
}

async fn dashboard(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<StoreDashboard>, ApiError> {
    Ok(Json(state.db.stores().dashboard(id, LOW_STOCK_THRESHOLD).await?))
}

async fn medicines(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Medicine>>, ApiError> {
    state.db.stores().get(id).await?;
    Ok(Json(state.db.medicines().list(Some(id)).await?))
}

async fn customers(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Customer>>, ApiError> {
    state.db.stores().get(id).await?;
    Ok(Json(state.db.customers().list(Some(id)).await?))
}

async fn operators(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Operator>>, ApiError> {
    state.db.stores().get(id).await?;
    Ok(Json(state.db.operators().list(Some(id)).await?))
}

async fn purchases(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<PurchaseDetail>>, ApiError> {
    state.db.stores().get(id).await?;
    Ok(Json(state.db.purchases().list(PurchaseFilter::Store(id)).await?))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_add_and_dashboard() {
        let (app, _) = test_app().await;

        let (status, store) = post_form(
            &app,
            "/stores/add",
            "store_name=Bob+Medical+Store&address=12+Main+Rd&contact_number=&license_number=MS003",
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(store["store_name"], "Bob Medical Store");
        assert!(store["contact_number"].is_null());

        let uri = format!("/stores/{}", store["id"]);
        let (status, dashboard) = get(&app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(dashboard["total_medicines"], 0);

        let (status, list) = get(&app, "/stores").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_license_conflicts() {
        let (app, _) = test_app().await;
        let (status, body) = post_form(
            &app,
            "/stores/add",
            "store_name=Copy&address=Somewhere&license_number=MS001",
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "conflict");
    }

    #[tokio::test]
    async fn test_unknown_store_is_not_found() {
        let (app, _) = test_app().await;
        let (status, _) = get(&app, "/stores/404/medicines").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
