//! Operator (counter staff) routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use medstore_core::{NewOperator, Operator, PurchaseDetail};
use serde::Deserialize;

use super::{non_empty, Ack, StoreQuery, StoreScopeForm};
use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/operators", get(list))
        .route("/operators/add", post(add))
        .route("/operators/{id}/update", post(update))
        .route("/operators/{id}/delete", post(delete))
        .route("/operators/{id}/activity", get(activity))
}

#[derive(Debug, Deserialize)]
struct OperatorForm {
    store_id: i64,
    name: String,
    #[serde(default)]
    contact_number: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

impl OperatorForm {
    fn into_input(self) -> (i64, NewOperator) {
        let input = NewOperator {
            name: self.name,
            contact_number: non_empty(self.contact_number),
            email: non_empty(self.email),
            role: non_empty(self.role),
        };
        (self.store_id, input)
    }
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<StoreQuery>,
) -> Result<Json<Vec<Operator>>, ApiError> {
    Ok(Json(state.db.operators().list(query.store_id).await?))
}

async fn add(
    State(state): State<AppState>,
    Form(form): Form<OperatorForm>,
) -> Result<(StatusCode, Json<Operator>), ApiError> {
    let (store_id, input) = form.into_input();
    let operator = state.db.operators().create(store_id, &input).await?;
    Ok((StatusCode::CREATED, Json(operator)))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Form(form): Form<OperatorForm>,
) -> Result<Json<Operator>, ApiError> {
    let (store_id, input) = form.into_input();
    Ok(Json(state.db.operators().update(id, Some(store_id), &input).await?))
}

async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Form(form): Form<StoreScopeForm>,
) -> Result<Json<Ack>, ApiError> {
    state.db.operators().delete(id, Some(form.store_id)).await?;
    Ok(Ack::success(format!("Operator {} deleted", id)))
}

/// Sales an operator has rung up.
async fn activity(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<PurchaseDetail>>, ApiError> {
    Ok(Json(state.db.operators().activity(id).await?))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_operator_lifecycle() {
        let (app, _) = test_app().await;

        let (status, operator) = post_form(
            &app,
            "/operators/add",
            "store_id=2&name=Bilal&role=Cashier&contact_number=0300-1234567",
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(operator["store_id"], 2);
        let id = operator["id"].as_i64().unwrap();

        // Wrong store scope
        let (status, _) = post_form(
            &app,
            &format!("/operators/{}/update", id),
            "store_id=1&name=Bilal&role=Manager",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, updated) = post_form(
            &app,
            &format!("/operators/{}/update", id),
            "store_id=2&name=Bilal&role=Manager",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["role"], "Manager");

        let (_, only_store_1) = get(&app, "/operators?store_id=1").await;
        assert!(only_store_1.as_array().unwrap().is_empty());

        let (status, activity) = get(&app, &format!("/operators/{}/activity", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(activity.as_array().unwrap().is_empty());

        let (status, _) = post_form(&app, &format!("/operators/{}/delete", id), "store_id=2").await;
        assert_eq!(status, StatusCode::OK);
        let (_, all) = get(&app, "/operators").await;
        assert!(all.as_array().unwrap().is_empty());
    }
}
