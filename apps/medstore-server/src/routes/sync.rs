//! # Sync Endpoints
//!
//! Server side of the store sync protocol.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  POST /sync/connect   {store_id, store_name?, license_number?}          │
//! │     400 store_id missing · 401 unknown store / license mismatch          │
//! │     200 {access_token, token_type: "bearer", expires_in, last_sync}     │
//! │                                                                         │
//! │  ── below: Authorization: Bearer <token>, else 401 "Invalid token" ──   │
//! │                                                                         │
//! │  GET  /sync/changes?last_sync=<wm>   (or since=; last_sync wins)        │
//! │     ChangeSet of the token's store, rows with UpdatedAt > wm;           │
//! │     absent / "" / "Never" → full snapshot · unparseable → 400           │
//! │                                                                         │
//! │  POST /sync/push  {changes: ChangeSet}                                  │
//! │     one transaction, writes scoped to the token's store;                │
//! │     a row of another store → 404 and nothing is applied                 │
//! │     200 {status, message, assigned: [{table, local_id, id}], synced_at} │
//! │                                                                         │
//! │  GET  /sync/status                                                      │
//! │     {store_id, store_name, last_sync, counts}                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The store a request acts on always comes from the token, never from the
//! body.

use axum::extract::{Query, State};
use axum::middleware;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use medstore_core::changes::{
    ChangesQuery, ConnectRequest, ConnectResponse, PushRequest, PushResponse, SyncStatusReport,
};
use medstore_core::{ChangeSet, Watermark};
use tracing::{info, warn};

use crate::auth::{require_store_token, Claims};
use crate::error::ApiError;
use crate::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/changes", get(changes))
        .route("/push", post(push))
        .route("/status", get(status))
        .route_layer(middleware::from_fn_with_state(state, require_store_token));

    Router::new().route("/connect", post(connect)).merge(protected)
}

async fn connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let store_id = request
        .store_id
        .ok_or_else(|| ApiError::bad_request("store_id is required"))?;
    let license = request.license_number.as_deref().unwrap_or_default();

    let Some(store) = state.db.stores().authenticate(store_id, license).await? else {
        warn!(store_id, "Store connect rejected");
        return Err(ApiError::InvalidCredentials);
    };

    let access_token = state.jwt.issue(store.id)?;
    let last_sync = state.db.sync_state().store_last_sync(store.id).await?;

    info!(store_id = store.id, store = %store.store_name, %last_sync, "Store connected");
    Ok(Json(ConnectResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in: state.jwt.lifetime_secs(),
        last_sync,
    }))
}

async fn changes(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<ChangeSet>, ApiError> {
    let since: Watermark = query
        .watermark()
        .unwrap_or_default()
        .parse()
        .map_err(|e| ApiError::bad_request(format!("Invalid last_sync: {}", e)))?;

    let changes = state.db.replication().changes_since(claims.store_id, since).await?;
    info!(store_id = claims.store_id, %since, records = changes.len(), "Changes served");
    Ok(Json(changes))
}

async fn push(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>, ApiError> {
    let outcome = state
        .db
        .replication()
        .apply_push(claims.store_id, &request.changes)
        .await?;

    Ok(Json(PushResponse {
        status: "success".to_string(),
        message: format!("Applied {} changes", outcome.applied),
        assigned: outcome.assigned,
        synced_at: Some(outcome.synced_at),
    }))
}

async fn status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SyncStatusReport>, ApiError> {
    let store = state.db.stores().get(claims.store_id).await?;
    let counts = state.db.stores().entity_counts(store.id).await?;
    let last_sync = state.db.sync_state().store_last_sync(store.id).await?;

    Ok(Json(SyncStatusReport {
        store_id: store.id,
        store_name: store.store_name,
        last_sync,
        counts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtManager;
    use crate::routes::test_support::*;
    use axum::http::{Method, StatusCode};
    use chrono::{TimeZone, Utc};
    use medstore_core::{Money, NewMedicine};
    use serde_json::{json, Value};

    async fn token_for(app: &Router, store_id: i64, license: &str) -> String {
        let (status, body) = send(
            app,
            Method::POST,
            "/sync/connect",
            None,
            Some((
                "application/json",
                json!({"store_id": store_id, "license_number": license}).to_string(),
            )),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["access_token"].as_str().unwrap().to_string()
    }

    fn medicine(name: &str) -> NewMedicine {
        NewMedicine {
            name: name.to_string(),
            brand: None,
            description: None,
            batch_number: None,
            expiry_date: None,
            price_cents: Money::from_cents(500),
            stock_quantity: 20,
            medicine_type: None,
            requires_prescription: false,
            schedule_category: None,
            storage_location_id: None,
        }
    }

    #[tokio::test]
    async fn test_connect_validation() {
        let (app, _) = test_app().await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/sync/connect",
            None,
            Some(("application/json", json!({"store_name": "x"}).to_string())),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        for body in [
            json!({"store_id": 1, "license_number": "MS002"}),
            json!({"store_id": 99, "license_number": "MS001"}),
            json!({"store_id": 1}),
        ] {
            let (status, _) = send(
                &app,
                Method::POST,
                "/sync/connect",
                None,
                Some(("application/json", body.to_string())),
            )
            .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/sync/connect",
            None,
            Some((
                "application/json",
                json!({"store_id": 1, "license_number": "MS001"}).to_string(),
            )),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");
        assert_eq!(body["expires_in"], 3600);
        assert_eq!(body["last_sync"], "Never");
    }

    #[tokio::test]
    async fn test_token_failures_are_uniform() {
        let (app, _) = test_app().await;

        let forged = JwtManager::new("some-other-secret-some-other-secret", 3600)
            .issue(1)
            .unwrap();
        let expired_issuer = JwtManager::new(SECRET, -3600);
        let expired = expired_issuer.issue(1).unwrap();

        let mut bodies = Vec::new();
        for token in [None, Some(forged.as_str()), Some(expired.as_str()), Some("garbage")] {
            let (status, body) = send(&app, Method::GET, "/sync/changes", token, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            bodies.push(body);
        }
        assert!(bodies.iter().all(|b| b == &bodies[0]));
        assert_eq!(bodies[0]["error"]["message"], "Invalid token");
    }

    #[tokio::test]
    async fn test_changes_since_watermark() {
        let (app, state) = test_app().await;
        let meds = state.db.medicines();
        let old = meds.create(1, &medicine("Old stock")).await.unwrap();
        let new = meds.create(1, &medicine("New stock")).await.unwrap();
        meds.create(2, &medicine("Other store")).await.unwrap();

        for (id, at) in [
            (old.id, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()),
            (new.id, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
        ] {
            sqlx::query("UPDATE Medicine SET UpdatedAt = ?1 WHERE MedicineID = ?2")
                .bind(at)
                .bind(id)
                .execute(state.db.pool())
                .await
                .unwrap();
        }

        let token = token_for(&app, 1, "MS001").await;

        let (status, body) =
            send(&app, Method::GET, "/sync/changes?since=2024-01-01", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body["medicines"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["New stock"]);

        // No watermark: full snapshot of the token's store only.
        let (_, body) = send(&app, Method::GET, "/sync/changes", Some(&token), None).await;
        assert_eq!(body["medicines"].as_array().unwrap().len(), 2);

        let (status, _) =
            send(&app, Method::GET, "/sync/changes?last_sync=someday", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_both_watermark_keys_prefer_last_sync() {
        let (app, state) = test_app().await;
        let meds = state.db.medicines();
        let mid = meds.create(1, &medicine("Mid stock")).await.unwrap();
        sqlx::query("UPDATE Medicine SET UpdatedAt = ?1 WHERE MedicineID = ?2")
            .bind(Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap())
            .bind(mid.id)
            .execute(state.db.pool())
            .await
            .unwrap();
        let token = token_for(&app, 1, "MS001").await;

        let (status, body) = send(
            &app,
            Method::GET,
            "/sync/changes?since=2023-01-01&last_sync=2024-01-01",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["medicines"].as_array().unwrap().is_empty());

        let (_, body) =
            send(&app, Method::GET, "/sync/changes?since=2023-01-01", Some(&token), None).await;
        assert_eq!(body["medicines"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_push_is_scoped_to_token_store() {
        let (app, state) = test_app().await;
        let token = token_for(&app, 1, "MS001").await;

        let body = json!({"changes": {"medicines": [
            {"store_id": 2, "name": "Ibuprofen", "price_cents": 300, "stock_quantity": 12}
        ]}});
        let (status, response) = send(
            &app,
            Method::POST,
            "/sync/push",
            Some(&token),
            Some(("application/json", body.to_string())),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["message"], "Applied 1 changes");
        assert!(response["assigned"].as_array().unwrap().is_empty());
        assert!(response["synced_at"].is_string());

        let store1 = state.db.medicines().list(Some(1)).await.unwrap();
        assert_eq!(store1.len(), 1);
        assert_eq!(store1[0].name, "Ibuprofen");
        assert!(state.db.medicines().list(Some(2)).await.unwrap().is_empty());

        let (_, status_body) = send(&app, Method::GET, "/sync/status", Some(&token), None).await;
        assert_eq!(status_body["store_id"], 1);
        assert_eq!(status_body["counts"]["medicines"], 1);
        assert_ne!(status_body["last_sync"], Value::from("Never"));
    }

    #[tokio::test]
    async fn test_push_echoes_assigned_ids() {
        let (app, state) = test_app().await;
        // Store 2 already owns central row 1.
        let theirs = state.db.medicines().create(2, &medicine("Theirs")).await.unwrap();
        let token = token_for(&app, 1, "MS001").await;

        let body = json!({"changes": {"medicines": [
            {"local_id": theirs.id, "name": "Mine", "price_cents": 300, "stock_quantity": 12}
        ]}});
        let (status, response) = send(
            &app,
            Method::POST,
            "/sync/push",
            Some(&token),
            Some(("application/json", body.to_string())),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let assigned = &response["assigned"][0];
        assert_eq!(assigned["table"], "medicines");
        assert_eq!(assigned["local_id"], theirs.id);
        let central_id = assigned["id"].as_i64().unwrap();
        assert_ne!(central_id, theirs.id);

        let mine = state.db.medicines().get(central_id).await.unwrap();
        assert_eq!(mine.store_id, 1);
        let synced_at: chrono::DateTime<Utc> = serde_json::from_value(response["synced_at"].clone()).unwrap();
        assert_eq!(mine.updated_at, synced_at);
        assert_eq!(state.db.medicines().get(theirs.id).await.unwrap().name, "Theirs");
    }

    #[tokio::test]
    async fn test_push_of_foreign_row_rolls_back() {
        let (app, state) = test_app().await;
        let foreign = state.db.medicines().create(2, &medicine("Theirs")).await.unwrap();
        let token = token_for(&app, 1, "MS001").await;

        let body = json!({"changes": {"medicines": [
            {"name": "Mine", "price_cents": 100, "stock_quantity": 1},
            {"id": foreign.id, "name": "Hijacked", "price_cents": 100, "stock_quantity": 1}
        ]}});
        let (status, _) = send(
            &app,
            Method::POST,
            "/sync/push",
            Some(&token),
            Some(("application/json", body.to_string())),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert!(state.db.medicines().list(Some(1)).await.unwrap().is_empty());
        assert_eq!(state.db.medicines().get(foreign.id).await.unwrap().name, "Theirs");
    }
}
