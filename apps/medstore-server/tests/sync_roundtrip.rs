//! A store database syncing with a central server over real HTTP.

use medstore_core::{ConflictPolicy, Money, NewMedicine, NewPurchase, NewPurchaseItem};
use medstore_db::{Database, DbConfig, PurchaseFilter};
use medstore_server::{router, AppState, ServerConfig};
use medstore_sync::{ConnectionState, SyncConfig, SyncManager};
use tokio::net::TcpListener;

fn medicine(name: &str, stock: i64) -> NewMedicine {
    NewMedicine {
        name: name.to_string(),
        brand: None,
        description: None,
        batch_number: None,
        expiry_date: None,
        price_cents: Money::from_cents(1250),
        stock_quantity: stock,
        medicine_type: Some("Tablet".to_string()),
        requires_prescription: false,
        schedule_category: None,
        storage_location_id: None,
    }
}

/// Serves a central server on an ephemeral port and returns its base URL.
async fn start_central(db: Database) -> String {
    let config = ServerConfig {
        database_path: ":memory:".into(),
        bind_addr: "127.0.0.1:0".into(),
        log_level: "debug".into(),
        app_name: "Central".into(),
        jwt_secret: "roundtrip-secret-roundtrip-secret".into(),
        token_lifetime_secs: 3600,
        sync_config: None,
    };
    let app = router(AppState::new(db, config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Central with stores 1 and 2 registered, serving over HTTP.
async fn central_with_stores() -> (Database, String) {
    let central = Database::new(DbConfig::in_memory()).await.unwrap();
    central.stores().ensure_exists(1, "Michael Medical Store", "MS001").await.unwrap();
    central.stores().ensure_exists(2, "Jackson Medical Store", "MS002").await.unwrap();
    let url = start_central(central.clone()).await;
    (central, url)
}

/// Store 1's database and a remote-wins sync client for it.
async fn store_client(url: String) -> (Database, SyncManager) {
    let store = Database::new(DbConfig::in_memory().track_changes(true)).await.unwrap();
    store.stores().ensure_exists(1, "Michael Medical Store", "MS001").await.unwrap();

    let mut config = SyncConfig::default();
    config.store.store_id = 1;
    config.store.store_name = "Michael Medical Store".to_string();
    config.store.license_number = "MS001".to_string();
    config.server.url = url;
    config.server.request_timeout_secs = 5;
    config.sync.conflict_policy = ConflictPolicy::RemoteWins;
    let manager = SyncManager::new(config, store.clone()).unwrap();
    (store, manager)
}

async fn sorted_names(db: &Database, store_id: i64) -> Vec<String> {
    let mut names: Vec<String> = db
        .medicines()
        .list(Some(store_id))
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    names.sort();
    names
}

async fn stock(db: &Database, store_id: i64, name: &str) -> i64 {
    db.medicines()
        .list(Some(store_id))
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.name == name)
        .map(|m| m.stock_quantity)
        .unwrap()
}

#[tokio::test]
async fn test_store_and_central_converge() {
    let central = Database::new(DbConfig::in_memory()).await.unwrap();
    central
        .stores()
        .ensure_exists(1, "Michael Medical Store", "MS001")
        .await
        .unwrap();
    let url = start_central(central.clone()).await;

    let store = Database::new(DbConfig::in_memory().track_changes(true))
        .await
        .unwrap();
    store
        .stores()
        .ensure_exists(1, "Michael Medical Store", "MS001")
        .await
        .unwrap();

    let mut config = SyncConfig::default();
    config.store.store_id = 1;
    config.store.store_name = "Michael Medical Store".to_string();
    config.store.license_number = "MS001".to_string();
    config.server.url = url;
    config.server.request_timeout_secs = 5;
    let manager = SyncManager::new(config, store.clone()).unwrap();

    // Store -> central
    store.medicines().create(1, &medicine("Paracetamol", 40)).await.unwrap();
    assert_eq!(store.change_queue().count().await.unwrap(), 1);

    manager.sync_changes().await.unwrap();

    let pushed = central.medicines().list(Some(1)).await.unwrap();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].name, "Paracetamol");
    assert_eq!(pushed[0].price_cents, Money::from_cents(1250));
    assert_eq!(store.change_queue().count().await.unwrap(), 0);

    let status = manager.status().await;
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.pending_changes, 0);
    assert!(!status.last_sync.is_never());

    // Central -> store
    central.medicines().create(1, &medicine("Azithromycin", 12)).await.unwrap();

    manager.sync_changes().await.unwrap();

    let local = store.medicines().list(Some(1)).await.unwrap();
    let mut names: Vec<&str> = local.iter().map(|m| m.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["Azithromycin", "Paracetamol"]);
    // Pulled rows are not queued back.
    assert_eq!(store.change_queue().count().await.unwrap(), 0);
    assert_eq!(manager.status().await.cycles_ok, 2);
}

#[tokio::test]
async fn test_wrong_license_stays_disconnected() {
    let central = Database::new(DbConfig::in_memory()).await.unwrap();
    central
        .stores()
        .ensure_exists(1, "Michael Medical Store", "MS001")
        .await
        .unwrap();
    let url = start_central(central).await;

    let store = Database::new(DbConfig::in_memory().track_changes(true))
        .await
        .unwrap();
    store.stores().ensure_exists(1, "Michael Medical Store", "MS001").await.unwrap();
    store.medicines().create(1, &medicine("Paracetamol", 40)).await.unwrap();

    let mut config = SyncConfig::default();
    config.store.license_number = "WRONG".to_string();
    config.server.url = url;
    let manager = SyncManager::new(config, store.clone()).unwrap();

    assert!(manager.sync_changes().await.is_err());

    let status = manager.status().await;
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.pending_changes, 1);
    assert!(status.last_sync.is_never());
}

#[tokio::test]
async fn test_store_ids_do_not_collide_with_central_rows() {
    let (central, url) = central_with_stores().await;
    // Central rows 1-3 exist before store 1 ever syncs.
    central.medicines().create(2, &medicine("Cetirizine", 15)).await.unwrap();
    central.medicines().create(2, &medicine("Loratadine", 8)).await.unwrap();
    central.medicines().create(1, &medicine("Azithromycin", 12)).await.unwrap();

    let (store, manager) = store_client(url).await;
    store.medicines().create(1, &medicine("Paracetamol", 40)).await.unwrap();
    manager.sync_changes().await.unwrap();

    store.medicines().create(1, &medicine("Ibuprofen", 25)).await.unwrap();
    let paracetamol = store
        .medicines()
        .list(Some(1))
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.name == "Paracetamol")
        .unwrap();
    store
        .purchases()
        .create(
            1,
            &NewPurchase {
                customer_id: None,
                operator_id: None,
                date_of_purchase: None,
                total_cents: None,
                items: vec![NewPurchaseItem {
                    medicine_id: paracetamol.id,
                    quantity: 2,
                    price_per_unit_cents: None,
                }],
            },
        )
        .await
        .unwrap();
    manager.sync_changes().await.unwrap();
    manager.sync_changes().await.unwrap();

    let expected = vec!["Azithromycin", "Ibuprofen", "Paracetamol"];
    assert_eq!(sorted_names(&central, 1).await, expected);
    assert_eq!(sorted_names(&store, 1).await, expected);
    assert_eq!(sorted_names(&central, 2).await, vec!["Cetirizine", "Loratadine"]);
    assert_eq!(stock(&central, 2, "Cetirizine").await, 15);
    assert_eq!(stock(&central, 1, "Paracetamol").await, 38);
    assert_eq!(stock(&store, 1, "Paracetamol").await, 38);

    // The sale points at central's Paracetamol, not at the store's row number.
    let central_paracetamol = central
        .medicines()
        .list(Some(1))
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.name == "Paracetamol")
        .unwrap();
    let sales = central.purchases().list(PurchaseFilter::Store(1)).await.unwrap();
    assert_eq!(sales.len(), 1);
    assert_eq!(sales[0].items[0].medicine_id, central_paracetamol.id);
    assert_eq!(store.purchases().list(PurchaseFilter::Store(1)).await.unwrap().len(), 1);

    assert_eq!(store.change_queue().count().await.unwrap(), 0);
    assert_eq!(manager.status().await.cycles_ok, 3);
}

#[tokio::test]
async fn test_local_edit_survives_own_push_coming_back() {
    let (central, url) = central_with_stores().await;
    let (store, manager) = store_client(url).await;

    let local = store.medicines().create(1, &medicine("Paracetamol", 40)).await.unwrap();
    manager.sync_changes().await.unwrap();
    assert_eq!(stock(&central, 1, "Paracetamol").await, 40);

    store
        .medicines()
        .update(local.id, Some(1), &medicine("Paracetamol", 30))
        .await
        .unwrap();
    // Pulls back central's copy of the first push, then pushes the edit.
    manager.sync_changes().await.unwrap();
    manager.sync_changes().await.unwrap();

    assert_eq!(store.medicines().get(local.id).await.unwrap().stock_quantity, 30);
    assert_eq!(stock(&central, 1, "Paracetamol").await, 30);
    assert_eq!(central.medicines().list(Some(1)).await.unwrap().len(), 1);
    assert_eq!(store.medicines().list(Some(1)).await.unwrap().len(), 1);
    assert_eq!(store.change_queue().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_pulled_row_edited_locally_updates_same_central_row() {
    let (central, url) = central_with_stores().await;
    central.medicines().create(2, &medicine("Cetirizine", 15)).await.unwrap();
    let origin = central.medicines().create(1, &medicine("Azithromycin", 12)).await.unwrap();

    let (store, manager) = store_client(url).await;
    manager.sync_changes().await.unwrap();

    let pulled = store.medicines().list(Some(1)).await.unwrap();
    assert_eq!(pulled.len(), 1);
    store
        .medicines()
        .update(pulled[0].id, Some(1), &medicine("Azithromycin", 9))
        .await
        .unwrap();
    manager.sync_changes().await.unwrap();

    assert_eq!(central.medicines().get(origin.id).await.unwrap().stock_quantity, 9);
    assert_eq!(central.medicines().list(Some(1)).await.unwrap().len(), 1);
    assert_eq!(stock(&central, 2, "Cetirizine").await, 15);
    assert_eq!(store.change_queue().count().await.unwrap(), 0);
}
