//! MedStore server binary.
//!
//! Runs as a central server by default. With `SYNC_CONFIG` set it runs as a
//! store server and also keeps a sync loop against its central server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use medstore_db::{Database, DbConfig};
use medstore_server::{router, AppState, ServerConfig};
use medstore_sync::{SyncConfig, SyncManager, SyncManagerHandle};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ServerConfig::load().context("Invalid server configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    info!(
        app = %config.app_name,
        database = %config.database_path.display(),
        store_mode = config.is_store_mode(),
        "Starting MedStore server"
    );

    let db = Database::new(DbConfig::new(config.database_path.clone()).track_changes(config.is_store_mode()))
        .await
        .context("Failed to open database")?;

    let sync = match &config.sync_config {
        Some(path) => Some(start_sync(path.clone(), db.clone())?),
        None => None,
    };

    let bind_addr = config.bind_addr.clone();
    let app = router(AppState::new(db.clone(), config));

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(handle) = sync {
        handle.shutdown().await;
    }
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Store mode: load the sync client config and spawn its loop.
fn start_sync(path: PathBuf, db: Database) -> anyhow::Result<SyncManagerHandle> {
    let sync_config = SyncConfig::load(Some(path.clone()))
        .with_context(|| format!("Invalid sync config {}", path.display()))?;

    info!(
        store_id = sync_config.store.store_id,
        central = %sync_config.server.url,
        interval_secs = sync_config.sync.interval_secs,
        "Store mode enabled"
    );

    let manager = SyncManager::new(sync_config, db).context("Failed to create sync manager")?;
    Ok(Arc::new(manager).spawn())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
