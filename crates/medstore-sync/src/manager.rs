//! # Sync Manager
//!
//! The store-side sync client: owns the token, drives connect / pull / push
//! cycles and runs them on a timer.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ┌──────────────┐   connect() → 200        ┌──────────────┐            │
//! │   │ DISCONNECTED │ ───────────────────────► │  CONNECTED   │            │
//! │   │  (no token)  │ ◄─────────────────────── │ (usable tok) │            │
//! │   └──────────────┘   401 / token expired    └──────────────┘            │
//! │          │                                         │                    │
//! │          │ connect() fails                         │ sync_changes()     │
//! │          ▼                                         ▼                    │
//! │     cycle fails,                       pull ─► apply ─► push queue      │
//! │     retried after backoff                              │                │
//! │                                          200: map assigned ids, delete  │
//! │                                               pushed rows, advance      │
//! │                                               watermark                 │
//! │                                          else: queue untouched          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery
//! Queued changes are deleted only after the server acknowledges the push
//! with 200, and only the rows that were actually sent. A failed or cut-off
//! cycle resends them next time (at-least-once); central recognises a
//! resent insert by its `local_id`.
//!
//! A cycle may push in several batches: a purchase whose medicine is
//! inserted in the same cycle goes out once central has numbered the
//! medicine.
//!
//! ## Concurrency
//! Producers append to the durable queue in their own transactions while a
//! cycle runs; cycles themselves are serialised by a mutex, so the loop and a
//! manual "sync now" never overlap.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::applier::{ChangeApplier, DatabaseApplier};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::token::{TokenCache, TokenInfo};
use crate::transport::{HttpTransport, SyncTransport};
use medstore_core::changes::ConnectRequest;
use medstore_core::{ChangeOperation, EntityKind, NewChange, Watermark};
use medstore_db::Database;

// =============================================================================
// Status
// =============================================================================

/// Connection state of the sync client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Snapshot of the sync client's state.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub state: ConnectionState,
    /// Watermark after the last successful cycle.
    pub last_sync: Watermark,
    /// Changes waiting in the durable queue.
    pub pending_changes: i64,
    pub last_error: Option<String>,
    pub cycles_ok: u64,
    pub cycles_failed: u64,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            state: ConnectionState::Disconnected,
            last_sync: Watermark::Never,
            pending_changes: 0,
            last_error: None,
            cycles_ok: 0,
            cycles_failed: 0,
        }
    }
}

// =============================================================================
// Sync Manager
// =============================================================================

pub struct SyncManager {
    config: SyncConfig,
    db: Database,
    transport: Arc<dyn SyncTransport>,
    applier: Arc<dyn ChangeApplier>,
    token: TokenCache,
    /// Held for the duration of one cycle.
    cycle: Mutex<()>,
    status: RwLock<SyncStatus>,
}

impl SyncManager {
    /// Creates a manager talking HTTP to `config.server.url` and applying
    /// pulled changes to `db` with the configured conflict policy.
    pub fn new(config: SyncConfig, db: Database) -> SyncResult<Self> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(&config)?);
        let applier = Arc::new(DatabaseApplier::new(db.clone(), config.sync.conflict_policy));
        Ok(Self::with_parts(config, db, transport, applier))
    }

    /// Creates a manager from explicit collaborators.
    pub fn with_parts(
        config: SyncConfig,
        db: Database,
        transport: Arc<dyn SyncTransport>,
        applier: Arc<dyn ChangeApplier>,
    ) -> Self {
        SyncManager {
            config,
            db,
            transport,
            applier,
            token: TokenCache::new(),
            cycle: Mutex::new(()),
            status: RwLock::new(SyncStatus::default()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current status, with the pending count read from the queue.
    pub async fn status(&self) -> SyncStatus {
        let pending = match self.db.change_queue().count().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(error = %e, "Failed to count pending changes");
                None
            }
        };

        let mut status = self.status.write().await;
        if let Some(pending) = pending {
            status.pending_changes = pending;
        }
        status.clone()
    }

    // =========================================================================
    // Connect
    // =========================================================================

    /// Presents the store identity and caches the issued token.
    ///
    /// On success the state becomes CONNECTED. The server's `last_sync` is
    /// adopted as the starting watermark only when this store has never
    /// synced. On any failure no token is kept and the state is
    /// DISCONNECTED.
    pub async fn connect(&self) -> SyncResult<()> {
        match self.try_connect().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected).await;
                info!(store_id = self.config.store.store_id, "Connected to central server");
                Ok(())
            }
            Err(e) => {
                self.token.clear().await;
                self.set_state(ConnectionState::Disconnected).await;
                warn!(store_id = self.config.store.store_id, error = %e, "Connect failed");
                Err(e)
            }
        }
    }

    /// The handshake itself. Caches the token last.
    async fn try_connect(&self) -> SyncResult<()> {
        let store = &self.config.store;
        let request = ConnectRequest {
            store_id: Some(store.store_id),
            store_name: Some(store.store_name.clone()),
            license_number: Some(store.license_number.clone()),
        };

        let response = self.transport.connect(&request).await?;

        // Scoped rows pulled later reference this store.
        self.db
            .stores()
            .ensure_exists(store.store_id, &store.store_name, &store.license_number)
            .await?;

        let sync_state = self.db.sync_state();
        if sync_state.watermark().await?.is_never() && !response.last_sync.is_never() {
            info!(last_sync = %response.last_sync, "Adopting server watermark");
            sync_state.set_watermark(response.last_sync).await?;
        }

        self.token.store(TokenInfo::from_response(&response)).await;
        Ok(())
    }

    /// Returns a usable token, connecting first when there is none.
    async fn ensure_token(&self) -> SyncResult<String> {
        if let Some(token) = self.token.usable().await {
            return Ok(token);
        }
        self.connect().await?;
        self.token.usable().await.ok_or(SyncError::NotConnected)
    }

    // =========================================================================
    // Change Queue
    // =========================================================================

    /// Records a local mutation for the next push.
    ///
    /// Never fails from the caller's point of view: a queue write error is
    /// logged and dropped.
    pub async fn queue_change(&self, table: EntityKind, operation: ChangeOperation, payload: Value) {
        let change = NewChange::new(table, operation, payload);
        match self.db.change_queue().enqueue(&change).await {
            Ok(id) => debug!(id, %table, %operation, "Change queued"),
            Err(e) => error!(%table, %operation, error = %e, "Failed to queue change"),
        }
    }

    // =========================================================================
    // Sync Cycle
    // =========================================================================

    /// Runs one connect / pull / apply / push cycle.
    ///
    /// ## When This Occurs
    /// - Every `interval_secs` from the sync loop
    /// - On demand (e.g. a "sync now" action)
    ///
    /// A failure leaves the queue and the watermark untouched. A 401 from any
    /// step drops the token.
    pub async fn sync_changes(&self) -> SyncResult<()> {
        let _cycle = self.cycle.lock().await;
        let started = Utc::now();

        let result = self.run_cycle(started).await;

        let mut status = self.status.write().await;
        match &result {
            Ok(watermark) => {
                status.last_sync = *watermark;
                status.last_error = None;
                status.cycles_ok += 1;
            }
            Err(e) => {
                if e.is_auth_error() {
                    self.token.clear().await;
                    status.state = ConnectionState::Disconnected;
                }
                status.last_error = Some(e.to_string());
                status.cycles_failed += 1;
            }
        }
        result.map(drop)
    }

    async fn run_cycle(&self, started: chrono::DateTime<Utc>) -> SyncResult<Watermark> {
        let token = self.ensure_token().await?;
        let sync_state = self.db.sync_state();
        let since = sync_state.watermark().await?;

        // 1. Pull
        let remote = self.transport.pull(&token, since).await?;
        debug!(%since, records = remote.len(), "Pulled server changes");

        // 2. Apply
        if !remote.is_empty() {
            self.applier.apply(&remote).await?;
        }

        // 3. Push
        let pending = self.db.change_queue().pending(self.config.sync.batch_size).await?;
        let replication = self.db.replication();
        let mut rest = pending.as_slice();
        while !rest.is_empty() {
            let batch = replication.outgoing(rest).await?;
            if batch.is_empty() {
                break;
            }
            let response = self.transport.push(&token, &batch.changes).await?;
            replication.complete_push(&batch, &response).await?;

            info!(
                pushed = batch.len(),
                assigned = response.assigned.len(),
                message = %response.message,
                "Pushed local changes"
            );
            rest = &rest[batch.len()..];
        }

        // 4. Advance
        let next = since.advance_to(started);
        sync_state.set_watermark(next).await?;
        Ok(next)
    }

    async fn set_state(&self, state: ConnectionState) {
        self.status.write().await.state = state;
    }

    // =========================================================================
    // Loop
    // =========================================================================

    /// Runs cycles until `shutdown_rx` fires.
    ///
    /// Waits `interval_secs` after a successful cycle and `error_backoff_secs`
    /// after a failed one. Errors never end the loop.
    pub async fn start_sync_loop(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            interval_secs = self.config.sync.interval_secs,
            store_id = self.config.store.store_id,
            "Sync loop started"
        );

        loop {
            let wait = match self.sync_changes().await {
                Ok(()) => self.config.interval(),
                Err(e) => {
                    warn!(
                        error = %e,
                        retryable = e.is_retryable(),
                        backoff_secs = self.config.sync.error_backoff_secs,
                        "Sync cycle failed"
                    );
                    self.config.error_backoff()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown_rx.recv() => {
                    info!("Sync loop received shutdown");
                    break;
                }
            }
        }

        info!("Sync loop stopped");
    }

    /// Spawns the sync loop on the runtime.
    pub fn spawn(self: Arc<Self>) -> SyncManagerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let manager = Arc::clone(&self);
        let task = tokio::spawn(async move { manager.start_sync_loop(shutdown_rx).await });
        SyncManagerHandle {
            shutdown_tx,
            manager: self,
            task,
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Handle for a spawned sync loop.
pub struct SyncManagerHandle {
    shutdown_tx: mpsc::Sender<()>,
    manager: Arc<SyncManager>,
    task: JoinHandle<()>,
}

impl SyncManagerHandle {
    pub async fn status(&self) -> SyncStatus {
        self.manager.status().await
    }

    pub fn manager(&self) -> &Arc<SyncManager> {
        &self.manager
    }

    /// Stops the loop after the current cycle and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        match tokio::time::timeout(Duration::from_secs(30), self.task).await {
            Ok(Err(e)) => error!(error = %e, "Sync loop task failed"),
            Err(_) => warn!("Sync loop did not stop within 30s"),
            Ok(Ok(())) => {}
        }
    }
}
