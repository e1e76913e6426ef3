//! # Change Applier
//!
//! Writes pulled records into the local database.
//!
//! ## Reconciliation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for each pulled record (medicines → customers → operators → purchases) │
//! │                                                                         │
//! │    central id mapped to a local row?                                    │
//! │       │                                                                 │
//! │       ├── no ───────────────────────────► insert locally, map the ids   │
//! │       │                                                                 │
//! │       └── yes ─► updated_at <= last version seen for that row?          │
//! │                    │                                                    │
//! │                    ├── yes ─► skip (the store's own push coming back)   │
//! │                    │                                                    │
//! │                    └── no ──► queued local changes for the local row?   │
//! │                                 │                                       │
//! │                                 ├── none ──► write locally              │
//! │                                 │                                       │
//! │                                 └── some ──► ConflictPolicy::resolve(   │
//! │                                               remote updated_at,        │
//! │                                               newest local change)      │
//! │                                      │                                  │
//! │                                      ├── ApplyRemote ──► write + drop   │
//! │                                      │                   queued changes │
//! │                                      └── KeepLocal ────► skip; local    │
//! │                                                          change pushed  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Applied records never enter the change queue.

use async_trait::async_trait;
use medstore_core::changes::{record_id, record_updated_at};
use medstore_core::{ChangeSet, ConflictPolicy, EntityKind, Resolution};
use medstore_db::Database;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

/// Outcome of applying one pulled change set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Records written (or deleted) locally.
    pub applied: usize,
    /// Records skipped because a newer local change won.
    pub kept_local: usize,
    /// Records no newer than what the store already has, mostly its own
    /// pushes coming back.
    pub already_seen: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Applied,
    KeptLocal,
    AlreadySeen,
}

/// Applies server changes locally.
#[async_trait]
pub trait ChangeApplier: Send + Sync {
    async fn apply(&self, changes: &ChangeSet) -> SyncResult<ApplyReport>;
}

/// [`ChangeApplier`] backed by the store's SQLite database.
#[derive(Debug, Clone)]
pub struct DatabaseApplier {
    db: Database,
    policy: ConflictPolicy,
}

impl DatabaseApplier {
    pub fn new(db: Database, policy: ConflictPolicy) -> Self {
        DatabaseApplier { db, policy }
    }

    async fn apply_record(&self, kind: EntityKind, record: &Value) -> SyncResult<Outcome> {
        let remote_id = record_id(record).ok_or_else(|| SyncError::ApplyFailed {
            entity: kind.to_string(),
            reason: "record without id".to_string(),
        })?;
        let updated_at = record_updated_at(record);

        let mapping = self.db.id_map().by_remote(kind, remote_id).await?;
        let queued = match &mapping {
            Some(mapping) if mapping.has_seen(updated_at) => {
                debug!(table = %kind, remote_id, "Already have this version");
                return Ok(Outcome::AlreadySeen);
            }
            Some(mapping) => self.db.change_queue().for_record(kind, mapping.local_id).await?,
            None => Vec::new(),
        };

        let resolution = match queued.iter().map(|c| c.timestamp).max() {
            Some(local_changed_at) => self.policy.resolve(updated_at, local_changed_at),
            None => Resolution::ApplyRemote,
        };

        if resolution == Resolution::KeepLocal {
            debug!(table = %kind, remote_id, "Local change is newer, keeping it");
            return Ok(Outcome::KeptLocal);
        }

        let discard: Vec<i64> = queued.iter().map(|c| c.id).collect();
        self.db
            .replication()
            .apply_remote(kind, record, &discard)
            .await
            .map_err(|e| SyncError::ApplyFailed {
                entity: kind.to_string(),
                reason: e.to_string(),
            })?;

        if !discard.is_empty() {
            debug!(table = %kind, discarded = discard.len(), "Remote record superseded queued changes");
        }
        Ok(Outcome::Applied)
    }
}

#[async_trait]
impl ChangeApplier for DatabaseApplier {
    async fn apply(&self, changes: &ChangeSet) -> SyncResult<ApplyReport> {
        let mut report = ApplyReport::default();

        for kind in EntityKind::ALL {
            for record in changes.records(kind) {
                match self.apply_record(kind, record).await? {
                    Outcome::Applied => report.applied += 1,
                    Outcome::KeptLocal => report.kept_local += 1,
                    Outcome::AlreadySeen => report.already_seen += 1,
                }
            }
        }

        if report.applied > 0 || report.kept_local > 0 {
            info!(
                applied = report.applied,
                kept_local = report.kept_local,
                already_seen = report.already_seen,
                policy = %self.policy,
                "Applied server changes"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use medstore_core::changes::PushResponse;
    use medstore_core::{AssignedId, Money, NewMedicine};
    use medstore_db::DbConfig;

    const CENTRAL_ID: i64 = 500;

    async fn store_db() -> Database {
        let db = Database::new(DbConfig::in_memory().track_changes(true))
            .await
            .unwrap();
        db.stores()
            .ensure_exists(1, "Michael Medical Store", "MS001")
            .await
            .unwrap();
        db
    }

    fn aspirin() -> NewMedicine {
        NewMedicine {
            name: "Aspirin".to_string(),
            brand: None,
            description: None,
            batch_number: None,
            expiry_date: None,
            price_cents: Money::from_cents(250),
            stock_quantity: 40,
            medicine_type: None,
            requires_prescription: false,
            schedule_category: None,
            storage_location_id: None,
        }
    }

    /// Creates Aspirin and acknowledges its push as central row
    /// `CENTRAL_ID` written at `synced_at`. Returns the local id.
    async fn pushed_aspirin(db: &Database, synced_at: DateTime<Utc>) -> i64 {
        let med = db.medicines().create(1, &aspirin()).await.unwrap();
        let pending = db.change_queue().pending(10).await.unwrap();
        let batch = db.replication().outgoing(&pending).await.unwrap();
        let response = PushResponse {
            status: "success".into(),
            message: "Applied 1 changes".into(),
            assigned: vec![AssignedId {
                table: EntityKind::Medicines,
                local_id: med.id,
                id: CENTRAL_ID,
            }],
            synced_at: Some(synced_at),
        };
        db.replication().complete_push(&batch, &response).await.unwrap();
        med.id
    }

    /// The local row as the server would send it, renamed and stamped.
    async fn remote_copy(db: &Database, id: i64, updated_at: DateTime<Utc>) -> Value {
        let mut record = serde_json::to_value(db.medicines().get(id).await.unwrap()).unwrap();
        record["id"] = Value::from(CENTRAL_ID);
        record["name"] = Value::from("Aspirin (central)");
        record["updated_at"] = Value::from(updated_at.to_rfc3339());
        record
    }

    async fn edit_locally(db: &Database, id: i64, stock: i64) {
        let mut input = aspirin();
        input.stock_quantity = stock;
        db.medicines().update(id, Some(1), &input).await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_wins_discards_queued_change() {
        let db = store_db().await;
        let synced_at = Utc::now() - Duration::days(2);
        let id = pushed_aspirin(&db, synced_at).await;
        edit_locally(&db, id, 35).await;
        assert_eq!(db.change_queue().count().await.unwrap(), 1);

        let mut changes = ChangeSet::default();
        changes
            .medicines
            .push(remote_copy(&db, id, synced_at + Duration::days(1)).await);

        let applier = DatabaseApplier::new(db.clone(), ConflictPolicy::RemoteWins);
        let report = applier.apply(&changes).await.unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(db.change_queue().count().await.unwrap(), 0);
        assert_eq!(db.medicines().get(id).await.unwrap().name, "Aspirin (central)");
        assert_eq!(db.medicines().list(Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_last_writer_wins_keeps_newer_local_change() {
        let db = store_db().await;
        let synced_at = Utc::now() - Duration::days(2);
        let id = pushed_aspirin(&db, synced_at).await;
        edit_locally(&db, id, 35).await;

        let mut changes = ChangeSet::default();
        changes
            .medicines
            .push(remote_copy(&db, id, synced_at + Duration::days(1)).await);

        let applier = DatabaseApplier::new(db.clone(), ConflictPolicy::LastWriterWins);
        let report = applier.apply(&changes).await.unwrap();

        assert_eq!(report.kept_local, 1);
        assert_eq!(db.change_queue().count().await.unwrap(), 1);
        assert_eq!(db.medicines().get(id).await.unwrap().name, "Aspirin");
    }

    #[tokio::test]
    async fn test_own_push_coming_back_keeps_later_local_edit() {
        let db = store_db().await;
        let synced_at = Utc::now() - Duration::minutes(1);
        let id = pushed_aspirin(&db, synced_at).await;
        edit_locally(&db, id, 30).await;

        // Central returns exactly what it wrote for the push.
        let mut echo = remote_copy(&db, id, synced_at).await;
        echo["name"] = Value::from("Aspirin");
        echo["stock_quantity"] = Value::from(40);
        let changes = ChangeSet {
            medicines: vec![echo],
            ..Default::default()
        };

        let report = DatabaseApplier::new(db.clone(), ConflictPolicy::RemoteWins)
            .apply(&changes)
            .await
            .unwrap();

        assert_eq!(report.already_seen, 1);
        assert_eq!(report.applied, 0);
        assert_eq!(db.medicines().get(id).await.unwrap().stock_quantity, 30);
        assert_eq!(db.change_queue().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unseen_record_is_inserted_without_enqueueing() {
        let db = store_db().await;
        let template = db.medicines().create(1, &aspirin()).await.unwrap();
        let queued: Vec<i64> = db.change_queue().pending(10).await.unwrap().iter().map(|c| c.id).collect();
        db.change_queue().remove(&queued).await.unwrap();

        // Same number as the local row, but a different central row.
        let mut record = serde_json::to_value(&template).unwrap();
        record["name"] = Value::from("Ibuprofen");
        let changes = ChangeSet {
            medicines: vec![record],
            ..Default::default()
        };

        let report = DatabaseApplier::new(db.clone(), ConflictPolicy::RemoteWins)
            .apply(&changes)
            .await
            .unwrap();
        assert_eq!(report.applied, 1);

        let mapping = db
            .id_map()
            .by_remote(EntityKind::Medicines, template.id)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(mapping.local_id, template.id);
        assert_eq!(db.medicines().get(template.id).await.unwrap().name, "Aspirin");
        assert_eq!(db.medicines().get(mapping.local_id).await.unwrap().name, "Ibuprofen");
        assert_eq!(db.change_queue().count().await.unwrap(), 0);
    }
}
