//! # Sync Data Model
//!
//! Everything both ends of the store synchronization protocol must agree on:
//! change records, the watermark, the per-entity change set that travels in
//! pull responses and push bodies, the conflict policy, and the request and
//! response bodies of the `/sync/*` endpoints.
//!
//! ## Change Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  STORE                                                 CENTRAL          │
//! │                                                                         │
//! │  local write ──► ChangeRecord ──► SyncQueue                             │
//! │                                      │                                  │
//! │                                      ▼ ids mapped to central ids        │
//! │                                 PushRequest ───────────► apply batch    │
//! │  SyncIdMap ◄── AssignedId, synced_at ◄── PushResponse ◄──┘              │
//! │                                                                         │
//! │  apply with ◄── ChangeSet ◄──── GET /sync/changes?last_sync=<Watermark> │
//! │  ConflictPolicy                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, ValidationError};

// =============================================================================
// Entity Kind
// =============================================================================

/// Entity types carried by the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Medicines,
    Customers,
    Operators,
    Purchases,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Medicines,
        EntityKind::Customers,
        EntityKind::Operators,
        EntityKind::Purchases,
    ];

    /// Key used in change sets and in `SyncQueue.TableName`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Medicines => "medicines",
            EntityKind::Customers => "customers",
            EntityKind::Operators => "operators",
            EntityKind::Purchases => "purchases",
        }
    }

    /// SQLite table holding this entity.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Medicines => "Medicine",
            EntityKind::Customers => "Customer",
            EntityKind::Operators => "Operator",
            EntityKind::Purchases => "Purchase",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    /// Accepts the change-set key (`medicines`) or the table name (`Medicine`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "medicines" | "medicine" => Ok(EntityKind::Medicines),
            "customers" | "customer" => Ok(EntityKind::Customers),
            "operators" | "operator" => Ok(EntityKind::Operators),
            "purchases" | "purchase" => Ok(EntityKind::Purchases),
            _ => Err(CoreError::UnknownEntity(s.to_string())),
        }
    }
}

// =============================================================================
// Change Operation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Insert => "insert",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeOperation {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "insert" => Ok(ChangeOperation::Insert),
            "update" => Ok(ChangeOperation::Update),
            "delete" => Ok(ChangeOperation::Delete),
            _ => Err(ValidationError::NotAllowed {
                field: "operation".to_string(),
                allowed: vec!["insert".into(), "update".into(), "delete".into()],
            }),
        }
    }
}

// =============================================================================
// Change Records
// =============================================================================

/// A local mutation about to be queued.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChange {
    pub table: EntityKind,
    pub operation: ChangeOperation,
    pub payload: Value,
}

impl NewChange {
    pub fn new(table: EntityKind, operation: ChangeOperation, payload: Value) -> Self {
        NewChange {
            table,
            operation,
            payload,
        }
    }
}

/// One pending local mutation, as stored in the durable queue.
///
/// ## Lifecycle
/// ```text
/// local write ──► queued (id assigned) ──► pushed ──► HTTP 200 ──► deleted
///                                            │
///                                            └── failure ──► stays queued
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Queue position; strictly increasing in enqueue order.
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub table: EntityKind,
    pub operation: ChangeOperation,
    pub payload: Value,
}

impl ChangeRecord {
    /// Primary key of the affected row, when the payload names one.
    pub fn record_id(&self) -> Option<i64> {
        record_id(&self.payload)
    }
}

/// Reads the `id` key of a record payload.
pub fn record_id(record: &Value) -> Option<i64> {
    record.get("id").and_then(Value::as_i64)
}

/// Key a pushed insert uses to name the row in the pushing store's database.
///
/// Ids are assigned independently by every database, so a store never sends
/// its own ids in `id`. Inserts carry `local_id` instead and the central
/// server answers with the id it assigned (see [`AssignedId`]).
pub const LOCAL_ID_KEY: &str = "local_id";

/// Reads the `local_id` key of a pushed record.
pub fn record_local_id(record: &Value) -> Option<i64> {
    record.get(LOCAL_ID_KEY).and_then(Value::as_i64)
}

/// True when a pushed record carries `"deleted": true`.
pub fn is_deleted(record: &Value) -> bool {
    record
        .get("deleted")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Reads the `updated_at` key of a record payload.
pub fn record_updated_at(record: &Value) -> Option<DateTime<Utc>> {
    record
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

// =============================================================================
// Watermark
// =============================================================================

/// Exclusive lower bound for "changes since" queries.
///
/// `Never` means no successful sync yet; a pull with `Never` is a full
/// snapshot. Travels as a string: `"Never"` or RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Watermark {
    #[default]
    Never,
    At(DateTime<Utc>),
}

impl Watermark {
    pub fn is_never(&self) -> bool {
        matches!(self, Watermark::Never)
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Watermark::Never => None,
            Watermark::At(t) => Some(*t),
        }
    }

    /// Returns the watermark to store after a successful cycle that started at
    /// `now`. The result is always strictly greater than `self`, even when the
    /// local clock has fallen behind a previously stored value.
    pub fn advance_to(&self, now: DateTime<Utc>) -> Watermark {
        match self {
            Watermark::At(prev) if now <= *prev => Watermark::At(*prev + Duration::milliseconds(1)),
            _ => Watermark::At(now),
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Never => f.write_str("Never"),
            Watermark::At(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::Micros, true)),
        }
    }
}

impl FromStr for Watermark {
    type Err = ValidationError;

    /// Accepts `Never` or an empty string, RFC 3339, a naive
    /// `YYYY-MM-DDTHH:MM:SS[.f]` (read as UTC) or a bare `YYYY-MM-DD`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("never") {
            return Ok(Watermark::Never);
        }
        if let Ok(t) = DateTime::parse_from_rfc3339(s) {
            return Ok(Watermark::At(t.with_timezone(&Utc)));
        }
        for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(t) = NaiveDateTime::parse_from_str(s, pattern) {
                return Ok(Watermark::At(t.and_utc()));
            }
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            if let Some(t) = d.and_hms_opt(0, 0, 0) {
                return Ok(Watermark::At(t.and_utc()));
            }
        }
        Err(ValidationError::invalid_format(
            "last_sync",
            format!("'{}' is not an ISO-8601 timestamp", s),
        ))
    }
}

impl TryFrom<String> for Watermark {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Watermark> for String {
    fn from(value: Watermark) -> Self {
        value.to_string()
    }
}

// =============================================================================
// Change Set
// =============================================================================

/// Records partitioned by entity type.
///
/// The pull response and the `changes` field of a push body share this shape:
/// `{"medicines": [...], "customers": [...], "operators": [...], "purchases": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub medicines: Vec<Value>,
    #[serde(default)]
    pub customers: Vec<Value>,
    #[serde(default)]
    pub operators: Vec<Value>,
    #[serde(default)]
    pub purchases: Vec<Value>,
}

impl ChangeSet {
    pub fn records(&self, kind: EntityKind) -> &[Value] {
        match kind {
            EntityKind::Medicines => &self.medicines,
            EntityKind::Customers => &self.customers,
            EntityKind::Operators => &self.operators,
            EntityKind::Purchases => &self.purchases,
        }
    }

    pub fn records_mut(&mut self, kind: EntityKind) -> &mut Vec<Value> {
        match kind {
            EntityKind::Medicines => &mut self.medicines,
            EntityKind::Customers => &mut self.customers,
            EntityKind::Operators => &mut self.operators,
            EntityKind::Purchases => &mut self.purchases,
        }
    }

    pub fn len(&self) -> usize {
        EntityKind::ALL.iter().map(|k| self.records(*k).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Conflict Policy
// =============================================================================

/// How a pulled record is reconciled with a queued local change on the same row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The central server always wins.
    #[default]
    RemoteWins,
    /// The newer timestamp wins; ties go to the server.
    LastWriterWins,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::RemoteWins => write!(f, "remote_wins"),
            ConflictPolicy::LastWriterWins => write!(f, "last_writer_wins"),
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "remote_wins" | "remote" => Ok(ConflictPolicy::RemoteWins),
            "last_writer_wins" | "lww" => Ok(ConflictPolicy::LastWriterWins),
            _ => Err(ValidationError::NotAllowed {
                field: "conflict_policy".to_string(),
                allowed: vec!["remote_wins".into(), "last_writer_wins".into()],
            }),
        }
    }
}

/// Outcome of reconciling one pulled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Write the remote record locally and drop the queued local change.
    ApplyRemote,
    /// Skip the remote record; the queued local change will be pushed.
    KeepLocal,
}

impl ConflictPolicy {
    /// Decides between a pulled record last modified at `remote_updated_at`
    /// and a local change queued at `local_changed_at`.
    pub fn resolve(
        &self,
        remote_updated_at: Option<DateTime<Utc>>,
        local_changed_at: DateTime<Utc>,
    ) -> Resolution {
        match (self, remote_updated_at) {
            (ConflictPolicy::RemoteWins, _) => Resolution::ApplyRemote,
            (ConflictPolicy::LastWriterWins, Some(remote)) if remote < local_changed_at => {
                Resolution::KeepLocal
            }
            (ConflictPolicy::LastWriterWins, _) => Resolution::ApplyRemote,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Body of `POST /sync/connect`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub store_id: Option<i64>,
    #[serde(default)]
    pub store_name: Option<String>,
    #[serde(default)]
    pub license_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub access_token: String,
    pub token_type: String,
    /// Token lifetime in seconds.
    pub expires_in: i64,
    /// Last time the central server accepted a push from this store.
    #[serde(default)]
    pub last_sync: Watermark,
}

/// Query of `GET /sync/changes`.
///
/// The watermark may be sent as `last_sync` or `since`. When both are
/// present `last_sync` is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangesQuery {
    #[serde(default)]
    pub last_sync: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

impl ChangesQuery {
    pub fn watermark(&self) -> Option<&str> {
        self.last_sync.as_deref().or(self.since.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    #[serde(default)]
    pub changes: ChangeSet,
}

/// Central id given to a row a store pushed as an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedId {
    pub table: EntityKind,
    /// The row's id in the pushing store's database.
    pub local_id: i64,
    /// The row's id in the central database.
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    pub status: String,
    pub message: String,
    /// One entry per pushed insert that carried a `local_id`.
    #[serde(default)]
    pub assigned: Vec<AssignedId>,
    /// `UpdatedAt` the central server wrote on every row of the batch.
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub medicines: i64,
    pub customers: i64,
    pub operators: i64,
    pub purchases: i64,
}

/// Body of `GET /sync/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusReport {
    pub store_id: i64,
    pub store_name: String,
    pub last_sync: Watermark,
    pub counts: EntityCounts,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_watermark_parse_forms() {
        assert_eq!("Never".parse::<Watermark>().unwrap(), Watermark::Never);
        assert_eq!("".parse::<Watermark>().unwrap(), Watermark::Never);
        assert_eq!(
            "2024-01-01".parse::<Watermark>().unwrap(),
            Watermark::At(at(2024, 1, 1))
        );
        assert_eq!(
            "2024-01-01T00:00:00".parse::<Watermark>().unwrap(),
            Watermark::At(at(2024, 1, 1))
        );
        assert_eq!(
            "2024-01-01T02:00:00+02:00".parse::<Watermark>().unwrap(),
            Watermark::At(at(2024, 1, 1))
        );
        assert!("yesterday".parse::<Watermark>().is_err());
    }

    #[test]
    fn test_watermark_serde_as_string() {
        let value = serde_json::to_value(Watermark::Never).unwrap();
        assert_eq!(value, json!("Never"));

        let back: Watermark = serde_json::from_value(json!("2024-02-01T00:00:00Z")).unwrap();
        assert_eq!(back, Watermark::At(at(2024, 2, 1)));
    }

    #[test]
    fn test_watermark_advance_is_strict() {
        let start = at(2024, 2, 1);
        assert_eq!(Watermark::Never.advance_to(start), Watermark::At(start));

        let later = at(2024, 3, 1);
        assert_eq!(Watermark::At(start).advance_to(later), Watermark::At(later));

        // Clock behind the stored watermark still moves forward
        let advanced = Watermark::At(later).advance_to(start);
        assert!(advanced > Watermark::At(later));
    }

    #[test]
    fn test_changes_query_accepts_both_keys() {
        let query: ChangesQuery =
            serde_json::from_value(json!({"since": "2024-01-01", "last_sync": "2024-02-01"})).unwrap();
        assert_eq!(query.watermark(), Some("2024-02-01"));

        let query: ChangesQuery = serde_json::from_value(json!({"since": "2024-01-01"})).unwrap();
        assert_eq!(query.watermark(), Some("2024-01-01"));

        assert_eq!(ChangesQuery::default().watermark(), None);
    }

    #[test]
    fn test_push_response_without_assigned_ids() {
        let response: PushResponse =
            serde_json::from_value(json!({"status": "success", "message": "Applied 0 changes"})).unwrap();
        assert!(response.assigned.is_empty());
        assert!(response.synced_at.is_none());

        let record = json!({"local_id": 4, "name": "A"});
        assert_eq!(record_local_id(&record), Some(4));
        assert_eq!(record_id(&record), None);
    }

    #[test]
    fn test_change_set_missing_keys_default_empty() {
        let set: ChangeSet = serde_json::from_value(json!({"medicines": [{"id": 1}]})).unwrap();
        assert_eq!(set.medicines.len(), 1);
        assert!(set.purchases.is_empty());
    }

    #[test]
    fn test_conflict_policy() {
        let local = at(2024, 2, 1);
        assert_eq!(
            ConflictPolicy::RemoteWins.resolve(Some(at(2023, 1, 1)), local),
            Resolution::ApplyRemote
        );
        assert_eq!(
            ConflictPolicy::LastWriterWins.resolve(Some(at(2023, 1, 1)), local),
            Resolution::KeepLocal
        );
        assert_eq!(
            ConflictPolicy::LastWriterWins.resolve(Some(local), local),
            Resolution::ApplyRemote
        );
        assert_eq!(
            ConflictPolicy::LastWriterWins.resolve(None, local),
            Resolution::ApplyRemote
        );
        assert_eq!(
            "last-writer-wins".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::LastWriterWins
        );
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!("Medicine".parse::<EntityKind>().unwrap(), EntityKind::Medicines);
        assert_eq!("purchases".parse::<EntityKind>().unwrap(), EntityKind::Purchases);
        assert!("Batch".parse::<EntityKind>().is_err());
    }
}
