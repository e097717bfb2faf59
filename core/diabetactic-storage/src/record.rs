//! Typed rows held by the local store.
//!
//! Payloads (reading values, appointment bodies, queued mutation bodies) are
//! opaque JSON. Only the fields the store indexes on are lifted into columns.

use crate::error::{StorageError, StorageResult};
use diabetactic_types::{RecordId, ServiceId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The tables of the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Readings,
    SyncQueue,
    AppointmentsCache,
}

impl Table {
    /// All tables, in schema order.
    pub const ALL: [Table; 3] = [Table::Readings, Table::SyncQueue, Table::AppointmentsCache];

    /// Returns the SQL table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Readings => "readings",
            Table::SyncQueue => "sync_queue",
            Table::AppointmentsCache => "appointments_cache",
        }
    }

    /// Returns the change notification published after a write to this table.
    pub fn change_event(&self) -> StoreEvent {
        match self {
            Table::Readings => StoreEvent::ReadingsChanged,
            Table::SyncQueue => StoreEvent::SyncQueueChanged,
            Table::AppointmentsCache => StoreEvent::AppointmentsChanged,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change notifications published by the store after each committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    ReadingsChanged,
    AppointmentsChanged,
    SyncQueueChanged,
    /// Every table was emptied.
    Cleared,
}

/// A glucose reading kept on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalReading {
    pub id: RecordId,
    /// Opaque reading payload.
    pub value: serde_json::Value,
    /// When the reading was taken.
    pub timestamp: Timestamp,
    pub synced: bool,
    /// When the reading was written to this device.
    pub local_stored_at: Timestamp,
    /// Server-side id, set once the remote has accepted the reading.
    pub backend_id: Option<String>,
}

impl LocalReading {
    /// Creates an unsynced reading with a fresh id.
    pub fn new(value: serde_json::Value, timestamp: Timestamp) -> Self {
        Self {
            id: RecordId::new(),
            value,
            timestamp,
            synced: false,
            local_stored_at: Timestamp::now(),
            backend_id: None,
        }
    }
}

/// An appointment cached for offline display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAppointment {
    /// Remote appointment id.
    pub id: String,
    pub payload: serde_json::Value,
    /// Appointment status, indexed for filtering (e.g. `pending`, `accepted`).
    pub status: String,
    pub cached_at: Timestamp,
}

impl CachedAppointment {
    pub fn new(
        id: impl Into<String>,
        status: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            payload,
            status: status.into(),
            cached_at: Timestamp::now(),
        }
    }
}

/// Kind of mutation carried by a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
    /// Sharing a set of readings with the care team.
    CustomShare,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
            SyncOperation::CustomShare => "custom_share",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        match s {
            "create" => Ok(SyncOperation::Create),
            "update" => Ok(SyncOperation::Update),
            "delete" => Ok(SyncOperation::Delete),
            "custom_share" => Ok(SyncOperation::CustomShare),
            other => Err(StorageError::InvalidData(format!(
                "unknown sync operation: {other}"
            ))),
        }
    }
}

/// Delivery status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be replayed.
    Pending,
    /// The remote rejected the replay as conflicting; waits for the user.
    Conflict,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Conflict => "conflict",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "conflict" => Ok(QueueStatus::Conflict),
            other => Err(StorageError::InvalidData(format!(
                "unknown queue status: {other}"
            ))),
        }
    }
}

/// Where a queued mutation is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTarget {
    /// Path relative to the service base URL, e.g. `/glucose/create`.
    pub path: String,
    /// Local record the mutation concerns, if any.
    pub record_id: Option<RecordId>,
}

impl SyncTarget {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            record_id: None,
        }
    }

    #[must_use]
    pub fn for_record(mut self, record_id: RecordId) -> Self {
        self.record_id = Some(record_id);
        self
    }
}

/// A mutation waiting for delivery to a remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Sequence id assigned by the store on insert. Zero until stored.
    pub seq: i64,
    pub operation: SyncOperation,
    /// Service the mutation was originally addressed to.
    pub service: ServiceId,
    pub target: SyncTarget,
    pub payload: serde_json::Value,
    pub enqueued_at: Timestamp,
    pub retry_count: u32,
    pub status: QueueStatus,
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    /// Creates a pending, not yet stored item.
    pub fn new(
        operation: SyncOperation,
        service: ServiceId,
        target: SyncTarget,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            seq: 0,
            operation,
            service,
            target,
            payload,
            enqueued_at: Timestamp::now(),
            retry_count: 0,
            status: QueueStatus::Pending,
            last_error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == QueueStatus::Pending
    }
}

/// A row of any table.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Reading(LocalReading),
    QueueItem(SyncQueueItem),
    Appointment(CachedAppointment),
}

impl Record {
    pub fn table(&self) -> Table {
        match self {
            Record::Reading(_) => Table::Readings,
            Record::QueueItem(_) => Table::SyncQueue,
            Record::Appointment(_) => Table::AppointmentsCache,
        }
    }

    /// Returns the primary key. For a queue item that has not been stored
    /// yet this is `QueueItem(0)`.
    pub fn key(&self) -> RecordKey {
        match self {
            Record::Reading(r) => RecordKey::Reading(r.id),
            Record::QueueItem(item) => RecordKey::QueueItem(item.seq),
            Record::Appointment(a) => RecordKey::Appointment(a.id.clone()),
        }
    }

    pub fn as_reading(&self) -> Option<&LocalReading> {
        match self {
            Record::Reading(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_queue_item(&self) -> Option<&SyncQueueItem> {
        match self {
            Record::QueueItem(item) => Some(item),
            _ => None,
        }
    }

    pub fn as_appointment(&self) -> Option<&CachedAppointment> {
        match self {
            Record::Appointment(a) => Some(a),
            _ => None,
        }
    }
}

impl From<LocalReading> for Record {
    fn from(r: LocalReading) -> Self {
        Record::Reading(r)
    }
}

impl From<SyncQueueItem> for Record {
    fn from(item: SyncQueueItem) -> Self {
        Record::QueueItem(item)
    }
}

impl From<CachedAppointment> for Record {
    fn from(a: CachedAppointment) -> Self {
        Record::Appointment(a)
    }
}

/// Primary key of a row, tagged with its table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Reading(RecordId),
    QueueItem(i64),
    Appointment(String),
}

impl RecordKey {
    pub fn table(&self) -> Table {
        match self {
            RecordKey::Reading(_) => Table::Readings,
            RecordKey::QueueItem(_) => Table::SyncQueue,
            RecordKey::Appointment(_) => Table::AppointmentsCache,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Reading(id) => write!(f, "readings/{id}"),
            RecordKey::QueueItem(seq) => write!(f, "sync_queue/{seq}"),
            RecordKey::Appointment(id) => write!(f, "appointments_cache/{id}"),
        }
    }
}
