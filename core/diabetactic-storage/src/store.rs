//! SQLite-backed local store.
//!
//! Three tables live in one database file: `readings`, `sync_queue` and
//! `appointments_cache`. The schema version is tracked with
//! `PRAGMA user_version`. Every committed write publishes a [`StoreEvent`].

use crate::error::{StorageError, StorageResult};
use crate::quota::{QuotaGuard, QuotaPolicy, QuotaTarget};
use crate::record::{
    CachedAppointment, LocalReading, QueueStatus, Record, RecordKey, StoreEvent, SyncOperation,
    SyncQueueItem, SyncTarget, Table,
};
use diabetactic_types::{RecordId, ServiceId, Timestamp};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

const EVENT_CAPACITY: usize = 64;

const READING_COLUMNS: &str = "id, value, timestamp, synced, local_stored_at, backend_id";
const QUEUE_COLUMNS: &str = "seq, operation, service, target_path, record_id, payload, \
                             enqueued_at, retry_count, status, last_error";
const APPOINTMENT_COLUMNS: &str = "id, payload, status, cached_at";

/// Configuration for a [`LocalStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Human-readable store name, reported by [`LocalStore::get_stats`].
    pub name: String,
    /// Capacity cap in database pages. Writes beyond it fail with
    /// [`StorageError::QuotaExceeded`].
    pub max_page_count: Option<u32>,
    pub quota: QuotaPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "diabetactic".to_string(),
            max_page_count: None,
            quota: QuotaPolicy::default(),
        }
    }
}

/// Row counts and schema information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub name: String,
    pub schema_version: i64,
    pub readings: usize,
    pub sync_queue: usize,
    pub appointments_cache: usize,
}

impl StoreStats {
    /// Returns the row count of `table`.
    pub fn count(&self, table: Table) -> usize {
        match table {
            Table::Readings => self.readings,
            Table::SyncQueue => self.sync_queue,
            Table::AppointmentsCache => self.appointments_cache,
        }
    }

    pub fn total(&self) -> usize {
        self.readings + self.sync_queue + self.appointments_cache
    }
}

/// Persistent on-device store.
pub struct LocalStore {
    conn: Mutex<Connection>,
    config: StoreConfig,
    guard: QuotaGuard,
    events: broadcast::Sender<StoreEvent>,
}

impl LocalStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> StorageResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        debug!("opened local store at {}", path.as_ref().display());
        Self::with_connection(conn, config)
    }

    /// Opens an in-memory store with the default configuration (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open_in_memory_with(StoreConfig::default())
    }

    /// Opens an in-memory store.
    pub fn open_in_memory_with(config: StoreConfig) -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, config)
    }

    fn with_connection(conn: Connection, config: StoreConfig) -> StorageResult<Self> {
        init_schema(&conn)?;
        if let Some(max_pages) = config.max_page_count {
            let effective: i64 =
                conn.pragma_update_and_check(None, "max_page_count", max_pages, |row| row.get(0))?;
            debug!("store {} capped at {} pages", config.name, effective);
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            guard: QuotaGuard::new(config.quota),
            config,
            events,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: StoreEvent) {
        // Err only means nobody is listening.
        let _ = self.events.send(event);
    }

    // ── Generic record access ───────────────────────────────────

    /// Inserts a record and returns its key. Queue items receive a fresh
    /// sequence id; the `seq` they carry is ignored.
    pub fn add(&self, record: &Record) -> StorageResult<RecordKey> {
        let key = insert(&self.conn(), record)?;
        self.notify(record.table().change_event());
        Ok(key)
    }

    /// Loads a record by key.
    pub fn get(&self, key: &RecordKey) -> StorageResult<Option<Record>> {
        let conn = self.conn();
        let record = match key {
            RecordKey::Reading(id) => conn
                .query_row(
                    &format!("SELECT {READING_COLUMNS} FROM readings WHERE id = ?1"),
                    params![id.to_string()],
                    reading_from_row,
                )
                .optional()?
                .map(Record::Reading),
            RecordKey::QueueItem(seq) => conn
                .query_row(
                    &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE seq = ?1"),
                    params![seq],
                    queue_item_from_row,
                )
                .optional()?
                .map(Record::QueueItem),
            RecordKey::Appointment(id) => conn
                .query_row(
                    &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments_cache WHERE id = ?1"),
                    params![id],
                    appointment_from_row,
                )
                .optional()?
                .map(Record::Appointment),
        };
        Ok(record)
    }

    /// Replaces a stored record. Fails with `NotFound` if no row has its key.
    pub fn update(&self, record: &Record) -> StorageResult<()> {
        let changed = update_row(&self.conn(), record)?;
        if changed == 0 {
            return Err(StorageError::NotFound(record.key().to_string()));
        }
        self.notify(record.table().change_event());
        Ok(())
    }

    /// Deletes a record. Returns false if it did not exist.
    pub fn delete(&self, key: &RecordKey) -> StorageResult<bool> {
        let removed = delete_row(&self.conn(), key)?;
        if removed > 0 {
            self.notify(key.table().change_event());
        }
        Ok(removed > 0)
    }

    /// Inserts all records in one transaction.
    pub fn bulk_add(&self, records: &[Record]) -> StorageResult<Vec<RecordKey>> {
        let keys = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let keys = records
                .iter()
                .map(|record| insert(&tx, record))
                .collect::<StorageResult<Vec<_>>>()?;
            tx.commit()?;
            keys
        };
        let tables: HashSet<Table> = records.iter().map(Record::table).collect();
        for table in tables {
            self.notify(table.change_event());
        }
        Ok(keys)
    }

    /// Deletes all keys in one transaction, returning how many rows existed.
    pub fn bulk_delete(&self, keys: &[RecordKey]) -> StorageResult<usize> {
        let removed = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let mut removed = 0;
            for key in keys {
                removed += delete_row(&tx, key)?;
            }
            tx.commit()?;
            removed
        };
        if removed > 0 {
            let tables: HashSet<Table> = keys.iter().map(RecordKey::table).collect();
            for table in tables {
                self.notify(table.change_event());
            }
        }
        Ok(removed)
    }

    // ── Index queries ───────────────────────────────────────────

    /// Readings with the given sync flag, oldest first.
    pub fn readings_by_synced(&self, synced: bool) -> StorageResult<Vec<LocalReading>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {READING_COLUMNS} FROM readings WHERE synced = ?1 ORDER BY timestamp"
        ))?;
        let rows = stmt.query_map(params![synced], reading_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Readings taken in `[from, to)`, oldest first.
    pub fn readings_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> StorageResult<Vec<LocalReading>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {READING_COLUMNS} FROM readings
             WHERE timestamp >= ?1 AND timestamp < ?2 ORDER BY timestamp"
        ))?;
        let rows = stmt.query_map(params![from.as_millis(), to.as_millis()], reading_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Queue items with the given status, in enqueue order.
    pub fn sync_items_with_status(&self, status: QueueStatus) -> StorageResult<Vec<SyncQueueItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue
             WHERE status = ?1 ORDER BY enqueued_at, seq"
        ))?;
        let rows = stmt.query_map(params![status.as_str()], queue_item_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Pending queue items, in enqueue order.
    pub fn pending_sync_items(&self) -> StorageResult<Vec<SyncQueueItem>> {
        self.sync_items_with_status(QueueStatus::Pending)
    }

    /// Cached appointments with the given status.
    pub fn appointments_by_status(&self, status: &str) -> StorageResult<Vec<CachedAppointment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments_cache
             WHERE status = ?1 ORDER BY cached_at, id"
        ))?;
        let rows = stmt.query_map(params![status], appointment_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Returns the row count of `table`.
    pub fn count(&self, table: Table) -> StorageResult<usize> {
        count_rows(&self.conn(), table)
    }

    // ── Readings ────────────────────────────────────────────────

    /// Flags a reading as accepted by the remote.
    pub fn mark_reading_synced(
        &self,
        id: RecordId,
        backend_id: Option<String>,
    ) -> StorageResult<()> {
        let changed = self.conn().execute(
            "UPDATE readings SET synced = 1, backend_id = COALESCE(?2, backend_id) WHERE id = ?1",
            params![id.to_string(), backend_id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(RecordKey::Reading(id).to_string()));
        }
        self.notify(StoreEvent::ReadingsChanged);
        Ok(())
    }

    // ── Quota ───────────────────────────────────────────────────

    /// Inserts a record, pruning aged readings and retrying once if the
    /// store is full.
    pub fn safe_add(&self, record: &Record) -> StorageResult<RecordKey> {
        self.guard.safe_add(self, record)
    }

    /// Deletes readings older than `days` days and returns the count.
    pub fn prune_old_data(&self, days: u32) -> StorageResult<usize> {
        self.guard.prune_old_data(self, days)
    }

    /// Prunes with the configured retention horizon.
    pub fn prune_to_retention(&self) -> StorageResult<usize> {
        self.prune_old_data(self.config.quota.retention_days)
    }

    // ── Maintenance ─────────────────────────────────────────────

    /// Returns per-table counts and the schema version.
    pub fn get_stats(&self) -> StorageResult<StoreStats> {
        let conn = self.conn();
        Ok(StoreStats {
            name: self.config.name.clone(),
            schema_version: schema_version(&conn)?,
            readings: count_rows(&conn, Table::Readings)?,
            sync_queue: count_rows(&conn, Table::SyncQueue)?,
            appointments_cache: count_rows(&conn, Table::AppointmentsCache)?,
        })
    }

    /// Empties every table in one transaction.
    pub fn clear_all_data(&self) -> StorageResult<()> {
        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            for table in Table::ALL {
                tx.execute(&format!("DELETE FROM {table}"), [])?;
            }
            if let Err(e) = tx.commit() {
                settle_clear_commit(&conn, e)?;
            }
        }
        info!("cleared local store {}", self.config.name);
        self.notify(StoreEvent::Cleared);
        Ok(())
    }
}

impl QuotaTarget for LocalStore {
    fn add(&self, record: &Record) -> StorageResult<RecordKey> {
        LocalStore::add(self, record)
    }

    fn prune_readings_before(&self, cutoff: Timestamp) -> StorageResult<usize> {
        let removed = self.conn().execute(
            "DELETE FROM readings WHERE timestamp < ?1",
            params![cutoff.as_millis()],
        )?;
        if removed > 0 {
            info!("pruned {} readings older than {}", removed, cutoff);
            self.notify(StoreEvent::ReadingsChanged);
        }
        Ok(removed)
    }
}

// ── Schema ──────────────────────────────────────────────────────

fn schema_version(conn: &Connection) -> StorageResult<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn init_schema(conn: &Connection) -> StorageResult<()> {
    let version = schema_version(conn)?;
    if version > SCHEMA_VERSION {
        return Err(StorageError::InvalidData(format!(
            "store schema v{version} is newer than supported v{SCHEMA_VERSION}"
        )));
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        "
        BEGIN;

        CREATE TABLE IF NOT EXISTS readings (
            id TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0,
            local_stored_at INTEGER NOT NULL,
            backend_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_readings_synced ON readings(synced);
        CREATE INDEX IF NOT EXISTS idx_readings_timestamp ON readings(timestamp);

        CREATE TABLE IF NOT EXISTS sync_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            operation TEXT NOT NULL,
            service TEXT NOT NULL,
            target_path TEXT NOT NULL,
            record_id TEXT,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            last_error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sync_queue_status
            ON sync_queue(status, enqueued_at, seq);

        CREATE TABLE IF NOT EXISTS appointments_cache (
            id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            status TEXT NOT NULL,
            cached_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_appointments_status
            ON appointments_cache(status);

        PRAGMA user_version = 1;

        COMMIT;
        ",
    )?;
    debug!("initialized store schema v{}", SCHEMA_VERSION);
    Ok(())
}

fn count_rows(conn: &Connection, table: Table) -> StorageResult<usize> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(usize::try_from(count).unwrap_or_default())
}

/// Decides the outcome of a failed commit while clearing the store.
///
/// The engine may already have ended the transaction, so the error is
/// swallowed only when `conn` is back in autocommit mode and every table
/// is verified empty. Otherwise `error` is returned.
pub fn settle_clear_commit(conn: &Connection, error: rusqlite::Error) -> StorageResult<()> {
    if !conn.is_autocommit() || !all_tables_empty(conn)? {
        return Err(error.into());
    }
    warn!("clear transaction ended before commit ({error}); tables verified empty");
    Ok(())
}

fn all_tables_empty(conn: &Connection) -> StorageResult<bool> {
    for table in Table::ALL {
        if count_rows(conn, table)? > 0 {
            return Ok(false);
        }
    }
    Ok(true)
}

// ── Row mapping ─────────────────────────────────────────────────

fn insert(conn: &Connection, record: &Record) -> StorageResult<RecordKey> {
    match record {
        Record::Reading(r) => {
            conn.execute(
                &format!("INSERT INTO readings ({READING_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    r.id.to_string(),
                    serde_json::to_string(&r.value)?,
                    r.timestamp.as_millis(),
                    r.synced,
                    r.local_stored_at.as_millis(),
                    r.backend_id,
                ],
            )?;
            Ok(RecordKey::Reading(r.id))
        }
        Record::QueueItem(item) => {
            conn.execute(
                "INSERT INTO sync_queue (operation, service, target_path, record_id, payload,
                                         enqueued_at, retry_count, status, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    item.operation.as_str(),
                    item.service.as_str(),
                    item.target.path,
                    item.target.record_id.map(|id| id.to_string()),
                    serde_json::to_string(&item.payload)?,
                    item.enqueued_at.as_millis(),
                    item.retry_count,
                    item.status.as_str(),
                    item.last_error,
                ],
            )?;
            Ok(RecordKey::QueueItem(conn.last_insert_rowid()))
        }
        Record::Appointment(a) => {
            conn.execute(
                &format!("INSERT INTO appointments_cache ({APPOINTMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4)"),
                params![
                    a.id,
                    serde_json::to_string(&a.payload)?,
                    a.status,
                    a.cached_at.as_millis(),
                ],
            )?;
            Ok(RecordKey::Appointment(a.id.clone()))
        }
    }
}

fn update_row(conn: &Connection, record: &Record) -> StorageResult<usize> {
    let changed = match record {
        Record::Reading(r) => conn.execute(
            "UPDATE readings SET value = ?2, timestamp = ?3, synced = ?4,
                                 local_stored_at = ?5, backend_id = ?6
             WHERE id = ?1",
            params![
                r.id.to_string(),
                serde_json::to_string(&r.value)?,
                r.timestamp.as_millis(),
                r.synced,
                r.local_stored_at.as_millis(),
                r.backend_id,
            ],
        )?,
        Record::QueueItem(item) => conn.execute(
            "UPDATE sync_queue SET operation = ?2, service = ?3, target_path = ?4,
                                   record_id = ?5, payload = ?6, enqueued_at = ?7,
                                   retry_count = ?8, status = ?9, last_error = ?10
             WHERE seq = ?1",
            params![
                item.seq,
                item.operation.as_str(),
                item.service.as_str(),
                item.target.path,
                item.target.record_id.map(|id| id.to_string()),
                serde_json::to_string(&item.payload)?,
                item.enqueued_at.as_millis(),
                item.retry_count,
                item.status.as_str(),
                item.last_error,
            ],
        )?,
        Record::Appointment(a) => conn.execute(
            "UPDATE appointments_cache SET payload = ?2, status = ?3, cached_at = ?4
             WHERE id = ?1",
            params![
                a.id,
                serde_json::to_string(&a.payload)?,
                a.status,
                a.cached_at.as_millis(),
            ],
        )?,
    };
    Ok(changed)
}

fn delete_row(conn: &Connection, key: &RecordKey) -> StorageResult<usize> {
    let removed = match key {
        RecordKey::Reading(id) => {
            conn.execute("DELETE FROM readings WHERE id = ?1", params![id.to_string()])?
        }
        RecordKey::QueueItem(seq) => {
            conn.execute("DELETE FROM sync_queue WHERE seq = ?1", params![seq])?
        }
        RecordKey::Appointment(id) => {
            conn.execute("DELETE FROM appointments_cache WHERE id = ?1", params![id])?
        }
    };
    Ok(removed)
}

fn conversion_error<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
}

fn json_column(row: &Row<'_>, column: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(column, e))
}

fn record_id_column(row: &Row<'_>, column: usize) -> rusqlite::Result<Option<RecordId>> {
    let raw: Option<String> = row.get(column)?;
    raw.as_deref()
        .map(RecordId::parse)
        .transpose()
        .map_err(|e| conversion_error(column, e))
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<LocalReading> {
    let id = record_id_column(row, 0)?
        .ok_or_else(|| conversion_error(0, StorageError::InvalidData("null reading id".into())))?;
    Ok(LocalReading {
        id,
        value: json_column(row, 1)?,
        timestamp: Timestamp::from_millis(row.get(2)?),
        synced: row.get(3)?,
        local_stored_at: Timestamp::from_millis(row.get(4)?),
        backend_id: row.get(5)?,
    })
}

fn queue_item_from_row(row: &Row<'_>) -> rusqlite::Result<SyncQueueItem> {
    let operation: String = row.get(1)?;
    let service: String = row.get(2)?;
    let status: String = row.get(8)?;
    Ok(SyncQueueItem {
        seq: row.get(0)?,
        operation: operation
            .parse::<SyncOperation>()
            .map_err(|e| conversion_error(1, e))?,
        service: ServiceId::new(service),
        target: SyncTarget {
            path: row.get(3)?,
            record_id: record_id_column(row, 4)?,
        },
        payload: json_column(row, 5)?,
        enqueued_at: Timestamp::from_millis(row.get(6)?),
        retry_count: row.get(7)?,
        status: status
            .parse::<QueueStatus>()
            .map_err(|e| conversion_error(8, e))?,
        last_error: row.get(9)?,
    })
}

fn appointment_from_row(row: &Row<'_>) -> rusqlite::Result<CachedAppointment> {
    Ok(CachedAppointment {
        id: row.get(0)?,
        payload: json_column(row, 1)?,
        status: row.get(2)?,
        cached_at: Timestamp::from_millis(row.get(3)?),
    })
}
