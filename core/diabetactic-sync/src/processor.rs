//! Sync queue processor.
//!
//! Mutations that cannot reach their service are written to the local
//! `sync_queue` table and replayed later, strictly in enqueue order, through
//! the [`RequestGateway`]. Replay outcomes:
//!
//! | Outcome | Queue item | Report |
//! |---|---|---|
//! | success | removed (reading marked synced) | `processed` |
//! | conflict | kept with status `Conflict` | `conflicts` |
//! | transient failure | kept, `retry_count + 1` | `deferred` |
//! | non-retryable failure | removed | `failed` |
//!
//! After a transient failure the remaining items of the same service are
//! deferred for the rest of the pass so they never overtake it. Items queued
//! behind an unresolved conflict are held the same way until
//! [`SyncQueueProcessor::resolve_conflict`] settles it. Items addressed to a
//! service that is no longer registered are reported as failed and removed.

use crate::error::{SyncError, SyncResult};
use crate::replayer::{HttpReplayer, SyncReplayer};
use diabetactic_gateway::{ErrorKind, GatewayError, RequestGateway, RequestOptions};
use diabetactic_storage::{
    LocalReading, LocalStore, QueueStatus, Record, RecordKey, StorageError, SyncOperation,
    SyncQueueItem, SyncTarget,
};
use diabetactic_types::{ServiceId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default maximum number of items replayed per drain.
pub const MAX_BATCH_SIZE: usize = 100;

/// Sync processor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum items replayed per drain; the rest are deferred.
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
        }
    }
}

/// A queue item together with the error its replay produced.
#[derive(Debug, Clone)]
pub struct FailedItem {
    pub item: SyncQueueItem,
    pub error: GatewayError,
}

/// Result of one [`SyncQueueProcessor::drain`] pass.
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    /// Delivered and removed from the queue, in replay order.
    pub processed: Vec<SyncQueueItem>,
    /// Rejected as conflicting; still queued until resolved.
    pub conflicts: Vec<FailedItem>,
    /// Rejected as invalid; removed from the queue.
    pub failed: Vec<FailedItem>,
    /// Still pending: failed transiently, skipped to preserve order, or
    /// beyond the batch size.
    pub deferred: Vec<SyncQueueItem>,
}

impl DrainReport {
    /// True when every attempted item was delivered.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.failed.is_empty() && self.deferred.is_empty()
    }
}

/// Result of [`SyncQueueProcessor::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The service accepted the mutation; carries the response body.
    Delivered(serde_json::Value),
    /// The mutation was queued under this sequence id.
    Queued(i64),
}

/// How to settle a conflicted queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Put the item back in the pending queue.
    Retry,
    /// Drop the item.
    Discard,
}

/// Replays queued mutations through the gateway.
pub struct SyncQueueProcessor {
    gateway: Arc<RequestGateway>,
    store: Arc<LocalStore>,
    replayer: Arc<dyn SyncReplayer>,
    config: SyncConfig,
    /// Serializes drains so no item is replayed twice concurrently.
    draining: Mutex<()>,
}

impl SyncQueueProcessor {
    pub fn new(
        gateway: Arc<RequestGateway>,
        store: Arc<LocalStore>,
        replayer: Arc<dyn SyncReplayer>,
        config: SyncConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            replayer,
            config,
            draining: Mutex::new(()),
        }
    }

    /// Creates a processor replaying over HTTP with the gateway's transport.
    pub fn with_http(
        gateway: Arc<RequestGateway>,
        store: Arc<LocalStore>,
        config: SyncConfig,
    ) -> Self {
        let replayer = Arc::new(HttpReplayer::for_gateway(&gateway));
        Self::new(gateway, store, replayer, config)
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<RequestGateway> {
        &self.gateway
    }

    /// Queues a mutation and returns its sequence id.
    pub fn enqueue(&self, item: SyncQueueItem) -> SyncResult<i64> {
        let record = Record::from(item);
        let seq = match self.store.safe_add(&record)? {
            RecordKey::QueueItem(seq) => seq,
            other => {
                return Err(StorageError::InvalidData(format!(
                    "queue insert returned {other}"
                ))
                .into());
            }
        };
        debug!("Queued sync item {} for {}", seq, record.table());
        Ok(seq)
    }

    /// Sends a mutation now if its service is reachable, otherwise queues it.
    ///
    /// Retryable failures (offline, breaker open, timeouts, 5xx) queue the
    /// mutation when the service allows offline work; any other failure is
    /// returned to the caller.
    pub async fn submit(&self, mut item: SyncQueueItem) -> SyncResult<SubmitOutcome> {
        match self.replay(&item).await {
            Ok(body) => {
                self.mark_synced(&item, &body)?;
                Ok(SubmitOutcome::Delivered(body))
            }
            Err(e) if e.is_retryable() && self.supports_offline(&item.service) => {
                debug!("{} not reachable ({}), queueing mutation", item.service, e);
                item.last_error = Some(e.to_string());
                self.enqueue(item).map(SubmitOutcome::Queued)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stores a reading locally, then submits its `Create` mutation to
    /// `path` on `service`.
    pub async fn record_reading(
        &self,
        reading: LocalReading,
        service: ServiceId,
        path: impl Into<String>,
    ) -> SyncResult<SubmitOutcome> {
        let target = SyncTarget::new(path).for_record(reading.id);
        let payload = reading.value.clone();
        self.store.safe_add(&reading.into())?;
        self.submit(SyncQueueItem::new(
            SyncOperation::Create,
            service,
            target,
            payload,
        ))
        .await
    }

    /// Replays pending items in enqueue order.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        let _draining = self.draining.lock().await;
        let pending = self.store.pending_sync_items()?;
        let mut report = DrainReport::default();
        if pending.is_empty() {
            return Ok(report);
        }
        info!("Draining {} queued mutations", pending.len());

        let held = self.earliest_conflicts()?;
        let mut blocked: HashSet<ServiceId> = HashSet::new();
        let mut attempted = 0;

        for mut item in pending {
            if attempted >= self.config.batch_size || blocked.contains(&item.service) {
                report.deferred.push(item);
                continue;
            }
            if held
                .get(&item.service)
                .is_some_and(|first| *first < (item.enqueued_at, item.seq))
            {
                debug!(
                    "{} has an unresolved conflict, holding item {}",
                    item.service, item.seq
                );
                blocked.insert(item.service.clone());
                report.deferred.push(item);
                continue;
            }
            if !self.gateway.registry().contains(&item.service) {
                let error = GatewayError::UnknownService(item.service.clone());
                warn!("Dropping item {}: {}", item.seq, error);
                self.store.delete(&RecordKey::QueueItem(item.seq))?;
                report.failed.push(FailedItem { item, error });
                continue;
            }
            if !self.gateway.is_service_available(&item.service) {
                debug!("{} unavailable, deferring item {}", item.service, item.seq);
                blocked.insert(item.service.clone());
                report.deferred.push(item);
                continue;
            }

            attempted += 1;
            match self.replay(&item).await {
                Ok(body) => {
                    self.mark_synced(&item, &body)?;
                    self.store.delete(&RecordKey::QueueItem(item.seq))?;
                    report.processed.push(item);
                }
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    warn!(
                        "Conflict replaying item {} to {}: {}",
                        item.seq, item.service, e
                    );
                    item.status = QueueStatus::Conflict;
                    item.last_error = Some(e.to_string());
                    self.store.update(&item.clone().into())?;
                    blocked.insert(item.service.clone());
                    report.conflicts.push(FailedItem { item, error: e });
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Replay of item {} to {} failed, will retry: {}",
                        item.seq, item.service, e
                    );
                    item.retry_count += 1;
                    item.last_error = Some(e.to_string());
                    self.store.update(&item.clone().into())?;
                    blocked.insert(item.service.clone());
                    report.deferred.push(item);
                }
                Err(e) => {
                    warn!(
                        "Dropping item {} rejected by {}: {}",
                        item.seq, item.service, e
                    );
                    self.store.delete(&RecordKey::QueueItem(item.seq))?;
                    report.failed.push(FailedItem { item, error: e });
                }
            }
        }

        info!(
            "Drain finished: {} processed, {} conflicts, {} failed, {} deferred",
            report.processed.len(),
            report.conflicts.len(),
            report.failed.len(),
            report.deferred.len()
        );
        Ok(report)
    }

    /// Settles a conflicted item.
    pub fn resolve_conflict(&self, seq: i64, resolution: ConflictResolution) -> SyncResult<()> {
        let key = RecordKey::QueueItem(seq);
        let mut item = match self.store.get(&key)? {
            Some(Record::QueueItem(item)) => item,
            _ => return Err(SyncError::ItemNotFound(seq)),
        };
        if item.status != QueueStatus::Conflict {
            return Err(SyncError::NotInConflict(seq));
        }

        match resolution {
            ConflictResolution::Retry => {
                item.status = QueueStatus::Pending;
                item.last_error = None;
                self.store.update(&item.into())?;
            }
            ConflictResolution::Discard => {
                self.store.delete(&key)?;
            }
        }
        info!("Resolved conflict on item {} with {:?}", seq, resolution);
        Ok(())
    }

    /// Items waiting for conflict resolution, in enqueue order.
    pub fn conflicts(&self) -> SyncResult<Vec<SyncQueueItem>> {
        Ok(self.store.sync_items_with_status(QueueStatus::Conflict)?)
    }

    /// Number of items waiting to be replayed.
    pub fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.store.pending_sync_items()?.len())
    }

    /// Spawns a task that drains the queue each time the network comes
    /// back online.
    ///
    /// The task only holds a weak reference to the processor. It ends once
    /// the processor has been dropped, either immediately when that also
    /// drops the network signal or at the next network change otherwise.
    pub fn spawn_auto_drain(self: &Arc<Self>) -> JoinHandle<()> {
        let processor: Weak<Self> = Arc::downgrade(self);
        let mut online = self.gateway.network().subscribe();
        tokio::spawn(async move {
            let mut was_online = *online.borrow_and_update();
            while online.changed().await.is_ok() {
                let Some(processor) = processor.upgrade() else {
                    break;
                };
                let is_online = *online.borrow_and_update();
                if is_online && !was_online {
                    info!("Network restored, draining sync queue");
                    if let Err(e) = processor.drain().await {
                        warn!("Auto-drain failed: {}", e);
                    }
                }
                was_online = is_online;
            }
            debug!("Sync processor or network signal gone, stopping auto-drain");
        })
    }

    /// Position of the earliest unresolved conflict per service.
    fn earliest_conflicts(&self) -> SyncResult<HashMap<ServiceId, (Timestamp, i64)>> {
        let mut held: HashMap<ServiceId, (Timestamp, i64)> = HashMap::new();
        for item in self.store.sync_items_with_status(QueueStatus::Conflict)? {
            let position = (item.enqueued_at, item.seq);
            held.entry(item.service)
                .and_modify(|first| *first = (*first).min(position))
                .or_insert(position);
        }
        Ok(held)
    }

    fn supports_offline(&self, service: &ServiceId) -> bool {
        self.gateway
            .get_service_config(service)
            .map(|config| config.offline_support)
            .unwrap_or(false)
    }

    async fn replay(&self, item: &SyncQueueItem) -> Result<serde_json::Value, GatewayError> {
        self.gateway
            .execute_request(
                &item.service,
                || self.replayer.replay(item),
                RequestOptions::new(),
            )
            .await
    }

    /// Flags the local reading a delivered `Create`/`Update` refers to.
    fn mark_synced(&self, item: &SyncQueueItem, body: &serde_json::Value) -> SyncResult<()> {
        let Some(record_id) = item.target.record_id else {
            return Ok(());
        };
        if !matches!(item.operation, SyncOperation::Create | SyncOperation::Update) {
            return Ok(());
        }
        match self.store.mark_reading_synced(record_id, backend_id(body)) {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Extracts the server-assigned id from a response body.
fn backend_id(body: &serde_json::Value) -> Option<String> {
    match body.get("id")? {
        serde_json::Value::String(id) => Some(id.clone()),
        serde_json::Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
