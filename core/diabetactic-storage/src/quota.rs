//! Storage quota recovery.
//!
//! When a write fails because the database is full, the guard prunes aged
//! readings and retries the write exactly once. Any other failure, or a
//! second failure after pruning, is returned unchanged.

use crate::error::StorageResult;
use crate::record::{Record, RecordKey};
use diabetactic_types::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Retention horizons for readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaPolicy {
    /// Normal pruning horizon in days.
    pub retention_days: u32,
    /// Shorter horizon used only after a quota failure.
    pub emergency_prune_days: u32,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            retention_days: 90,
            emergency_prune_days: 30,
        }
    }
}

/// A store the guard can protect.
pub trait QuotaTarget {
    /// Inserts a record without any recovery.
    fn add(&self, record: &Record) -> StorageResult<RecordKey>;

    /// Deletes every reading taken strictly before `cutoff`, returning how
    /// many were removed.
    fn prune_readings_before(&self, cutoff: Timestamp) -> StorageResult<usize>;
}

/// Applies a [`QuotaPolicy`] to writes against a [`QuotaTarget`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaGuard {
    policy: QuotaPolicy,
}

impl QuotaGuard {
    pub fn new(policy: QuotaPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Adds `record`, recovering once from a quota failure. If the
    /// emergency prune itself fails, the original quota error is returned.
    pub fn safe_add<T: QuotaTarget + ?Sized>(
        &self,
        target: &T,
        record: &Record,
    ) -> StorageResult<RecordKey> {
        match target.add(record) {
            Err(e) if e.is_quota_exceeded() => {
                warn!(
                    "quota exceeded writing to {}, pruning readings older than {} days",
                    record.table(),
                    self.policy.emergency_prune_days
                );
                match self.prune_old_data(target, self.policy.emergency_prune_days) {
                    Ok(removed) => {
                        info!("emergency prune removed {} readings, retrying write", removed);
                        target.add(record)
                    }
                    Err(prune_err) => {
                        error!("emergency prune failed: {}", prune_err);
                        Err(e)
                    }
                }
            }
            other => other,
        }
    }

    /// Deletes readings older than `days` days. Unsynced readings are not
    /// exempt.
    pub fn prune_old_data<T: QuotaTarget + ?Sized>(
        &self,
        target: &T,
        days: u32,
    ) -> StorageResult<usize> {
        target.prune_readings_before(Timestamp::days_ago(days))
    }
}
