//! On-device storage for the Diabetactic client.
//!
//! A single SQLite database holds the data that must survive offline
//! periods:
//!
//! - **readings**: glucose readings, with a `synced` flag and the backend id
//!   once the server has accepted them
//! - **sync_queue**: the durable, ordered log of mutations awaiting delivery
//! - **appointments_cache**: appointments kept for offline display
//!
//! Writes that hit the capacity limit are recovered by the [`QuotaGuard`],
//! which prunes aged readings and retries once.

mod error;
pub mod quota;
mod record;
mod store;

pub use error::{StorageError, StorageResult};
pub use quota::{QuotaGuard, QuotaPolicy, QuotaTarget};
pub use record::{
    CachedAppointment, LocalReading, QueueStatus, Record, RecordKey, StoreEvent, SyncOperation,
    SyncQueueItem, SyncTarget, Table,
};
pub use store::{settle_clear_commit, LocalStore, StoreConfig, StoreStats, SCHEMA_VERSION};
