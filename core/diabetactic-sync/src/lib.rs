//! Offline sync for the Diabetactic client.
//!
//! Mutations that cannot be delivered immediately are persisted in the
//! local store's sync queue and replayed later through the request gateway,
//! in the order they were made. Conflicts are reported and held for the
//! user; they are never merged automatically.
//!
//! # Example
//!
//! ```
//! use diabetactic_gateway::{GatewayConfig, NetworkMonitor, RequestGateway, API_GATEWAY};
//! use diabetactic_gateway::transport::mock::MockTransport;
//! use diabetactic_storage::{LocalReading, LocalStore};
//! use diabetactic_sync::{SubmitOutcome, SyncConfig, SyncQueueProcessor};
//! use diabetactic_types::{ServiceId, Timestamp};
//! use std::sync::Arc;
//!
//! # async fn example() -> diabetactic_sync::SyncResult<()> {
//! let network = Arc::new(NetworkMonitor::new(false));
//! let gateway = Arc::new(RequestGateway::new(
//!     GatewayConfig::default(),
//!     Arc::new(MockTransport::new()),
//!     network.clone(),
//! )?);
//! let store = Arc::new(LocalStore::open_in_memory()?);
//! let processor = Arc::new(SyncQueueProcessor::with_http(gateway, store, SyncConfig::default()));
//!
//! // Offline: the reading is kept locally and its upload queued.
//! let reading = LocalReading::new(serde_json::json!({"glucose": 112}), Timestamp::now());
//! let outcome = processor
//!     .record_reading(reading, ServiceId::new(API_GATEWAY), "/glucose/create")
//!     .await?;
//! assert!(matches!(outcome, SubmitOutcome::Queued(_)));
//!
//! network.set_online(true);
//! let report = processor.drain().await?;
//! assert_eq!(report.processed.len(), 1);
//! # Ok(())
//! # }
//! ```

mod error;
mod processor;
pub mod replayer;

pub use error::{SyncError, SyncResult};
pub use processor::{
    ConflictResolution, DrainReport, FailedItem, SubmitOutcome, SyncConfig, SyncQueueProcessor,
    MAX_BATCH_SIZE,
};
pub use replayer::{method_for, HttpReplayer, SyncReplayer};
