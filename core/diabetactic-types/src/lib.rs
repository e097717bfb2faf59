//! Shared type definitions for the Diabetactic client core.
//!
//! This crate defines the small, domain-agnostic vocabulary the gateway,
//! storage and sync crates agree on:
//! - Service identifiers (the key for every per-dependency map)
//! - Local record identifiers (UUID v7)
//! - Wall-clock millisecond timestamps used for persisted rows
//!
//! Payload shapes for readings and appointments are deliberately absent:
//! they travel through the core as opaque JSON.

mod ids;
mod timestamp;

pub use ids::{RecordId, ServiceId};
pub use timestamp::{Timestamp, MILLIS_PER_DAY};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid service id: {0:?}")]
    InvalidServiceId(String),
}
