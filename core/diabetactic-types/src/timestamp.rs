//! Wall-clock timestamps for persisted rows.
//!
//! Rows written to the local store (readings, queue items, cached
//! appointments) carry milliseconds since the Unix epoch. Retention and
//! pruning compare these values against the current wall clock, so they
//! must survive process restarts; in-memory deadlines (breaker cooldowns,
//! cache expiry) use monotonic instants instead and never touch this type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds in one day.
pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp at the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    /// Creates a timestamp from raw milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the raw milliseconds.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns the timestamp `days` days before this one.
    #[must_use]
    pub const fn minus_days(&self, days: u32) -> Self {
        Self(self.0.saturating_sub(days as i64 * MILLIS_PER_DAY))
    }

    /// Returns the timestamp `duration` after this one.
    #[must_use]
    pub fn plus(&self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Returns a timestamp `days` days in the past, relative to now.
    #[must_use]
    pub fn days_ago(days: u32) -> Self {
        Self::now().minus_days(days)
    }

    /// Returns true if this timestamp is strictly before `other`.
    #[must_use]
    pub fn is_before(&self, other: &Self) -> bool {
        self < other
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
