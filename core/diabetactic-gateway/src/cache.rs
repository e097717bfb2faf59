//! Per-service response cache.
//!
//! Values are stored type-erased and recovered by downcast, so each call
//! site gets back exactly the type it cached. Entries expire lazily: a read
//! past `expires_at` removes the entry and reports a miss.

use crate::config::ServiceRegistry;
use diabetactic_types::ServiceId;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::debug;

/// A cached value with its lifetime.
#[derive(Clone)]
pub struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    stored_at: Instant,
    expires_at: Instant,
}

impl CacheEntry {
    pub fn stored_at(&self) -> Instant {
        self.stored_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("stored_at", &self.stored_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

type CacheKey = (ServiceId, String);

/// Result cache namespaced by service.
pub struct ResponseCache {
    registry: Arc<ServiceRegistry>,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ResponseCache {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached value, if present, unexpired and of type `T`.
    pub fn get<T>(&self, service: &ServiceId, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cache_key = (service.clone(), key.to_string());
        let mut entries = self.lock();
        let entry = entries.get(&cache_key)?;
        if entry.is_expired(Instant::now()) {
            debug!("Cache entry {}/{} expired", service, key);
            entries.remove(&cache_key);
            return None;
        }
        entry.value.downcast_ref::<T>().cloned()
    }

    /// Stores a value for the service's configured lifetime, replacing any
    /// previous entry. Services with a zero lifetime (or unknown services)
    /// are not cached.
    pub fn put<T>(&self, service: &ServiceId, key: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        let Ok(config) = self.registry.get(service) else {
            return;
        };
        let ttl = config.cache_duration();
        if ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let entry = CacheEntry {
            value: Arc::new(value),
            stored_at: now,
            expires_at: now + ttl,
        };
        self.lock().insert((service.clone(), key.to_string()), entry);
    }

    /// Metadata for an entry, expired or not.
    pub fn entry(&self, service: &ServiceId, key: &str) -> Option<CacheEntry> {
        self.lock().get(&(service.clone(), key.to_string())).cloned()
    }

    /// Removes every entry belonging to `service`.
    pub fn clear(&self, service: &ServiceId) {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(owner, _), _| owner != service);
        debug!("Cleared {} cache entries for {}", before - entries.len(), service);
    }

    /// Removes everything.
    pub fn clear_all(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
