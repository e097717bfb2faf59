//! Opaque key-value store for credentials.
//!
//! How tokens are persisted on the device is the platform's business; the
//! gateway only reads the bearer token when building requests.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Key under which the bearer token is stored.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Credential store consumed by the HTTP transport.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// Process-local secret store.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding a bearer token.
    pub fn with_access_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(ACCESS_TOKEN_KEY, token.into());
        store
    }
}

impl SecretStore for InMemorySecretStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
