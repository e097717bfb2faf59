//! Service registry: static configuration per remote dependency.

use crate::error::{GatewayError, GatewayResult};
use diabetactic_types::ServiceId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Service id of the main public API.
pub const API_GATEWAY: &str = "api-gateway";
/// Service id of the Tidepool data platform.
pub const TIDEPOOL: &str = "tidepool";
/// Service id of the on-device store.
pub const LOCAL_STORAGE: &str = "local-storage";

/// Configuration for a single dependency. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Registry key.
    pub id: ServiceId,
    /// Human-readable name for diagnostics.
    pub display_name: String,
    /// Base URL. `None` for on-device services that are never probed.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Path of a dedicated health endpoint, relative to `base_url`.
    #[serde(default)]
    pub health_path: Option<String>,
    /// Per-call timeout.
    pub timeout_ms: u64,
    /// Consecutive failures that open the circuit.
    pub circuit_breaker_threshold: u32,
    /// Lifetime of cached responses. Zero disables caching.
    #[serde(default)]
    pub cache_duration_ms: u64,
    /// Whether mutations may be queued locally while the service is away.
    #[serde(default)]
    pub offline_support: bool,
}

impl ServiceConfig {
    /// Returns the call timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns the cache lifetime as a `Duration`.
    pub fn cache_duration(&self) -> Duration {
        Duration::from_millis(self.cache_duration_ms)
    }

    /// Joins `path` onto the base URL.
    pub fn url_for(&self, path: &str) -> Option<String> {
        let base = self.base_url.as_deref()?.trim_end_matches('/');
        if path.is_empty() {
            return Some(base.to_string());
        }
        Some(format!("{}/{}", base, path.trim_start_matches('/')))
    }

    fn validate(&self) -> GatewayResult<()> {
        if self.id.as_str().is_empty() {
            return Err(GatewayError::Config("service id must not be empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(GatewayError::Config(format!(
                "{}: timeout_ms must be positive",
                self.id
            )));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(GatewayError::Config(format!(
                "{}: circuit_breaker_threshold must be positive",
                self.id
            )));
        }
        Ok(())
    }
}

/// Cooldown growth for an open circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Cooldown after the first trip (ms).
    pub base_ms: u64,
    /// Upper bound for the cooldown (ms).
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 30_000,
            max_ms: 300_000,
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> GatewayResult<()> {
        if self.base_ms == 0 {
            return Err(GatewayError::Config("backoff base_ms must be positive".into()));
        }
        if self.max_ms < self.base_ms {
            return Err(GatewayError::Config(format!(
                "backoff max_ms ({}) must not be below base_ms ({})",
                self.max_ms, self.base_ms
            )));
        }
        Ok(())
    }

    /// Cooldown for a circuit that has seen `excess` failures beyond its
    /// threshold: `base * 2^excess`, capped at `max`.
    pub fn cooldown(&self, excess: u32) -> Duration {
        let factor = 1u64.checked_shl(excess.min(32)).unwrap_or(u64::MAX);
        let ms = self.base_ms.saturating_mul(factor).min(self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Registered services.
    pub services: Vec<ServiceConfig>,
    /// Breaker cooldown policy shared by all services.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            services: vec![
                ServiceConfig {
                    id: ServiceId::new(API_GATEWAY),
                    display_name: "Diabetactic API".to_string(),
                    base_url: Some("http://localhost:8004".to_string()),
                    health_path: Some("/health".to_string()),
                    timeout_ms: 10_000,
                    circuit_breaker_threshold: 5,
                    cache_duration_ms: 5 * 60 * 1000,
                    offline_support: true,
                },
                ServiceConfig {
                    id: ServiceId::new(TIDEPOOL),
                    display_name: "Tidepool".to_string(),
                    base_url: Some("https://api.tidepool.org".to_string()),
                    health_path: None,
                    timeout_ms: 30_000,
                    circuit_breaker_threshold: 3,
                    cache_duration_ms: 15 * 60 * 1000,
                    offline_support: false,
                },
                ServiceConfig {
                    id: ServiceId::new(LOCAL_STORAGE),
                    display_name: "On-device storage".to_string(),
                    base_url: None,
                    health_path: None,
                    timeout_ms: 5_000,
                    circuit_breaker_threshold: 3,
                    cache_duration_ms: 0,
                    offline_support: true,
                },
            ],
            backoff: BackoffConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Parses a JSON configuration document.
    pub fn from_json_str(json: &str) -> GatewayResult<Self> {
        serde_json::from_str(json).map_err(|e| GatewayError::Config(format!("invalid JSON: {e}")))
    }

    /// Loads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }
}

/// Immutable lookup table of service configurations.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: HashMap<ServiceId, ServiceConfig>,
    order: Vec<ServiceId>,
    backoff: BackoffConfig,
}

impl ServiceRegistry {
    /// Builds a registry, rejecting duplicate ids, invalid entries and a
    /// backoff that could produce a zero cooldown.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        config.backoff.validate()?;
        let mut services = HashMap::with_capacity(config.services.len());
        let mut order = Vec::with_capacity(config.services.len());
        for service in config.services {
            service.validate()?;
            if services.contains_key(&service.id) {
                return Err(GatewayError::Config(format!(
                    "duplicate service id: {}",
                    service.id
                )));
            }
            order.push(service.id.clone());
            services.insert(service.id.clone(), service);
        }
        Ok(Self {
            services,
            order,
            backoff: config.backoff,
        })
    }

    /// Looks up a service.
    pub fn get(&self, id: &ServiceId) -> GatewayResult<&ServiceConfig> {
        self.services
            .get(id)
            .ok_or_else(|| GatewayError::UnknownService(id.clone()))
    }

    /// Returns true if the service is registered.
    pub fn contains(&self, id: &ServiceId) -> bool {
        self.services.contains_key(id)
    }

    /// Service ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &ServiceId> {
        self.order.iter()
    }

    /// Service configs in registration order.
    pub fn services(&self) -> impl Iterator<Item = &ServiceConfig> {
        self.order.iter().filter_map(|id| self.services.get(id))
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true when no service is registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Breaker cooldown policy.
    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }
}
