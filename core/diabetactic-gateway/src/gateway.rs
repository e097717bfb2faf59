//! Request gateway: the single entry point for calls to dependencies.
//!
//! For every call the gateway consults the response cache, then the
//! availability gates (network signal, circuit breaker, last health probe),
//! then runs the operation under the service timeout and feeds the outcome
//! back into the breaker and cache.

use crate::cache::ResponseCache;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerState};
use crate::config::{GatewayConfig, ServiceConfig, ServiceRegistry};
use crate::error::{GatewayError, GatewayResult};
use crate::health::{HealthMonitor, HealthRecord, HealthStatus};
use crate::network::NetworkMonitor;
use crate::transport::{HttpMethod, HttpRequest, HttpTransport};
use diabetactic_types::ServiceId;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Caller-supplied substitute value.
pub type Fallback<'a, T> = Box<dyn FnOnce() -> T + Send + 'a>;

/// Per-call options for [`RequestGateway::execute_request`].
pub struct RequestOptions<'a, T> {
    /// Cache slot for the result. No caching when `None`.
    pub cache_key: Option<String>,
    /// Skip the cache lookup (the result is still stored).
    pub force_refresh: bool,
    /// Used when the call is skipped or fails.
    pub fallback: Option<Fallback<'a, T>>,
}

impl<T> Default for RequestOptions<'_, T> {
    fn default() -> Self {
        Self {
            cache_key: None,
            force_refresh: false,
            fallback: None,
        }
    }
}

impl<'a, T> RequestOptions<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn fallback(mut self, fallback: impl FnOnce() -> T + Send + 'a) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }
}

/// Orchestrates availability checks, caching, timeouts and fallbacks.
///
/// Built once at the composition root and shared by `Arc`.
pub struct RequestGateway {
    registry: Arc<ServiceRegistry>,
    breaker: Arc<CircuitBreaker>,
    health: Arc<HealthMonitor>,
    cache: Arc<ResponseCache>,
    network: Arc<NetworkMonitor>,
    transport: Arc<dyn HttpTransport>,
}

impl RequestGateway {
    /// Wires the registry, breaker, health monitor and cache together.
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn HttpTransport>,
        network: Arc<NetworkMonitor>,
    ) -> GatewayResult<Self> {
        let registry = Arc::new(ServiceRegistry::new(config)?);
        let breaker = Arc::new(CircuitBreaker::new(&registry));
        let health = Arc::new(HealthMonitor::new(
            registry.clone(),
            breaker.clone(),
            transport.clone(),
        ));
        let cache = Arc::new(ResponseCache::new(registry.clone()));
        Ok(Self {
            registry,
            breaker,
            health,
            cache,
            network,
            transport,
        })
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.network
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// Runs `operation` against `service` with caching, breaker gating,
    /// timeout and fallback handling.
    pub async fn execute_request<T, F, Fut>(
        &self,
        service: &ServiceId,
        operation: F,
        options: RequestOptions<'_, T>,
    ) -> GatewayResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let config = self.registry.get(service)?;
        let RequestOptions {
            cache_key,
            force_refresh,
            fallback,
        } = options;

        if let Some(key) = cache_key.as_deref() {
            if !force_refresh {
                if let Some(hit) = self.cache.get::<T>(service, key) {
                    debug!("Cache hit for {}/{}", service, key);
                    return Ok(hit);
                }
            }
        }

        if let Err(reason) = self.availability(service) {
            if let Some(fallback) = fallback {
                debug!("{} unavailable ({}), using fallback", service, reason);
                return Ok(fallback());
            }
            return Err(GatewayError::ServiceUnavailable {
                service: service.clone(),
                reason,
            });
        }

        let result = match tokio::time::timeout(config.timeout(), operation()).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                service: service.clone(),
                timeout_ms: config.timeout_ms,
            }),
        };

        match result {
            Ok(value) => {
                self.breaker.record_success(service);
                if let Some(key) = cache_key.as_deref() {
                    self.cache.put(service, key, value.clone());
                }
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure(service);
                match fallback {
                    Some(fallback) => {
                        warn!("{} call failed ({}), using fallback", service, e);
                        Ok(fallback())
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Whether a call to `service` would be attempted right now.
    ///
    /// May move an Open circuit whose cooldown elapsed to HalfOpen.
    pub fn is_service_available(&self, service: &ServiceId) -> bool {
        self.availability(service).is_ok()
    }

    fn availability(&self, service: &ServiceId) -> Result<(), String> {
        if !self.network.is_online() {
            return Err("network offline".to_string());
        }
        if !self.breaker.can_attempt(service) {
            return Err("circuit breaker open".to_string());
        }
        if self.health.health(service).status == HealthStatus::Unhealthy {
            return Err("last health check failed".to_string());
        }
        Ok(())
    }

    /// Probes a service now.
    pub async fn check_service(&self, service: &ServiceId) -> GatewayResult<HealthRecord> {
        self.health.check_service(service).await
    }

    /// Fleet-wide health derived from the latest probes.
    pub fn overall_health(&self) -> HealthStatus {
        self.health.overall_health()
    }

    pub fn get_circuit_breaker_state(
        &self,
        service: &ServiceId,
    ) -> GatewayResult<CircuitBreakerState> {
        self.breaker
            .state(service)
            .ok_or_else(|| GatewayError::UnknownService(service.clone()))
    }

    pub fn reset_circuit_breaker(&self, service: &ServiceId) -> GatewayResult<()> {
        self.registry.get(service)?;
        self.breaker.reset(service);
        Ok(())
    }

    pub fn clear_cache(&self, service: &ServiceId) -> GatewayResult<()> {
        self.registry.get(service)?;
        self.cache.clear(service);
        Ok(())
    }

    pub fn get_service_config(&self, service: &ServiceId) -> GatewayResult<ServiceConfig> {
        self.registry.get(service).cloned()
    }

    /// GETs `path` on `service` and decodes the JSON body, through
    /// [`execute_request`](Self::execute_request).
    pub async fn get_json<T>(
        &self,
        service: &ServiceId,
        path: &str,
        options: RequestOptions<'_, T>,
    ) -> GatewayResult<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.send_json(service, HttpMethod::Get, path, None, options)
            .await
    }

    /// Sends a JSON request to `path` on `service` and decodes the JSON
    /// response, through [`execute_request`](Self::execute_request).
    pub async fn send_json<T>(
        &self,
        service: &ServiceId,
        method: HttpMethod,
        path: &str,
        body: Option<serde_json::Value>,
        options: RequestOptions<'_, T>,
    ) -> GatewayResult<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let config = self.registry.get(service)?;
        let url = config.url_for(path).ok_or_else(|| {
            GatewayError::Config(format!("{service} has no base URL"))
        })?;
        let timeout = config.timeout();
        let mut request = HttpRequest::new(method, url);
        if let Some(body) = body {
            request = request.with_body(body);
        }

        let transport = self.transport.clone();
        self.execute_request(
            service,
            || async move {
                transport
                    .send(service, request, timeout)
                    .await?
                    .error_for_status(service)?
                    .json::<T>()
            },
            options,
        )
        .await
    }
}
