//! Active health probes.
//!
//! A probe is distinct from a business call: it hits the service's health
//! endpoint (or its base URL as a plain reachability check), measures the
//! latency, and feeds the outcome into the circuit breaker.

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{ServiceConfig, ServiceRegistry};
use crate::error::{GatewayError, GatewayResult};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use diabetactic_types::{ServiceId, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Probe outcome for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Reachable but slow.
    Degraded,
    Unhealthy,
    /// Never probed; treated as available.
    Unknown,
}

/// Latest probe result for a service. Replaced wholesale on every probe.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthRecord {
    pub service_id: ServiceId,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub last_checked_at: Option<Timestamp>,
    pub message: Option<String>,
}

impl HealthRecord {
    /// The pre-probe record.
    pub fn unknown(service_id: ServiceId) -> Self {
        Self {
            service_id,
            status: HealthStatus::Unknown,
            response_time_ms: 0,
            last_checked_at: None,
            message: None,
        }
    }

    /// True unless the last probe failed.
    pub fn is_available(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

/// Tracks probe results and drives the breaker from them.
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    breaker: Arc<CircuitBreaker>,
    transport: Arc<dyn HttpTransport>,
    records: Mutex<HashMap<ServiceId, HealthRecord>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        breaker: Arc<CircuitBreaker>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let records = registry
            .ids()
            .map(|id| (id.clone(), HealthRecord::unknown(id.clone())))
            .collect();
        Self {
            registry,
            breaker,
            transport,
            records: Mutex::new(records),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ServiceId, HealthRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current record for a service (`Unknown` until probed).
    pub fn health(&self, service: &ServiceId) -> HealthRecord {
        self.lock()
            .get(service)
            .cloned()
            .unwrap_or_else(|| HealthRecord::unknown(service.clone()))
    }

    /// Records for every registered service, in registration order.
    pub fn all_health(&self) -> Vec<HealthRecord> {
        let records = self.lock();
        self.registry
            .ids()
            .map(|id| {
                records
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| HealthRecord::unknown(id.clone()))
            })
            .collect()
    }

    /// Probes a service and records the result.
    ///
    /// While the breaker refuses attempts the service is reported Unhealthy
    /// without any network traffic.
    pub async fn check_service(&self, service: &ServiceId) -> GatewayResult<HealthRecord> {
        let config = self.registry.get(service)?.clone();

        if !self.breaker.can_attempt(service) {
            debug!("Skipping probe of {}: circuit open", service);
            let record = HealthRecord {
                service_id: service.clone(),
                status: HealthStatus::Unhealthy,
                response_time_ms: 0,
                last_checked_at: Some(Timestamp::now()),
                message: Some("circuit breaker open".to_string()),
            };
            self.lock().insert(service.clone(), record.clone());
            return Ok(record);
        }

        let started = Instant::now();
        let outcome = self.probe_with_retry(&config).await;
        let elapsed = started.elapsed().as_millis() as u64;

        let record = match outcome {
            Ok(()) => {
                self.breaker.record_success(service);
                let slow = elapsed > config.timeout_ms / 2;
                HealthRecord {
                    service_id: service.clone(),
                    status: if slow {
                        HealthStatus::Degraded
                    } else {
                        HealthStatus::Healthy
                    },
                    response_time_ms: elapsed,
                    last_checked_at: Some(Timestamp::now()),
                    message: slow.then(|| format!("slow response: {elapsed}ms")),
                }
            }
            Err(e) => {
                warn!("Health probe for {} failed: {}", service, e);
                self.breaker.record_failure(service);
                HealthRecord {
                    service_id: service.clone(),
                    status: HealthStatus::Unhealthy,
                    response_time_ms: elapsed,
                    last_checked_at: Some(Timestamp::now()),
                    message: Some(e.to_string()),
                }
            }
        };

        self.lock().insert(service.clone(), record.clone());
        Ok(record)
    }

    /// Probes every registered service.
    pub async fn check_all(&self) -> Vec<HealthRecord> {
        let ids: Vec<ServiceId> = self.registry.ids().cloned().collect();
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.check_service(&id).await {
                Ok(record) => records.push(record),
                Err(e) => warn!("Health check for {} skipped: {}", id, e),
            }
        }
        records
    }

    /// Fleet health: Unhealthy if every service is, Degraded if some are,
    /// Healthy otherwise (Unknown and Degraded services count as up).
    pub fn overall_health(&self) -> HealthStatus {
        let records = self.all_health();
        if records.is_empty() {
            return HealthStatus::Unknown;
        }
        let unhealthy = records
            .iter()
            .filter(|r| r.status == HealthStatus::Unhealthy)
            .count();
        if unhealthy == 0 {
            HealthStatus::Healthy
        } else if unhealthy == records.len() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        }
    }

    async fn probe_with_retry(&self, config: &ServiceConfig) -> GatewayResult<()> {
        match self.probe_once(config).await {
            Err(e) if e.is_transient_transport() => {
                debug!("Retrying probe of {} after transient failure: {}", config.id, e);
                self.probe_once(config).await
            }
            other => other,
        }
    }

    async fn probe_once(&self, config: &ServiceConfig) -> GatewayResult<()> {
        let Some(url) = config.url_for(config.health_path.as_deref().unwrap_or("")) else {
            // On-device services have nothing to reach.
            return Ok(());
        };

        let send = self
            .transport
            .send(&config.id, HttpRequest::get(url), config.timeout());
        let response = tokio::time::timeout(config.timeout(), send)
            .await
            .map_err(|_| GatewayError::Timeout {
                service: config.id.clone(),
                timeout_ms: config.timeout_ms,
            })??;

        if probe_succeeded(config, &response) {
            debug!("{} responded {} to health probe", config.id, response.status);
            Ok(())
        } else {
            Err(GatewayError::from_status(
                config.id.clone(),
                response.status,
                response.body,
            ))
        }
    }
}

fn probe_succeeded(config: &ServiceConfig, response: &HttpResponse) -> bool {
    if config.health_path.is_some() {
        response.is_success()
    } else {
        response.status < 500
    }
}
