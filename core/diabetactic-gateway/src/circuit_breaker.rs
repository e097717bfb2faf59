//! Per-service circuit breaker.
//!
//! Each registered service owns one [`CircuitBreakerState`], created when the
//! breaker is built from the registry. States change only through the
//! transition methods on that type; callers outside this module receive
//! cloned snapshots.
//!
//! HalfOpen admission is permissive: every caller that asks while the circuit
//! is HalfOpen is let through, so concurrent callers can all probe the
//! service during the trial window.

use crate::config::{BackoffConfig, ServiceRegistry};
use diabetactic_types::ServiceId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are refused until the cooldown elapses.
    Open,
    /// Cooldown elapsed; trial calls are admitted.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// Failure-tracking state for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerState {
    service_id: ServiceId,
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
}

impl CircuitBreakerState {
    fn new(service_id: ServiceId) -> Self {
        Self {
            service_id,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            next_attempt_at: None,
        }
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn last_failure_at(&self) -> Option<Instant> {
        self.last_failure_at
    }

    /// Set only while the circuit is Open.
    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.next_attempt_at
    }

    fn on_failure(&mut self, now: Instant, threshold: u32, backoff: &BackoffConfig) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);
        if self.failure_count >= threshold {
            let cooldown = backoff.cooldown(self.failure_count - threshold);
            self.state = CircuitState::Open;
            self.next_attempt_at = Some(now + cooldown);
        }
    }

    fn on_success(&mut self) {
        self.failure_count = 0;
        self.state = CircuitState::Closed;
        self.next_attempt_at = None;
    }

    fn admit(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match self.next_attempt_at {
                Some(at) if now < at => false,
                _ => {
                    self.state = CircuitState::HalfOpen;
                    self.next_attempt_at = None;
                    true
                }
            },
        }
    }

    fn reset(&mut self) {
        self.failure_count = 0;
        self.state = CircuitState::Closed;
        self.last_failure_at = None;
        self.next_attempt_at = None;
    }
}

/// Breaker registry covering every known service.
pub struct CircuitBreaker {
    states: Mutex<HashMap<ServiceId, CircuitBreakerState>>,
    thresholds: HashMap<ServiceId, u32>,
    backoff: BackoffConfig,
}

impl CircuitBreaker {
    /// Creates one Closed breaker per registered service.
    pub fn new(registry: &ServiceRegistry) -> Self {
        let mut states = HashMap::with_capacity(registry.len());
        let mut thresholds = HashMap::with_capacity(registry.len());
        for service in registry.services() {
            states.insert(
                service.id.clone(),
                CircuitBreakerState::new(service.id.clone()),
            );
            thresholds.insert(service.id.clone(), service.circuit_breaker_threshold);
        }
        Self {
            states: Mutex::new(states),
            thresholds,
            backoff: registry.backoff().clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ServiceId, CircuitBreakerState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a failed call. Opens the circuit once the threshold is hit.
    pub fn record_failure(&self, service: &ServiceId) {
        let Some(&threshold) = self.thresholds.get(service) else {
            warn!("record_failure for unknown service {}", service);
            return;
        };
        let mut states = self.lock();
        let Some(entry) = states.get_mut(service) else {
            return;
        };
        let before = entry.state;
        entry.on_failure(Instant::now(), threshold, &self.backoff);
        if entry.state == CircuitState::Open && before != CircuitState::Open {
            info!(
                "Circuit for {} opened after {} consecutive failures",
                service, entry.failure_count
            );
        } else {
            debug!(
                "Failure recorded for {} ({}/{})",
                service, entry.failure_count, threshold
            );
        }
    }

    /// Records a successful call: count to zero, circuit Closed.
    pub fn record_success(&self, service: &ServiceId) {
        let mut states = self.lock();
        let Some(entry) = states.get_mut(service) else {
            warn!("record_success for unknown service {}", service);
            return;
        };
        if entry.state != CircuitState::Closed {
            info!("Circuit for {} closed", service);
        }
        entry.on_success();
    }

    /// Returns whether a call may be attempted now.
    ///
    /// An Open circuit whose cooldown has elapsed moves to HalfOpen here.
    /// Unknown services are never admitted.
    pub fn can_attempt(&self, service: &ServiceId) -> bool {
        let mut states = self.lock();
        let Some(entry) = states.get_mut(service) else {
            return false;
        };
        let was_open = entry.state == CircuitState::Open;
        let admitted = entry.admit(Instant::now());
        if was_open && admitted {
            debug!("Circuit for {} half-open, admitting trial call", service);
        }
        admitted
    }

    /// Forces the circuit Closed and clears all failure bookkeeping.
    pub fn reset(&self, service: &ServiceId) {
        if let Some(entry) = self.lock().get_mut(service) {
            entry.reset();
            info!("Circuit for {} reset", service);
        }
    }

    /// Snapshot of a service's breaker.
    pub fn state(&self, service: &ServiceId) -> Option<CircuitBreakerState> {
        self.lock().get(service).cloned()
    }

    /// Snapshots of every breaker.
    pub fn all_states(&self) -> Vec<CircuitBreakerState> {
        let mut all: Vec<_> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        all
    }
}
