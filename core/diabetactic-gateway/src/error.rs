//! Error types for the gateway layer.

use diabetactic_types::ServiceId;
use thiserror::Error;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Coarse classification used by consumers to pick a presentation
/// ("try again later" banner, inline field error, manual review).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Timeout,
    ServiceUnavailable,
    Http,
    Validation,
    Conflict,
    Config,
}

/// Errors surfaced by the gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Transport-level failure (connection refused, DNS, reset).
    #[error("network error calling {service}: {message}")]
    Network { service: ServiceId, message: String },

    /// The operation did not finish within the service timeout.
    #[error("{service} timed out after {timeout_ms}ms")]
    Timeout { service: ServiceId, timeout_ms: u64 },

    /// The call was not attempted (offline, breaker open, or unhealthy).
    #[error("{service} unavailable: {reason}")]
    ServiceUnavailable { service: ServiceId, reason: String },

    /// The remote answered with a non-success status that maps to no more
    /// specific variant.
    #[error("{service} returned HTTP {status}: {body}")]
    Http {
        service: ServiceId,
        status: u16,
        body: String,
    },

    /// The remote rejected the payload; retrying will not help.
    #[error("validation failed on {service}: {message}")]
    Validation { service: ServiceId, message: String },

    /// The remote state diverged from the payload being replayed.
    #[error("conflict on {service}: {message}")]
    Conflict { service: ServiceId, message: String },

    /// No service with this id is registered.
    #[error("unknown service: {0}")]
    UnknownService(ServiceId),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Response or config (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GatewayError {
    /// Builds the error for an HTTP status, mapping 409 to `Conflict` and
    /// 400/422 to `Validation`.
    pub fn from_status(service: ServiceId, status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            409 => GatewayError::Conflict {
                service,
                message: body,
            },
            400 | 422 => GatewayError::Validation {
                service,
                message: body,
            },
            _ => GatewayError::Http {
                service,
                status,
                body,
            },
        }
    }

    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Network { .. } => ErrorKind::Network,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            GatewayError::Http { .. } => ErrorKind::Http,
            GatewayError::Validation { .. } | GatewayError::Serialization(_) => {
                ErrorKind::Validation
            }
            GatewayError::Conflict { .. } => ErrorKind::Conflict,
            GatewayError::UnknownService(_) | GatewayError::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns the originating service, when the error concerns one.
    pub fn service(&self) -> Option<&ServiceId> {
        match self {
            GatewayError::Network { service, .. }
            | GatewayError::Timeout { service, .. }
            | GatewayError::ServiceUnavailable { service, .. }
            | GatewayError::Http { service, .. }
            | GatewayError::Validation { service, .. }
            | GatewayError::Conflict { service, .. } => Some(service),
            GatewayError::UnknownService(service) => Some(service),
            GatewayError::Config(_) | GatewayError::Serialization(_) => None,
        }
    }

    /// Returns true if the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Network { .. }
            | GatewayError::Timeout { .. }
            | GatewayError::ServiceUnavailable { .. } => true,
            GatewayError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true for transport-level failures (the kind a health probe
    /// retries once).
    pub fn is_transient_transport(&self) -> bool {
        matches!(
            self,
            GatewayError::Network { .. } | GatewayError::Timeout { .. }
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Serialization(e.to_string())
    }
}
