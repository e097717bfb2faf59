//! Resilient service gateway for the Diabetactic client.
//!
//! Decides, per remote dependency, whether a call should be attempted at
//! all, and shields callers from repeated failures.
//!
//! # Components
//!
//! - **Config**: the service registry (timeouts, cache lifetimes, breaker
//!   thresholds, offline capability)
//! - **Circuit breaker**: per-service failure-tracking state machine
//! - **Health**: active probes feeding the breaker
//! - **Cache**: per-service, per-key result cache with lazy expiry
//! - **Gateway**: the single entry point tying the above together
//! - **Transport / network / secrets**: the external collaborators the
//!   gateway consumes
//!
//! # Example
//!
//! ```
//! use diabetactic_gateway::{
//!     GatewayConfig, NetworkMonitor, RequestGateway, RequestOptions, API_GATEWAY,
//! };
//! use diabetactic_gateway::transport::mock::MockTransport;
//! use diabetactic_types::ServiceId;
//! use std::sync::Arc;
//!
//! # async fn example() -> diabetactic_gateway::GatewayResult<()> {
//! let gateway = RequestGateway::new(
//!     GatewayConfig::default(),
//!     Arc::new(MockTransport::new()),
//!     Arc::new(NetworkMonitor::new(true)),
//! )?;
//!
//! let service = ServiceId::new(API_GATEWAY);
//! let latest: u32 = gateway
//!     .execute_request(
//!         &service,
//!         || async { Ok(120) },
//!         RequestOptions::new().cache_key("readings/latest").fallback(|| 0),
//!     )
//!     .await?;
//! assert_eq!(latest, 120);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod config;
mod error;
mod gateway;
pub mod health;
pub mod network;
pub mod secrets;
pub mod transport;

pub use cache::{CacheEntry, ResponseCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitState};
pub use config::{
    BackoffConfig, GatewayConfig, ServiceConfig, ServiceRegistry, API_GATEWAY, LOCAL_STORAGE,
    TIDEPOOL,
};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use gateway::{Fallback, RequestGateway, RequestOptions};
pub use health::{HealthMonitor, HealthRecord, HealthStatus};
pub use network::NetworkMonitor;
pub use secrets::{InMemorySecretStore, SecretStore, ACCESS_TOKEN_KEY};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
