//! Shared test helpers for gateway tests.

#![allow(dead_code)]

use diabetactic_gateway::transport::mock::MockTransport;
use diabetactic_gateway::{
    BackoffConfig, GatewayConfig, NetworkMonitor, RequestGateway, ServiceConfig,
};
use diabetactic_types::ServiceId;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const SVC: &str = "svc";
pub const OTHER: &str = "other";

/// A remote service with a health endpoint.
pub fn service(id: &str, threshold: u32, cache_ms: u64) -> ServiceConfig {
    ServiceConfig {
        id: ServiceId::new(id),
        display_name: format!("{id} service"),
        base_url: Some(format!("http://{id}.test")),
        health_path: Some("/health".to_string()),
        timeout_ms: 1_000,
        circuit_breaker_threshold: threshold,
        cache_duration_ms: cache_ms,
        offline_support: true,
    }
}

/// Two services: `svc` (threshold 2, 1s cache) and `other` (threshold 3,
/// 1s cache); cooldown 10s doubling up to 80s.
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        services: vec![service(SVC, 2, 1_000), service(OTHER, 3, 1_000)],
        backoff: BackoffConfig {
            base_ms: 10_000,
            max_ms: 80_000,
        },
    }
}

pub struct Harness {
    pub gateway: RequestGateway,
    pub transport: Arc<MockTransport>,
    pub network: Arc<NetworkMonitor>,
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

/// Routes gateway logs to the test output. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness_with(config: GatewayConfig) -> Harness {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    let network = Arc::new(NetworkMonitor::new(true));
    let gateway = RequestGateway::new(config, transport.clone(), network.clone()).unwrap();
    Harness {
        gateway,
        transport,
        network,
    }
}

pub fn sid(id: &str) -> ServiceId {
    ServiceId::new(id)
}
