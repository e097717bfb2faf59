//! Shared test helpers for sync tests.

#![allow(dead_code)]

use diabetactic_gateway::transport::mock::MockTransport;
use diabetactic_gateway::{
    BackoffConfig, GatewayConfig, NetworkMonitor, RequestGateway, ServiceConfig,
};
use diabetactic_storage::{LocalStore, SyncOperation, SyncQueueItem, SyncTarget};
use diabetactic_sync::{SyncConfig, SyncQueueProcessor};
use diabetactic_types::ServiceId;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const SVC: &str = "svc";
pub const OTHER: &str = "other";
/// A service that does not allow queueing while unreachable.
pub const ONLINE_ONLY: &str = "online-only";

pub fn service(id: &str, base_url: &str, offline_support: bool) -> ServiceConfig {
    ServiceConfig {
        id: ServiceId::new(id),
        display_name: format!("{id} service"),
        base_url: Some(base_url.to_string()),
        health_path: None,
        timeout_ms: 1_000,
        circuit_breaker_threshold: 3,
        cache_duration_ms: 0,
        offline_support,
    }
}

/// `svc` and `other` support offline work, `online-only` does not.
pub fn test_config(base_url: &str) -> GatewayConfig {
    GatewayConfig {
        services: vec![
            service(SVC, base_url, true),
            service(OTHER, base_url, true),
            service(ONLINE_ONLY, base_url, false),
        ],
        backoff: BackoffConfig::default(),
    }
}

/// Routes sync logs to the test output. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub processor: Arc<SyncQueueProcessor>,
    pub gateway: Arc<RequestGateway>,
    pub store: Arc<LocalStore>,
    pub transport: Arc<MockTransport>,
    pub network: Arc<NetworkMonitor>,
}

pub fn harness() -> Harness {
    harness_with(true, SyncConfig::default())
}

pub fn harness_with(online: bool, sync: SyncConfig) -> Harness {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    let network = Arc::new(NetworkMonitor::new(online));
    let gateway = Arc::new(
        RequestGateway::new(test_config("http://api.test"), transport.clone(), network.clone())
            .unwrap(),
    );
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let processor = Arc::new(SyncQueueProcessor::with_http(
        gateway.clone(),
        store.clone(),
        sync,
    ));
    Harness {
        processor,
        gateway,
        store,
        transport,
        network,
    }
}

pub fn sid(id: &str) -> ServiceId {
    ServiceId::new(id)
}

/// A `Create` mutation for `path` on `service`.
pub fn item(service: &str, path: &str) -> SyncQueueItem {
    SyncQueueItem::new(
        SyncOperation::Create,
        sid(service),
        SyncTarget::new(path),
        serde_json::json!({ "path": path }),
    )
}
