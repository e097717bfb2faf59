mod common;

use common::{service, test_config};
use diabetactic_gateway::{
    BackoffConfig, GatewayConfig, GatewayError, ServiceRegistry, API_GATEWAY, LOCAL_STORAGE,
    TIDEPOOL,
};
use diabetactic_types::ServiceId;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;

#[test]
fn default_config_registers_known_services() {
    let registry = ServiceRegistry::new(GatewayConfig::default()).unwrap();
    let ids: Vec<&str> = registry.ids().map(|id| id.as_str()).collect();
    assert_eq!(ids, vec![API_GATEWAY, TIDEPOOL, LOCAL_STORAGE]);

    let local = registry.get(&ServiceId::new(LOCAL_STORAGE)).unwrap();
    assert!(local.base_url.is_none());
    assert!(local.offline_support);
}

#[test]
fn unknown_service_lookup_fails() {
    let registry = ServiceRegistry::new(test_config()).unwrap();
    let err = registry.get(&ServiceId::new("nope")).unwrap_err();
    assert!(matches!(err, GatewayError::UnknownService(id) if id.as_str() == "nope"));
}

#[test]
fn duplicate_ids_are_rejected() {
    let config = GatewayConfig {
        services: vec![service("a", 1, 0), service("a", 2, 0)],
        backoff: BackoffConfig::default(),
    };
    assert!(matches!(
        ServiceRegistry::new(config),
        Err(GatewayError::Config(_))
    ));
}

#[test]
fn zero_threshold_is_rejected() {
    let config = GatewayConfig {
        services: vec![service("a", 0, 0)],
        backoff: BackoffConfig::default(),
    };
    assert!(ServiceRegistry::new(config).is_err());
}

#[test]
fn backoff_without_positive_cooldown_is_rejected() {
    for backoff in [
        BackoffConfig {
            base_ms: 0,
            max_ms: 1_000,
        },
        BackoffConfig {
            base_ms: 5_000,
            max_ms: 1_000,
        },
    ] {
        let config = GatewayConfig {
            services: vec![service("a", 1, 0)],
            backoff,
        };
        assert!(matches!(
            ServiceRegistry::new(config),
            Err(GatewayError::Config(_))
        ));
    }
}

#[test]
fn url_for_joins_paths() {
    let svc = service("svc", 1, 0);
    assert_eq!(svc.url_for("/health").unwrap(), "http://svc.test/health");
    assert_eq!(svc.url_for("glucose/mine").unwrap(), "http://svc.test/glucose/mine");
    assert_eq!(svc.url_for("").unwrap(), "http://svc.test");
}

#[test]
fn cooldown_doubles_and_caps() {
    let backoff = BackoffConfig {
        base_ms: 1_000,
        max_ms: 5_000,
    };
    assert_eq!(backoff.cooldown(0), Duration::from_millis(1_000));
    assert_eq!(backoff.cooldown(1), Duration::from_millis(2_000));
    assert_eq!(backoff.cooldown(2), Duration::from_millis(4_000));
    assert_eq!(backoff.cooldown(3), Duration::from_millis(5_000));
    assert_eq!(backoff.cooldown(200), Duration::from_millis(5_000));
}

#[test]
fn config_loads_from_json() {
    let json = r#"{
        "services": [{
            "id": "api-gateway",
            "display_name": "API",
            "base_url": "http://localhost:8004",
            "health_path": "/health",
            "timeout_ms": 5000,
            "circuit_breaker_threshold": 4
        }]
    }"#;
    let config = GatewayConfig::from_json_str(json).unwrap();
    assert_eq!(config.services.len(), 1);
    let svc = &config.services[0];
    assert_eq!(svc.cache_duration_ms, 0);
    assert!(!svc.offline_support);
    assert_eq!(config.backoff, BackoffConfig::default());
}

#[test]
fn config_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let json = serde_json::to_string(&test_config()).unwrap();
    file.write_all(json.as_bytes()).unwrap();

    let loaded = GatewayConfig::from_file(file.path()).unwrap();
    assert_eq!(loaded, test_config());
}

#[test]
fn invalid_json_is_a_config_error() {
    assert!(matches!(
        GatewayConfig::from_json_str("{not json"),
        Err(GatewayError::Config(_))
    ));
}
