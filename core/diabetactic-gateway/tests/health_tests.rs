mod common;

use common::{harness, harness_with, service, sid, OTHER, SVC};
use diabetactic_gateway::{
    BackoffConfig, CircuitState, GatewayConfig, GatewayError, HealthStatus, HttpMethod,
    HttpResponse, ServiceConfig,
};
use diabetactic_types::ServiceId;

fn network_error(id: &str) -> GatewayError {
    GatewayError::Network {
        service: sid(id),
        message: "connection refused".to_string(),
    }
}

#[tokio::test]
async fn records_default_to_unknown() {
    let h = harness();
    let record = h.gateway.health_monitor().health(&sid(SVC));
    assert_eq!(record.status, HealthStatus::Unknown);
    assert!(record.is_available());
    assert!(record.last_checked_at.is_none());
    assert_eq!(h.gateway.overall_health(), HealthStatus::Healthy);
}

#[tokio::test]
async fn successful_probe_is_healthy_and_closes_breaker() {
    let h = harness();
    h.gateway.breaker().record_failure(&sid(SVC));

    let record = h.gateway.check_service(&sid(SVC)).await.unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
    assert!(record.last_checked_at.is_some());
    assert_eq!(h.transport.call_count(), 1);

    let request = &h.transport.requests()[0];
    assert_eq!(request.method, HttpMethod::Get);
    assert_eq!(request.url, "http://svc.test/health");

    let state = h.gateway.get_circuit_breaker_state(&sid(SVC)).unwrap();
    assert_eq!(state.failure_count(), 0);
}

#[tokio::test]
async fn failing_status_is_unhealthy_without_retry() {
    let h = harness();
    h.transport.push(Ok(HttpResponse::new(503, "down")));

    let record = h.gateway.check_service(&sid(SVC)).await.unwrap();
    assert_eq!(record.status, HealthStatus::Unhealthy);
    assert!(record.message.unwrap().contains("503"));
    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(
        h.gateway.get_circuit_breaker_state(&sid(SVC)).unwrap().failure_count(),
        1
    );
}

#[tokio::test]
async fn transient_failure_is_retried_once() {
    let h = harness();
    h.transport.push(Err(network_error(SVC)));

    let record = h.gateway.check_service(&sid(SVC)).await.unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
    assert_eq!(h.transport.call_count(), 2);
}

#[tokio::test]
async fn second_transient_failure_is_final() {
    let h = harness();
    h.transport.push(Err(network_error(SVC)));
    h.transport.push(Err(network_error(SVC)));

    let record = h.gateway.check_service(&sid(SVC)).await.unwrap();
    assert_eq!(record.status, HealthStatus::Unhealthy);
    assert!(record.message.unwrap().contains("connection refused"));
    assert_eq!(h.transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_skips_probe() {
    let h = harness();
    h.transport.set_default(Ok(HttpResponse::new(503, "down")));
    let svc = sid(SVC);

    h.gateway.check_service(&svc).await.unwrap();
    h.gateway.check_service(&svc).await.unwrap();
    let state = h.gateway.get_circuit_breaker_state(&svc).unwrap();
    assert_eq!(state.state(), CircuitState::Open);
    assert_eq!(h.transport.call_count(), 2);

    let third = h.gateway.check_service(&svc).await.unwrap();
    assert_eq!(third.status, HealthStatus::Unhealthy);
    assert_eq!(h.transport.call_count(), 2);
    assert!(!h.gateway.is_service_available(&svc));
}

#[tokio::test]
async fn reachability_probe_accepts_client_errors() {
    let mut plain = service(SVC, 2, 0);
    plain.health_path = None;
    let h = harness_with(GatewayConfig {
        services: vec![plain],
        backoff: BackoffConfig::default(),
    });
    h.transport.push(Ok(HttpResponse::new(404, "not found")));

    let record = h.gateway.check_service(&sid(SVC)).await.unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
    assert_eq!(h.transport.requests()[0].url, "http://svc.test");
}

#[tokio::test]
async fn on_device_services_are_always_healthy() {
    let local = ServiceConfig {
        id: ServiceId::new("local"),
        display_name: "local".to_string(),
        base_url: None,
        health_path: None,
        timeout_ms: 100,
        circuit_breaker_threshold: 1,
        cache_duration_ms: 0,
        offline_support: true,
    };
    let h = harness_with(GatewayConfig {
        services: vec![local],
        backoff: BackoffConfig::default(),
    });
    let record = h.gateway.check_service(&sid("local")).await.unwrap();
    assert_eq!(record.status, HealthStatus::Healthy);
    assert_eq!(h.transport.call_count(), 0);
}

#[tokio::test]
async fn unknown_service_probe_fails() {
    let h = harness();
    assert!(matches!(
        h.gateway.check_service(&sid("ghost")).await,
        Err(GatewayError::UnknownService(_))
    ));
}

#[tokio::test]
async fn overall_health_reflects_fleet() {
    let h = harness();
    h.transport.push(Ok(HttpResponse::new(500, "")));
    h.gateway.check_service(&sid(SVC)).await.unwrap();
    assert_eq!(h.gateway.overall_health(), HealthStatus::Degraded);

    h.transport.push(Ok(HttpResponse::new(500, "")));
    h.gateway.check_service(&sid(OTHER)).await.unwrap();
    assert_eq!(h.gateway.overall_health(), HealthStatus::Unhealthy);

    let records = h.gateway.health_monitor().check_all().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == HealthStatus::Healthy));
    assert_eq!(h.gateway.overall_health(), HealthStatus::Healthy);
}
