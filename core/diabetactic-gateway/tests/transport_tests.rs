use diabetactic_gateway::{
    ErrorKind, GatewayError, HttpMethod, HttpRequest, HttpResponse, HttpTransport,
    InMemorySecretStore, NetworkMonitor, ReqwestTransport, SecretStore, ACCESS_TOKEN_KEY,
};
use diabetactic_types::ServiceId;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn svc() -> ServiceId {
    ServiceId::new("api-gateway")
}

// ── ReqwestTransport against a mock server ──────────────────────

#[tokio::test]
async fn get_returns_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/glucose/mine/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": 104})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().unwrap();
    let response = transport
        .send(
            &svc(),
            HttpRequest::get(format!("{}/glucose/mine/latest", server.uri())),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert!(response.is_success());
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["value"], 104);
}

#[tokio::test]
async fn error_statuses_are_returned_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/appointments/create"))
        .respond_with(ResponseTemplate::new(409).set_body_string("already booked"))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().unwrap();
    let response = transport
        .send(
            &svc(),
            HttpRequest::new(HttpMethod::Post, format!("{}/appointments/create", server.uri())),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 409);

    let err = response.error_for_status(&svc()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.to_string().contains("already booked"));
}

#[tokio::test]
async fn bearer_token_and_json_body_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/readings/1"))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_json(serde_json::json!({"glucose": 110})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let secrets: Arc<dyn SecretStore> = Arc::new(InMemorySecretStore::with_access_token("secret-token"));
    let transport = ReqwestTransport::with_secrets(secrets).unwrap();
    let response = transport
        .send(
            &svc(),
            HttpRequest::new(HttpMethod::Put, format!("{}/readings/1", server.uri()))
                .with_body(serde_json::json!({"glucose": 110})),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 204);
    assert_eq!(response.json::<serde_json::Value>().unwrap(), serde_json::Value::Null);
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().unwrap();
    let err = transport
        .send(&svc(), HttpRequest::get(server.uri()), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Timeout { timeout_ms: 50, .. }));
    assert!(err.is_transient_transport());
}

#[tokio::test]
async fn unreachable_host_is_a_network_error() {
    let transport = ReqwestTransport::new().unwrap();
    let err = transport
        .send(
            &svc(),
            HttpRequest::get("http://127.0.0.1:9/unreachable"),
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.is_retryable());
}

// ── Error mapping ───────────────────────────────────────────────

#[test]
fn status_mapping() {
    let conflict = GatewayError::from_status(svc(), 409, "");
    assert_eq!(conflict.kind(), ErrorKind::Conflict);
    assert!(!conflict.is_retryable());

    let invalid = GatewayError::from_status(svc(), 400, "");
    assert_eq!(invalid.kind(), ErrorKind::Validation);

    let server = GatewayError::from_status(svc(), 503, "");
    assert_eq!(server.kind(), ErrorKind::Http);
    assert!(server.is_retryable());

    let throttled = GatewayError::from_status(svc(), 429, "");
    assert!(throttled.is_retryable());

    let forbidden = GatewayError::from_status(svc(), 403, "");
    assert!(!forbidden.is_retryable());
    assert_eq!(forbidden.service(), Some(&svc()));
}

#[test]
fn response_json_rejects_garbage() {
    let response = HttpResponse::new(200, "not json");
    assert!(matches!(
        response.json::<serde_json::Value>(),
        Err(GatewayError::Serialization(_))
    ));
}

// ── Secrets and network signal ──────────────────────────────────

#[test]
fn secret_store_roundtrip() {
    let store = InMemorySecretStore::new();
    assert_eq!(store.get(ACCESS_TOKEN_KEY), None);
    store.set(ACCESS_TOKEN_KEY, "abc".to_string());
    assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("abc"));
    store.remove(ACCESS_TOKEN_KEY);
    assert_eq!(store.get(ACCESS_TOKEN_KEY), None);
}

#[tokio::test]
async fn network_monitor_notifies_on_change_only() {
    let network = NetworkMonitor::new(true);
    let mut rx = network.subscribe();

    network.set_online(true);
    assert!(!rx.has_changed().unwrap());

    network.set_online(false);
    assert!(rx.has_changed().unwrap());
    rx.changed().await.unwrap();
    assert!(!*rx.borrow());
    assert!(!network.is_online());
}
