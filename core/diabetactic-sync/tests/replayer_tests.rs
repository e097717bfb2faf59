mod common;

use common::*;
use diabetactic_gateway::{
    ErrorKind, GatewayError, HttpMethod, NetworkMonitor, RequestGateway, ReqwestTransport,
};
use diabetactic_storage::{LocalStore, SyncOperation, SyncQueueItem, SyncTarget};
use diabetactic_sync::{
    method_for, HttpReplayer, SyncConfig, SyncQueueProcessor, SyncReplayer,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_for(server: &MockServer) -> Arc<RequestGateway> {
    init_tracing();
    Arc::new(
        RequestGateway::new(
            test_config(&server.uri()),
            Arc::new(ReqwestTransport::new().unwrap()),
            Arc::new(NetworkMonitor::new(true)),
        )
        .unwrap(),
    )
}

fn mutation(operation: SyncOperation, target: &str, payload: serde_json::Value) -> SyncQueueItem {
    SyncQueueItem::new(operation, sid(SVC), SyncTarget::new(target), payload)
}

async fn replay_err(replayer: &HttpReplayer, target: &str) -> GatewayError {
    replayer
        .replay(&mutation(SyncOperation::Update, target, json!({})))
        .await
        .unwrap_err()
}

#[test]
fn operations_map_to_verbs() {
    assert_eq!(method_for(SyncOperation::Create), HttpMethod::Post);
    assert_eq!(method_for(SyncOperation::CustomShare), HttpMethod::Post);
    assert_eq!(method_for(SyncOperation::Update), HttpMethod::Put);
    assert_eq!(method_for(SyncOperation::Delete), HttpMethod::Delete);
}

#[tokio::test]
async fn create_posts_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/glucose/create"))
        .and(body_json(json!({ "glucose": 101 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 12 })))
        .expect(1)
        .mount(&server)
        .await;

    let replayer = HttpReplayer::for_gateway(&gateway_for(&server));
    let body = replayer
        .replay(&mutation(
            SyncOperation::Create,
            "/glucose/create",
            json!({ "glucose": 101 }),
        ))
        .await
        .unwrap();
    assert_eq!(body, json!({ "id": 12 }));
}

#[tokio::test]
async fn update_puts_and_delete_deletes() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/appointments/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/appointments/7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let replayer = HttpReplayer::for_gateway(&gateway_for(&server));
    replayer
        .replay(&mutation(
            SyncOperation::Update,
            "/appointments/7",
            json!({ "status": "cancelled" }),
        ))
        .await
        .unwrap();
    let body = replayer
        .replay(&mutation(SyncOperation::Delete, "/appointments/7", json!({})))
        .await
        .unwrap();
    assert_eq!(body, serde_json::Value::Null);
}

#[tokio::test]
async fn statuses_map_to_error_kinds() {
    let server = MockServer::start().await;
    Mock::given(path("/conflict"))
        .respond_with(ResponseTemplate::new(409).set_body_string("stale"))
        .mount(&server)
        .await;
    Mock::given(path("/invalid"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;
    Mock::given(path("/down"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let replayer = HttpReplayer::for_gateway(&gateway_for(&server));
    assert_eq!(replay_err(&replayer, "/conflict").await.kind(), ErrorKind::Conflict);
    assert_eq!(replay_err(&replayer, "/invalid").await.kind(), ErrorKind::Validation);
    let down = replay_err(&replayer, "/down").await;
    assert_eq!(down.kind(), ErrorKind::Http);
    assert!(down.is_retryable());
}

#[tokio::test]
async fn drain_replays_against_server_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .expect(3)
        .mount(&server)
        .await;

    let processor = SyncQueueProcessor::with_http(
        gateway_for(&server),
        Arc::new(LocalStore::open_in_memory().unwrap()),
        SyncConfig::default(),
    );
    for target in ["/readings/1", "/readings/2", "/readings/3"] {
        processor
            .enqueue(mutation(SyncOperation::Create, target, json!({ "t": target })))
            .unwrap();
    }

    let report = processor.drain().await.unwrap();
    assert_eq!(report.processed.len(), 3);
    assert!(report.conflicts.is_empty());
    assert!(report.failed.is_empty());

    let received: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(received, vec!["/readings/1", "/readings/2", "/readings/3"]);
}
