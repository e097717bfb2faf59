//! Delivery of queued mutations to their remote service.

use async_trait::async_trait;
use diabetactic_gateway::{
    GatewayError, GatewayResult, HttpMethod, HttpRequest, HttpTransport, RequestGateway,
    ServiceRegistry,
};
use diabetactic_storage::{SyncOperation, SyncQueueItem};
use std::sync::Arc;
use tracing::debug;

/// Performs the remote call for one queue item.
///
/// The processor runs every replay inside
/// [`RequestGateway::execute_request`], so implementations only issue the
/// call; breaker accounting and the timeout are applied around them.
#[async_trait]
pub trait SyncReplayer: Send + Sync {
    /// Delivers `item`, returning the decoded response body.
    async fn replay(&self, item: &SyncQueueItem) -> GatewayResult<serde_json::Value>;
}

/// Returns the HTTP verb a queued operation is replayed with.
pub fn method_for(operation: SyncOperation) -> HttpMethod {
    match operation {
        SyncOperation::Create | SyncOperation::CustomShare => HttpMethod::Post,
        SyncOperation::Update => HttpMethod::Put,
        SyncOperation::Delete => HttpMethod::Delete,
    }
}

/// Replays items as JSON HTTP requests against the item's service.
///
/// 409 surfaces as `Conflict`, 400/422 as `Validation`, anything else
/// non-2xx as `Http`.
pub struct HttpReplayer {
    registry: Arc<ServiceRegistry>,
    transport: Arc<dyn HttpTransport>,
}

impl HttpReplayer {
    pub fn new(registry: Arc<ServiceRegistry>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Creates a replayer sharing the gateway's registry and transport.
    pub fn for_gateway(gateway: &RequestGateway) -> Self {
        Self::new(gateway.registry().clone(), gateway.transport().clone())
    }
}

#[async_trait]
impl SyncReplayer for HttpReplayer {
    async fn replay(&self, item: &SyncQueueItem) -> GatewayResult<serde_json::Value> {
        let config = self.registry.get(&item.service)?;
        let url = config.url_for(&item.target.path).ok_or_else(|| {
            GatewayError::Config(format!("{} has no base URL", item.service))
        })?;

        let mut request = HttpRequest::new(method_for(item.operation), url);
        if item.operation != SyncOperation::Delete {
            request = request.with_body(item.payload.clone());
        }
        debug!(
            "Replaying queue item {} ({}) to {}",
            item.seq, item.operation, request.url
        );

        self.transport
            .send(&item.service, request, config.timeout())
            .await?
            .error_for_status(&item.service)?
            .json()
    }
}
