//! HTTP transport abstraction.
//!
//! The gateway never talks to `reqwest` directly: probes and replays go
//! through [`HttpTransport`], so tests can script responses with
//! [`mock::MockTransport`].

use crate::error::{GatewayError, GatewayResult};
use crate::secrets::{SecretStore, ACCESS_TOKEN_KEY};
use async_trait::async_trait;
use diabetactic_types::ServiceId;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// HTTP verbs used by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// An outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A response, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Maps non-2xx statuses to the matching [`GatewayError`].
    pub fn error_for_status(self, service: &ServiceId) -> GatewayResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(GatewayError::from_status(
                service.clone(),
                self.status,
                self.body,
            ))
        }
    }

    /// Decodes the body as JSON. An empty body decodes as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> GatewayResult<T> {
        if self.body.trim().is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Issues timed HTTP calls.
///
/// Implementations return `Ok` for every response the server produced,
/// including error statuses; `Err` is reserved for transport failures
/// (`Network`) and expired deadlines (`Timeout`).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        service: &ServiceId,
        request: HttpRequest,
        timeout: Duration,
    ) -> GatewayResult<HttpResponse>;
}

/// `reqwest`-backed transport that attaches the stored bearer token.
pub struct ReqwestTransport {
    client: Client,
    secrets: Option<Arc<dyn SecretStore>>,
}

impl ReqwestTransport {
    /// Creates a transport without credentials.
    pub fn new() -> GatewayResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            secrets: None,
        })
    }

    /// Creates a transport that reads the bearer token from `secrets`.
    pub fn with_secrets(secrets: Arc<dyn SecretStore>) -> GatewayResult<Self> {
        let mut transport = Self::new()?;
        transport.secrets = Some(secrets);
        Ok(transport)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        service: &ServiceId,
        request: HttpRequest,
        timeout: Duration,
    ) -> GatewayResult<HttpResponse> {
        debug!("{:?} {} ({})", request.method, request.url, service);

        let mut builder = self
            .client
            .request(request.method.as_reqwest(), &request.url)
            .timeout(timeout);
        if let Some(token) = self
            .secrets
            .as_ref()
            .and_then(|s| s.get(ACCESS_TOKEN_KEY))
        {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                GatewayError::Timeout {
                    service: service.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                GatewayError::Network {
                    service: service.clone(),
                    message: e.to_string(),
                }
            }
        };

        let response = builder.send().await.map_err(map_err)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_err)?;
        Ok(HttpResponse { status, body })
    }
}

/// A scripted transport for testing.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Mutex, PoisonError};

    /// Replies from a queue of scripted results, falling back to a default
    /// once the queue is empty. Every request is recorded.
    pub struct MockTransport {
        script: Mutex<VecDeque<GatewayResult<HttpResponse>>>,
        default: Mutex<GatewayResult<HttpResponse>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl MockTransport {
        /// A transport that answers 200 with an empty JSON object.
        pub fn new() -> Self {
            Self::with_default(Ok(HttpResponse::new(200, "{}")))
        }

        pub fn with_default(default: GatewayResult<HttpResponse>) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                default: Mutex::new(default),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Queues the next reply.
        pub fn push(&self, reply: GatewayResult<HttpResponse>) {
            self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(reply);
        }

        /// Replaces the fallback reply.
        pub fn set_default(&self, reply: GatewayResult<HttpResponse>) {
            *self.default.lock().unwrap_or_else(PoisonError::into_inner) = reply;
        }

        /// Number of requests seen so far.
        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
        }

        /// All requests seen so far.
        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(
            &self,
            _service: &ServiceId,
            request: HttpRequest,
            _timeout: Duration,
        ) -> GatewayResult<HttpResponse> {
            self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request);
            let scripted = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            match scripted {
                Some(reply) => reply,
                None => self.default.lock().unwrap_or_else(PoisonError::into_inner).clone(),
            }
        }
    }
}
