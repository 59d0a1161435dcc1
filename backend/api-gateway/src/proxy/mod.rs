//! Proxy dispatcher
//!
//! Forwards a request to a downstream service resolved from the registry.
//!
//! ## Failure mapping
//! - unknown logical service → `ServiceNotConfigured` (502)
//! - connection failure → `BadGateway` (502)
//! - no complete response within the timeout → `GatewayTimeout` (504); the
//!   in-flight exchange is dropped and anything it would have returned is
//!   discarded
//! - any HTTP response, including 4xx/5xx, is relayed as-is

pub mod headers;

use crate::error::GatewayError;
use crate::metrics;
use crate::registry::ServiceRegistry;
use bytes::Bytes;
use reqwest::{header::HeaderMap, Method, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default downstream timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub service: String,
    /// Gateway-relative path, without the API prefix
    pub path: String,
    pub query: Option<String>,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone)]
pub struct ProxyDispatcher {
    registry: Arc<ServiceRegistry>,
    client: reqwest::Client,
    timeout: Duration,
}

impl ProxyDispatcher {
    pub fn new(registry: Arc<ServiceRegistry>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            // Redirects belong to the caller, not the gateway
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            registry,
            client,
            timeout,
        })
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Shared transport, also used for health probes
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn forward(&self, req: ForwardRequest) -> Result<ProxyResponse, GatewayError> {
        let ForwardRequest {
            service,
            path,
            query,
            method,
            headers,
            body,
        } = req;

        let entry = self
            .registry
            .get(&service)
            .ok_or_else(|| GatewayError::ServiceNotConfigured(service.clone()))?;

        let url = entry.target_url(self.registry.api_prefix(), &path, query.as_deref());
        debug!(service = %service, method = %method, url = %url, "Forwarding request");

        let exchange = async {
            let response = self
                .client
                .request(method, &url)
                .headers(headers)
                .body(body)
                .send()
                .await?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;

            Ok::<_, reqwest::Error>(ProxyResponse {
                status,
                headers,
                body,
            })
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, exchange).await;
        metrics::observe_upstream(&service, start.elapsed());

        match outcome {
            Err(_) => {
                warn!(
                    service = %service,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Downstream request timed out"
                );
                Err(GatewayError::GatewayTimeout(self.timeout))
            }
            Ok(Err(e)) => Err(self.transport_error(&service, e)),
            Ok(Ok(response)) => {
                if response.status.is_client_error() || response.status.is_server_error() {
                    debug!(
                        service = %service,
                        status = response.status.as_u16(),
                        "Relaying downstream error response"
                    );
                }
                Ok(response)
            }
        }
    }

    fn transport_error(&self, service: &str, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            warn!(service, error = %e, "Downstream request timed out");
            GatewayError::GatewayTimeout(self.timeout)
        } else {
            warn!(service, connect = e.is_connect(), error = %e, "Downstream request failed");
            GatewayError::BadGateway(e.to_string())
        }
    }
}
