//! Per-request pipeline
//!
//! classify → verify token (protected routes only) → role gate → rate
//! limit → read body → enrich headers → dispatch. Stages run strictly in that order and
//! the first failing stage ends the request; nothing reaches a downstream
//! service unless every earlier stage passed.

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::health::HealthAggregator;
use crate::metrics;
use crate::middleware::correlation_id::{get_correlation_id, CORRELATION_ID_HEADER};
use crate::middleware::jwt::{Identity, TokenVerifier};
use crate::middleware::rate_limit::{client_key, RateLimiter};
use crate::proxy::headers::{add_forwarding, enrich_identity, forwardable_headers, is_hop_by_hop_header};
use crate::proxy::{ForwardRequest, ProxyDispatcher, ProxyResponse};
use crate::registry::ServiceRegistry;
use crate::routes::{normalize_path, RouteTable};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use anyhow::Context;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared gateway state, one instance for all workers
pub struct Gateway {
    api_prefix: String,
    routes: RouteTable,
    verifier: TokenVerifier,
    limiter: Arc<RateLimiter>,
    dispatcher: ProxyDispatcher,
    health: HealthAggregator,
    max_body_bytes: usize,
    trust_forwarded_for: bool,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api_prefix: impl Into<String>,
        routes: RouteTable,
        verifier: TokenVerifier,
        limiter: Arc<RateLimiter>,
        dispatcher: ProxyDispatcher,
        health: HealthAggregator,
        max_body_bytes: usize,
        trust_forwarded_for: bool,
    ) -> Self {
        Self {
            api_prefix: api_prefix.into(),
            routes,
            verifier,
            limiter,
            dispatcher,
            health,
            max_body_bytes,
            trust_forwarded_for,
        }
    }

    /// Wire every component from configuration with the practicas route table.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry = Arc::new(
            ServiceRegistry::new(config.api_prefix.clone(), config.services.clone())
                .context("Invalid service registry")?,
        );

        let verifier = TokenVerifier::new(
            &config.jwt.secret,
            config.jwt.issuer.as_deref(),
            config.jwt.audience.as_deref(),
        )
        .context("Invalid JWT configuration")?;

        let dispatcher = ProxyDispatcher::new(registry.clone(), config.proxy.request_timeout)
            .context("Failed to build downstream HTTP client")?;

        let health = HealthAggregator::new(
            registry,
            dispatcher.client().clone(),
            config.proxy.health_check_timeout,
            config.health_excluded.iter().cloned(),
        );

        Ok(Self::new(
            config.api_prefix.clone(),
            RouteTable::practicas(),
            verifier,
            Arc::new(RateLimiter::new(config.rate_limit.clone())),
            dispatcher,
            health,
            config.proxy.max_body_bytes,
            config.proxy.trust_forwarded_for,
        ))
    }

    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    pub fn registry(&self) -> &ServiceRegistry {
        self.dispatcher.registry()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn health(&self) -> &HealthAggregator {
        &self.health
    }

    /// Run the full pipeline for one proxied request.
    pub async fn handle(&self, req: &HttpRequest, payload: web::Payload) -> Result<HttpResponse> {
        let path = normalize_path(req.path(), &self.api_prefix)?;
        let decision = self.routes.classify(req.method(), &path);
        let service_label = decision.target_service.as_deref().unwrap_or("none");

        let identity = if decision.public {
            None
        } else {
            let authorization = req
                .headers()
                .get("authorization")
                .and_then(|h| h.to_str().ok());
            let identity = self.verifier.verify(authorization).map_err(|e| {
                metrics::record_request(service_label, 401);
                e
            })?;

            if !identity.has_any_role(&decision.allowed_roles) {
                debug!(
                    user = %identity.user_id,
                    path = %path,
                    required = ?decision.allowed_roles,
                    "Role not permitted"
                );
                metrics::record_request(service_label, 403);
                return Err(GatewayError::Forbidden);
            }

            req.extensions_mut().insert(identity.clone());
            Some(identity)
        };

        let key = client_key(identity.as_ref(), req, self.trust_forwarded_for);
        let limit = self.limiter.check(&key, decision.rate_class);
        if !limit.allowed {
            warn!(client = %key, class = decision.rate_class.as_str(), "Rate limit exceeded");
            metrics::record_rate_limited(decision.rate_class.as_str());
            metrics::record_request(service_label, 429);
            return Err(GatewayError::RateLimited {
                limit: limit.limit,
                retry_after: limit.reset_after,
            });
        }

        let service = decision.target_service.ok_or_else(|| {
            metrics::record_request("none", 404);
            GatewayError::RouteNotFound
        })?;

        let body = read_body(payload, self.max_body_bytes).await.map_err(|e| {
            metrics::record_request(&service, e.status_code().as_u16());
            e
        })?;

        let forward = ForwardRequest {
            headers: self.outbound_headers(req, identity.as_ref())?,
            service: service.clone(),
            path: decision.normalized_path,
            query: Some(req.query_string().to_string()).filter(|q| !q.is_empty()),
            method: reqwest::Method::from_bytes(req.method().as_str().as_bytes())
                .map_err(|_| GatewayError::BadRequest("unsupported method".to_string()))?,
            body,
        };

        let result = self.dispatcher.forward(forward).await;
        let status = match &result {
            Ok(response) => response.status.as_u16(),
            Err(e) => e.status_code().as_u16(),
        };
        metrics::record_request(&service, status);

        let mut response = relay(result?)?;
        let headers = response.headers_mut();
        headers.insert(
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(limit.limit),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(limit.remaining),
        );
        Ok(response)
    }

    fn outbound_headers(
        &self,
        req: &HttpRequest,
        identity: Option<&Identity>,
    ) -> Result<reqwest::header::HeaderMap> {
        let mut headers = forwardable_headers(req.headers());
        enrich_identity(&mut headers, identity)?;

        let peer_ip = req.peer_addr().map(|addr| addr.ip().to_string());
        let info = req.connection_info();
        add_forwarding(&mut headers, peer_ip.as_deref(), info.scheme(), info.host());

        if let Some(id) = get_correlation_id(req) {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(id.as_str()) {
                headers.insert(CORRELATION_ID_HEADER, value);
            }
        }

        Ok(headers)
    }
}

/// Buffer the request body, failing once it grows past `limit` bytes.
async fn read_body(mut payload: web::Payload, limit: usize) -> Result<Bytes> {
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| GatewayError::BadRequest(e.to_string()))?;
        if body.len() + chunk.len() > limit {
            return Err(GatewayError::PayloadTooLarge(limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// Turn a downstream response into the gateway response, status and body untouched.
fn relay(upstream: ProxyResponse) -> Result<HttpResponse> {
    let status = StatusCode::from_u16(upstream.status.as_u16())
        .map_err(|_| GatewayError::BadGateway(format!("invalid status {}", upstream.status)))?;
    let mut builder = HttpResponse::build(status);

    for (name, value) in upstream.headers.iter() {
        let name = name.as_str();
        if is_hop_by_hop_header(name) || name == "content-length" {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            builder.append_header((name, value));
        }
    }

    Ok(builder.body(upstream.body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;

    #[actix_web::test]
    async fn test_relay_keeps_status_body_and_end_to_end_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("connection", "close".parse().unwrap());
        headers.append("set-cookie", "a=1".parse().unwrap());
        headers.append("set-cookie", "b=2".parse().unwrap());

        let resp = relay(ProxyResponse {
            status: reqwest::StatusCode::CONFLICT,
            headers,
            body: Bytes::from_static(br#"{"error":"already applied"}"#),
        })
        .unwrap();

        assert_eq!(resp.status(), 409);
        assert_eq!(resp.headers().get("content-type").unwrap(), "application/json");
        assert!(resp.headers().get("connection").is_none());
        assert_eq!(resp.headers().get_all("set-cookie").count(), 2);

        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body, r#"{"error":"already applied"}"#);
    }
}
