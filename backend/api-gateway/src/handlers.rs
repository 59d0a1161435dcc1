//! Inbound HTTP surface
//!
//! GET /health   - aggregated downstream health (outside the API prefix)
//! GET /         - gateway info
//! GET /metrics  - prometheus exposition of gateway metrics
//! *   {prefix}/ - everything else is proxied through the pipeline

use crate::error::{GatewayError, ProxyError};
use crate::gateway::Gateway;
use crate::metrics;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub api_prefix: String,
    pub services: Vec<String>,
}

/// Register gateway routes under the configured API prefix.
pub fn configure(api_prefix: &str) -> impl FnOnce(&mut web::ServiceConfig) + '_ {
    move |cfg| {
        cfg.route("/health", web::get().to(health_handler))
            .route("/", web::get().to(info_handler))
            .route("/metrics", web::get().to(metrics_handler))
            .service(web::scope(api_prefix).default_service(web::to(proxy_handler)))
            .default_service(web::to(not_found_handler));
    }
}

pub async fn proxy_handler(
    req: HttpRequest,
    payload: web::Payload,
    gateway: web::Data<Gateway>,
) -> Result<HttpResponse, ProxyError> {
    gateway.handle(&req, payload).await.map_err(|e| {
        if let GatewayError::Internal(detail) = &e {
            error!(path = %req.path(), detail = %detail, "Unexpected gateway fault");
        }
        e.at(req.path())
    })
}

pub async fn health_handler(gateway: web::Data<Gateway>) -> HttpResponse {
    HttpResponse::Ok().json(gateway.health().gateway_health().await)
}

pub async fn info_handler(gateway: web::Data<Gateway>) -> HttpResponse {
    HttpResponse::Ok().json(GatewayInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        api_prefix: gateway.api_prefix().to_string(),
        services: gateway
            .registry()
            .names()
            .into_iter()
            .map(String::from)
            .collect(),
    })
}

pub async fn metrics_handler(req: HttpRequest) -> Result<HttpResponse, ProxyError> {
    let body = metrics::render()
        .map_err(|e| GatewayError::Internal(e.to_string()).at(req.path()))?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

/// Paths outside the API prefix that are not gateway endpoints
pub async fn not_found_handler(req: HttpRequest) -> HttpResponse {
    GatewayError::RouteNotFound.at(req.path()).error_response()
}
