//! Error types for the API Gateway
//!
//! Every failure in the request pipeline is a `GatewayError`. At the HTTP
//! boundary it is pinned to the inbound path with [`GatewayError::at`] and
//! rendered as the `ProxyError` envelope. Messages in the envelope are fixed
//! strings; the underlying cause is only ever logged.

use actix_web::{
    http::{header, StatusCode},
    HttpResponse, ResponseError,
};
use serde::Serialize;
use std::time::Duration;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing, malformed, expired or otherwise invalid bearer token
    #[error("unauthenticated")]
    Unauthenticated,

    /// Valid identity without any of the roles the route allows
    #[error("forbidden")]
    Forbidden,

    #[error("rate limited: {limit} requests per window, retry after {retry_after:?}")]
    RateLimited { limit: u32, retry_after: Duration },

    /// Authenticated request for a path no route rule targets
    #[error("no route for path")]
    RouteNotFound,

    #[error("service not configured: {0}")]
    ServiceNotConfigured(String),

    /// Connection-level failure talking to a downstream service
    #[error("bad gateway: {0}")]
    BadGateway(String),

    #[error("gateway timeout after {0:?}")]
    GatewayTimeout(Duration),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::RouteNotFound => StatusCode::NOT_FOUND,
            GatewayError::ServiceNotConfigured(_) | GatewayError::BadGateway(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller-safe message. Never includes upstream URLs or error causes.
    pub fn public_message(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated => "Authentication required",
            GatewayError::Forbidden => "Insufficient permissions for this resource",
            GatewayError::RateLimited { .. } => "Too many requests, please try again later",
            GatewayError::RouteNotFound => "Resource not found",
            GatewayError::ServiceNotConfigured(_) => "Downstream service is not configured",
            GatewayError::BadGateway(_) => "Downstream service is unavailable",
            GatewayError::GatewayTimeout(_) => "Downstream service timed out",
            GatewayError::BadRequest(_) => "Malformed request",
            GatewayError::PayloadTooLarge(_) => "Request body too large",
            GatewayError::Internal(_) => "Internal gateway error",
        }
    }

    /// Normalize into the error envelope returned to the caller.
    pub fn at(&self, path: &str) -> ProxyError {
        let rate_limit = match self {
            GatewayError::RateLimited { limit, retry_after } => Some((*limit, *retry_after)),
            _ => None,
        };

        ProxyError {
            status_code: self.status_code().as_u16(),
            message: self.public_message().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            path: path.to_string(),
            rate_limit,
        }
    }
}

/// Normalized error envelope: `{statusCode, message, timestamp, path}`
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{status_code} {message} ({path})")]
pub struct ProxyError {
    pub status_code: u16,
    pub message: String,
    pub timestamp: String,
    pub path: String,
    #[serde(skip)]
    rate_limit: Option<(u32, Duration)>,
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(ResponseError::status_code(self));

        if let Some((limit, retry_after)) = self.rate_limit {
            // Round up so clients never retry inside the closed window
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            builder
                .insert_header((header::RETRY_AFTER, secs.to_string()))
                .insert_header(("x-ratelimit-limit", limit.to_string()))
                .insert_header(("x-ratelimit-remaining", "0"));
        }

        builder.json(self)
    }
}
