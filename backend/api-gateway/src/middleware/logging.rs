//! Request logging middleware
//!
//! Logs method, original path, caller identity, final status and latency
//! once the response is ready. Severity follows the status: 5xx as error,
//! 4xx as warn, everything else as info. The response is passed through
//! untouched.

use crate::middleware::jwt::Identity;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::StatusCode,
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::time::Instant;

/// Middleware that logs every completed request
#[derive(Clone, Default)]
pub struct RequestLogger;

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggerService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerService { service }))
    }
}

pub struct RequestLoggerService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.path().to_string();

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match &result {
                Ok(res) => {
                    // Identity is attached by the pipeline once the token is verified
                    let user = res
                        .request()
                        .extensions()
                        .get::<Identity>()
                        .map(Identity::summary)
                        .unwrap_or_else(|| "anonymous".to_string());
                    log_completion(method.as_str(), &path, &user, res.status(), duration_ms);
                }
                Err(e) => {
                    let status = e.as_response_error().status_code();
                    log_completion(method.as_str(), &path, "anonymous", status, duration_ms);
                }
            }

            result
        })
    }
}

fn log_completion(method: &str, path: &str, user: &str, status: StatusCode, duration_ms: u64) {
    let status = status.as_u16();
    if status >= 500 {
        tracing::error!(method, path, user, status, duration_ms, "HTTP request failed");
    } else if status >= 400 {
        tracing::warn!(method, path, user, status, duration_ms, "HTTP request rejected");
    } else {
        tracing::info!(method, path, user, status, duration_ms, "HTTP request completed");
    }
}
