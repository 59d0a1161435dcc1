//! Prometheus metrics for the gateway

use prometheus::{Encoder, HistogramVec, IntCounterVec, TextEncoder};
use std::time::Duration;

lazy_static::lazy_static! {
    pub static ref GATEWAY_REQUESTS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "gateway_requests_total",
        "Requests handled by the gateway pipeline",
        &["service", "status"]
    ).expect("gateway_requests_total registers once");

    pub static ref GATEWAY_UPSTREAM_DURATION_SECONDS: HistogramVec = prometheus::register_histogram_vec!(
        "gateway_upstream_duration_seconds",
        "Downstream call latency, including timeouts",
        &["service"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).expect("gateway_upstream_duration_seconds registers once");

    pub static ref GATEWAY_RATE_LIMITED_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "gateway_rate_limited_total",
        "Requests rejected by the rate limiter",
        &["class"]
    ).expect("gateway_rate_limited_total registers once");
}

/// `service` is "none" for requests rejected before a target was known.
pub fn record_request(service: &str, status: u16) {
    GATEWAY_REQUESTS_TOTAL
        .with_label_values(&[service, &status.to_string()])
        .inc();
}

pub fn observe_upstream(service: &str, elapsed: Duration) {
    GATEWAY_UPSTREAM_DURATION_SECONDS
        .with_label_values(&[service])
        .observe(elapsed.as_secs_f64());
}

pub fn record_rate_limited(class: &str) {
    GATEWAY_RATE_LIMITED_TOTAL.with_label_values(&[class]).inc();
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
