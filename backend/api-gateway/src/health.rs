//! Downstream health aggregation
//!
//! Probes every registered service concurrently and folds the results into
//! one report. Each probe has its own short timeout and its failure is
//! contained in its own `HealthReport`; a dead or slow service never fails
//! or delays the reports of the others beyond the probe timeout.

use crate::registry::{ServiceRegistry, ServiceRegistryEntry};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default per-probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Healthy,
    /// Probe reached the service (or timed out) and it is not healthy
    Unhealthy,
    /// Probe could not be dispatched at all
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub service: String,
    pub status: ProbeStatus,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
}

/// Body of the gateway's own `GET /health`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayHealth {
    pub gateway: &'static str,
    pub timestamp: String,
    pub services: Vec<HealthReport>,
    pub overall_status: OverallStatus,
}

/// Healthy only if every checked service is healthy.
pub fn overall_status(reports: &[HealthReport]) -> OverallStatus {
    if reports.iter().all(|r| r.status == ProbeStatus::Healthy) {
        OverallStatus::Healthy
    } else {
        OverallStatus::Degraded
    }
}

#[derive(Clone)]
pub struct HealthAggregator {
    registry: Arc<ServiceRegistry>,
    client: reqwest::Client,
    probe_timeout: Duration,
    excluded: HashSet<String>,
}

impl HealthAggregator {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        client: reqwest::Client,
        probe_timeout: Duration,
        excluded: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            registry,
            client,
            probe_timeout,
            excluded: excluded.into_iter().collect(),
        }
    }

    pub fn is_excluded(&self, service: &str) -> bool {
        self.excluded.contains(service)
    }

    /// Probe every non-excluded service; always returns one report per probe.
    pub async fn check_all(&self) -> Vec<HealthReport> {
        let probes = self
            .registry
            .iter()
            .filter(|entry| !self.is_excluded(&entry.logical_name))
            .map(|entry| self.probe(entry));

        join_all(probes).await
    }

    pub async fn gateway_health(&self) -> GatewayHealth {
        let services = self.check_all().await;
        let overall_status = overall_status(&services);

        if overall_status == OverallStatus::Degraded {
            let failing: Vec<&str> = services
                .iter()
                .filter(|r| r.status != ProbeStatus::Healthy)
                .map(|r| r.service.as_str())
                .collect();
            warn!(failing = ?failing, "Downstream services degraded");
        }

        GatewayHealth {
            gateway: "healthy",
            timestamp: chrono::Utc::now().to_rfc3339(),
            services,
            overall_status,
        }
    }

    async fn probe(&self, entry: &ServiceRegistryEntry) -> HealthReport {
        let url = entry.health_url();
        let report = |status, response_time_ms, error: Option<String>| HealthReport {
            service: entry.logical_name.clone(),
            status,
            url: url.clone(),
            response_time_ms,
            error,
        };

        let request = match self.client.get(&url).build() {
            Ok(request) => request,
            Err(e) => {
                warn!(service = %entry.logical_name, error = %e, "Health probe could not be built");
                return report(ProbeStatus::Error, None, Some("invalid health check URL".to_string()));
            }
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(self.probe_timeout, self.client.execute(request)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(response)) if response.status().is_success() => {
                debug!(service = %entry.logical_name, elapsed_ms, "Health probe succeeded");
                report(ProbeStatus::Healthy, Some(elapsed_ms), None)
            }
            Ok(Ok(response)) => report(
                ProbeStatus::Unhealthy,
                Some(elapsed_ms),
                Some(format!("HTTP {}", response.status().as_u16())),
            ),
            Ok(Err(e)) => {
                let reason = if e.is_connect() {
                    "connection failed"
                } else {
                    "request failed"
                };
                report(ProbeStatus::Unhealthy, Some(elapsed_ms), Some(reason.to_string()))
            }
            Err(_) => report(
                ProbeStatus::Unhealthy,
                None,
                Some(format!("timed out after {} ms", self.probe_timeout.as_millis())),
            ),
        }
    }
}
