//! # Environment Metrics Source
//!
//! ## Responsibility
//! Define the polling contract between the controller and whatever backend
//! aggregates success rate, error rate, response time, and throughput for an
//! environment, plus an HTTP/JSON adapter for backends that expose them.
//!
//! ## Guarantees
//! - Typed failures: every transport, status, or decoding problem becomes a
//!   [`MetricsError`]; nothing panics
//! - Range-checked: the HTTP adapter rejects rates outside `[0, 1]`
//!
//! ## NOT Responsible For
//! - Retrying (a failed poll is "no new data this tick")
//! - Deciding promotion or rollback (that belongs to `evaluator`)

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

use super::types::{DeploymentMetrics, Environment, MetricName};

/// Why a metrics poll produced no data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricsError {
    /// The backend could not be reached.
    #[error("metrics backend unreachable: {0}")]
    Transport(String),
    /// The backend answered with a non-success status.
    #[error("metrics backend returned HTTP {0}")]
    Status(u16),
    /// The response body was not a valid metrics snapshot.
    #[error("invalid metrics payload: {0}")]
    Decode(String),
    /// The poll did not finish within its deadline.
    #[error("metrics poll timed out after {0:?}")]
    Timeout(Duration),
}

/// Source of per-environment metrics for the current observation window.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Collect the latest snapshot for `environment`.
    ///
    /// `tracked` names the metrics the caller cares about; implementations
    /// may use it to narrow their query but must always fill every field.
    async fn collect(
        &self,
        environment: Environment,
        tracked: &BTreeSet<MetricName>,
    ) -> Result<DeploymentMetrics, MetricsError>;
}

/// Configuration for [`HttpMetricsSource`].
#[derive(Debug, Clone)]
pub struct HttpMetricsConfig {
    /// Base URL of the metrics backend (e.g. `http://127.0.0.1:9000`).
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for HttpMetricsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MetricsPayload {
    success_rate: f64,
    error_rate: f64,
    response_time_ms: f64,
    #[serde(default)]
    throughput: f64,
}

/// [`MetricsSource`] that GETs `{base_url}/api/v1/metrics/{environment}`.
#[derive(Debug, Clone)]
pub struct HttpMetricsSource {
    config: HttpMetricsConfig,
    client: reqwest::Client,
}

impl HttpMetricsSource {
    /// Create a new adapter.
    ///
    /// # Panics
    /// This function never panics.
    pub fn new(config: HttpMetricsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn url_for(&self, environment: Environment) -> String {
        format!(
            "{}/api/v1/metrics/{}",
            self.config.base_url.trim_end_matches('/'),
            environment.as_str()
        )
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn collect(
        &self,
        environment: Environment,
        tracked: &BTreeSet<MetricName>,
    ) -> Result<DeploymentMetrics, MetricsError> {
        let url = self.url_for(environment);
        let names = tracked
            .iter()
            .map(MetricName::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let resp = self
            .client
            .get(&url)
            .query(&[("metrics", names.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MetricsError::Timeout(self.config.request_timeout)
                } else {
                    MetricsError::Transport(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(MetricsError::Status(resp.status().as_u16()));
        }

        let payload: MetricsPayload = resp
            .json()
            .await
            .map_err(|e| MetricsError::Decode(e.to_string()))?;

        let metrics = DeploymentMetrics {
            success_rate: payload.success_rate,
            error_rate: payload.error_rate,
            response_time_ms: payload.response_time_ms,
            throughput: payload.throughput,
        };
        check_ranges(&metrics)?;

        trace!(
            environment = %environment,
            success_rate = metrics.success_rate,
            error_rate = metrics.error_rate,
            response_time_ms = metrics.response_time_ms,
            "metrics collected"
        );
        Ok(metrics)
    }
}

fn check_ranges(metrics: &DeploymentMetrics) -> Result<(), MetricsError> {
    for (name, value) in [
        ("success_rate", metrics.success_rate),
        ("error_rate", metrics.error_rate),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(MetricsError::Decode(format!(
                "{name}={value} is outside [0, 1]"
            )));
        }
    }
    if metrics.response_time_ms < 0.0 || metrics.throughput < 0.0 {
        return Err(MetricsError::Decode("negative latency or throughput".into()));
    }
    Ok(())
}
