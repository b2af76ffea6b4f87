//! # Environment Health Probe
//!
//! ## Responsibility
//! Issue a bounded-timeout HTTP GET against `{base_url}{path}` and report
//! whether the environment is ready to receive traffic.
//!
//! ## Guarantees
//! - Infallible: an unreachable target yields a result value, never an `Err`
//! - Bounded: every check honours the caller's timeout
//! - Distinguishing: `status_code == 0` means transport failure; a non-zero
//!   code with `healthy == false` means the endpoint answered with an error
//!
//! ## NOT Responsible For
//! - Deciding what to do with the result (that belongs to `controller`)
//! - Retrying failed checks

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Health path used when none is configured.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Probe timeout used when none is configured.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a single health check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// `true` iff the endpoint answered with a 2xx status within the timeout.
    pub healthy: bool,
    /// Wall time spent on the check.
    pub response_time_ms: u64,
    /// HTTP status, or `0` when no response was received.
    pub status_code: u16,
    /// Failure description when `healthy` is `false`.
    pub error: Option<String>,
}

impl HealthCheckResult {
    /// A passing check.
    pub fn healthy(status_code: u16, response_time_ms: u64) -> Self {
        Self {
            healthy: true,
            response_time_ms,
            status_code,
            error: None,
        }
    }

    /// A transport-level failure: no HTTP response was received.
    pub fn unreachable(error: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            healthy: false,
            response_time_ms,
            status_code: 0,
            error: Some(error.into()),
        }
    }

    /// A check that did not finish within `timeout`.
    pub fn timed_out(timeout: Duration) -> Self {
        Self::unreachable(
            format!("timed out after {}ms", timeout.as_millis()),
            duration_ms(timeout),
        )
    }
}

/// Readiness check against an environment's health endpoint.
///
/// Object-safe so the controller can hold an `Arc<dyn HealthProbe>`; tests
/// inject deterministic fakes.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Check `{base_url}{path}`, giving up after `timeout`.
    async fn check(&self, base_url: &str, path: &str, timeout: Duration) -> HealthCheckResult;
}

/// [`HealthProbe`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    /// Create a probe whose TCP connect phase is capped at `connect_timeout`.
    ///
    /// # Panics
    /// This function never panics.
    pub fn new(connect_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, base_url: &str, path: &str, timeout: Duration) -> HealthCheckResult {
        let url = join_url(base_url, path);
        let started = Instant::now();

        let outcome = self.client.get(&url).timeout(timeout).send().await;
        let elapsed_ms = duration_ms(started.elapsed());

        match outcome {
            Ok(resp) if resp.status().is_success() => {
                debug!(url = %url, status = resp.status().as_u16(), elapsed_ms, "health check passed");
                HealthCheckResult::healthy(resp.status().as_u16(), elapsed_ms)
            }
            Ok(resp) => {
                let code = resp.status().as_u16();
                warn!(url = %url, status = code, elapsed_ms, "health check returned error status");
                HealthCheckResult {
                    healthy: false,
                    response_time_ms: elapsed_ms,
                    status_code: code,
                    error: Some(format!("HTTP {code}")),
                }
            }
            Err(e) if e.is_timeout() => {
                warn!(url = %url, elapsed_ms, "health check timed out");
                HealthCheckResult::unreachable(
                    format!("timed out after {}ms", timeout.as_millis()),
                    elapsed_ms,
                )
            }
            Err(e) => {
                warn!(url = %url, error = %e, elapsed_ms, "health check transport failure");
                HealthCheckResult::unreachable(format!("connect: {e}"), elapsed_ms)
            }
        }
    }
}

/// Join a base URL and a path with exactly one `/` between them.
pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
