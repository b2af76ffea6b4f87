//! Prometheus metrics for the deployment orchestrator.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_deployment`, `record_health_check`, …) are no-ops if `init_metrics`
//! was never called, so the controller is always safe to run; observability
//! simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `orchestrator_deployments_total` | Counter | `kind`, `outcome` |
//! | `orchestrator_health_checks_total` | Counter | `environment`, `result` |
//! | `orchestrator_health_check_duration_seconds` | Histogram | `environment` |
//! | `orchestrator_metrics_poll_failures_total` | Counter | `environment` |
//! | `orchestrator_canary_traffic_percent` | Gauge | |
//! | `orchestrator_route_decisions_total` | Counter | `environment` |

use crate::OrchestratorError;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

/// All orchestrator metrics, stored together in a single [`OnceLock`].
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Deployment attempts by kind and outcome.
    pub deployments_total: CounterVec,
    /// Health checks by environment and result.
    pub health_checks_total: CounterVec,
    /// Health check latency.
    pub health_check_duration: HistogramVec,
    /// Failed metrics polls by environment.
    pub metrics_poll_failures: CounterVec,
    /// Current canary traffic share (0 when no canary is active).
    pub canary_traffic_percent: IntGauge,
    /// Routing decisions served through the operator API.
    pub route_decisions: CounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn init_err(e: prometheus::Error) -> OrchestratorError {
    OrchestratorError::Other(format!("metrics init failed: {e}"))
}

/// Initialise all metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if metric construction or registry
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), OrchestratorError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let deployments_total = CounterVec::new(
        Opts::new(
            "orchestrator_deployments_total",
            "Deployment attempts by kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(deployments_total.clone()))
        .map_err(init_err)?;

    let health_checks_total = CounterVec::new(
        Opts::new(
            "orchestrator_health_checks_total",
            "Health checks by environment and result",
        ),
        &["environment", "result"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(health_checks_total.clone()))
        .map_err(init_err)?;

    let health_check_duration = HistogramVec::new(
        HistogramOpts::new(
            "orchestrator_health_check_duration_seconds",
            "Health check latency per environment",
        ),
        &["environment"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(health_check_duration.clone()))
        .map_err(init_err)?;

    let metrics_poll_failures = CounterVec::new(
        Opts::new(
            "orchestrator_metrics_poll_failures_total",
            "Metrics polls that returned no data",
        ),
        &["environment"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(metrics_poll_failures.clone()))
        .map_err(init_err)?;

    let canary_traffic_percent = IntGauge::new(
        "orchestrator_canary_traffic_percent",
        "Share of traffic routed to the active canary",
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(canary_traffic_percent.clone()))
        .map_err(init_err)?;

    let route_decisions = CounterVec::new(
        Opts::new(
            "orchestrator_route_decisions_total",
            "Routing decisions by selected environment",
        ),
        &["environment"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(route_decisions.clone()))
        .map_err(init_err)?;

    // A racing initialiser produces identical descriptors; first one wins.
    let _ = METRICS.set(Metrics {
        registry,
        deployments_total,
        health_checks_total,
        health_check_duration,
        metrics_poll_failures,
        canary_traffic_percent,
        route_decisions,
    });

    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Count a deployment outcome (`started`, `aborted`, `promoted`, `rolled_back`).
///
/// No-op if metrics have not been initialised.
pub fn inc_deployment(kind: &str, outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .deployments_total
            .get_metric_with_label_values(&[kind, outcome])
        {
            c.inc();
        }
    }
}

/// Record one health check.
///
/// No-op if metrics have not been initialised.
pub fn record_health_check(environment: &str, healthy: bool, d: Duration) {
    if let Some(m) = metrics() {
        let result = if healthy { "healthy" } else { "unhealthy" };
        if let Ok(c) = m
            .health_checks_total
            .get_metric_with_label_values(&[environment, result])
        {
            c.inc();
        }
        if let Ok(h) = m
            .health_check_duration
            .get_metric_with_label_values(&[environment])
        {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Count a metrics poll that produced no data.
///
/// No-op if metrics have not been initialised.
pub fn inc_metrics_poll_failure(environment: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .metrics_poll_failures
            .get_metric_with_label_values(&[environment])
        {
            c.inc();
        }
    }
}

/// Set the canary traffic gauge.
///
/// No-op if metrics have not been initialised.
pub fn set_canary_traffic(percent: u8) {
    if let Some(m) = metrics() {
        m.canary_traffic_percent.set(i64::from(percent));
    }
}

/// Count a routing decision.
///
/// No-op if metrics have not been initialised.
pub fn inc_route(environment: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.route_decisions.get_metric_with_label_values(&[environment]) {
            c.inc();
        }
    }
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = metrics().map_or_else(Vec::new, |m| m.registry.gather());
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
