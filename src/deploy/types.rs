//! Deployment data model.
//!
//! ## Responsibility
//! Define the value types shared by every part of the orchestrator: the
//! three routable environments, the committed deployment configuration, the
//! parameters of the active canary, and the per-attempt status records that
//! make up the deployment history.
//!
//! ## Guarantees
//! - Serializable: every public type round-trips through `serde`
//! - Validated: [`CanaryOverrides::merge_onto`] never yields a config with a
//!   threshold outside `[0, 1]` or a percentage above 100
//!
//! ## NOT Responsible For
//! - Enforcing history immutability (that belongs to `history`)
//! - State transitions (that belongs to `controller`)

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::error::DeploymentError;
use super::health::HealthCheckResult;

// ─── Environment ──────────────────────────────────────────────────────────────

/// One of the three environments traffic can be routed to.
///
/// `Canary` is always evaluated against whichever of `Blue`/`Green` is
/// currently stable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// The blue production environment.
    Blue,
    /// The green production environment.
    Green,
    /// The canary environment receiving a bounded share of traffic.
    Canary,
}

impl Environment {
    /// Lowercase label used in logs, metrics, and URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Blue => "blue",
            Environment::Green => "green",
            Environment::Canary => "canary",
        }
    }

    /// The other half of the blue/green pair.
    ///
    /// `Canary` has no counterpart and maps to itself.
    pub fn opposite(&self) -> Self {
        match self {
            Environment::Blue => Environment::Green,
            Environment::Green => Environment::Blue,
            Environment::Canary => Environment::Canary,
        }
    }

    /// Return `true` for `Blue` and `Green`.
    pub fn is_stable(&self) -> bool {
        !matches!(self, Environment::Canary)
    }

    pub(crate) fn tag(&self) -> u8 {
        match self {
            Environment::Blue => 0,
            Environment::Green => 1,
            Environment::Canary => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Self {
        match tag {
            1 => Environment::Green,
            2 => Environment::Canary,
            _ => Environment::Blue,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blue" => Ok(Environment::Blue),
            "green" => Ok(Environment::Green),
            "canary" => Ok(Environment::Canary),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

// ─── Metrics ──────────────────────────────────────────────────────────────────

/// Names of the metrics a canary can be observed on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    /// Mean response time in milliseconds.
    ResponseTime,
    /// Fraction of failed requests.
    ErrorRate,
    /// Fraction of successful requests.
    SuccessRate,
    /// Requests per second.
    Throughput,
}

impl MetricName {
    /// Every metric, in declaration order.
    pub const ALL: [MetricName; 4] = [
        MetricName::ResponseTime,
        MetricName::ErrorRate,
        MetricName::SuccessRate,
        MetricName::Throughput,
    ];

    /// Wire name of the metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ResponseTime => "response_time",
            MetricName::ErrorRate => "error_rate",
            MetricName::SuccessRate => "success_rate",
            MetricName::Throughput => "throughput",
        }
    }

    /// The full set of metrics.
    pub fn all() -> BTreeSet<MetricName> {
        Self::ALL.into_iter().collect()
    }
}

/// Last-polled metrics for an environment. Rates are fractions in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentMetrics {
    /// Fraction of requests that succeeded.
    pub success_rate: f64,
    /// Fraction of requests that failed.
    pub error_rate: f64,
    /// Mean response time in milliseconds.
    pub response_time_ms: f64,
    /// Requests per second.
    pub throughput: f64,
}

// ─── Deployment config ────────────────────────────────────────────────────────

/// The committed deployment state: which environment serves non-canary
/// traffic and with which version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Environment authoritative for all non-canary traffic.
    pub environment: Environment,
    /// Opaque build identifier running in `environment`.
    pub version: String,
    /// Share of traffic directed to `environment` (100 once cut over).
    pub traffic_percentage: u8,
    /// Path appended to an environment's base URL when probing.
    pub health_check_path: String,
    /// Error-rate ceiling that forces a rollback; default canary error threshold.
    pub rollback_error_threshold: f64,
    /// Default canary observation window in minutes.
    pub canary_window_minutes: u64,
}

// ─── Canary config ────────────────────────────────────────────────────────────

/// Parameters of the active canary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryConfig {
    /// Percentage of requests routed to `canary` while active.
    pub traffic_percentage: u8,
    /// Minimum observation time before promotion is eligible.
    pub duration_minutes: u64,
    /// Minimum success rate required to promote.
    pub success_threshold: f64,
    /// Maximum error rate tolerated before an immediate rollback.
    pub error_threshold: f64,
    /// Metrics polled from the metrics source.
    pub tracked_metrics: BTreeSet<MetricName>,
}

impl CanaryConfig {
    /// Check ranges and required metrics.
    ///
    /// # Errors
    /// Returns [`DeploymentError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), DeploymentError> {
        if self.traffic_percentage > 100 {
            return Err(invalid("traffic_percentage", "must be at most 100"));
        }
        if !(0.0..=1.0).contains(&self.success_threshold) {
            return Err(invalid("success_threshold", "must be between 0.0 and 1.0"));
        }
        if !(0.0..=1.0).contains(&self.error_threshold) {
            return Err(invalid("error_threshold", "must be between 0.0 and 1.0"));
        }
        for required in [MetricName::ErrorRate, MetricName::SuccessRate] {
            if !self.tracked_metrics.contains(&required) {
                return Err(invalid(
                    "tracked_metrics",
                    &format!("must include {}", required.as_str()),
                ));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> DeploymentError {
    DeploymentError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Per-canary overrides merged onto the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryOverrides {
    /// Override for [`CanaryConfig::traffic_percentage`].
    pub traffic_percentage: Option<u8>,
    /// Override for [`CanaryConfig::duration_minutes`].
    pub duration_minutes: Option<u64>,
    /// Override for [`CanaryConfig::success_threshold`].
    pub success_threshold: Option<f64>,
    /// Override for [`CanaryConfig::error_threshold`].
    pub error_threshold: Option<f64>,
    /// Override for [`CanaryConfig::tracked_metrics`].
    pub tracked_metrics: Option<BTreeSet<MetricName>>,
}

impl CanaryOverrides {
    /// Apply these overrides to `defaults` and validate the result.
    ///
    /// # Errors
    /// Returns [`DeploymentError::InvalidConfig`] if the merged config is out of range.
    pub fn merge_onto(self, defaults: &CanaryConfig) -> Result<CanaryConfig, DeploymentError> {
        let merged = CanaryConfig {
            traffic_percentage: self
                .traffic_percentage
                .unwrap_or(defaults.traffic_percentage),
            duration_minutes: self.duration_minutes.unwrap_or(defaults.duration_minutes),
            success_threshold: self.success_threshold.unwrap_or(defaults.success_threshold),
            error_threshold: self.error_threshold.unwrap_or(defaults.error_threshold),
            tracked_metrics: self
                .tracked_metrics
                .unwrap_or_else(|| defaults.tracked_metrics.clone()),
        };
        merged.validate()?;
        Ok(merged)
    }
}

// ─── Deployment status ────────────────────────────────────────────────────────

/// Where a deployment attempt sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPhase {
    /// Blue/green deployment serving its environment.
    Active,
    /// Canary receiving traffic under observation.
    Monitoring,
    /// Health check failed; no traffic was shifted.
    Aborted,
    /// Canary promoted to the stable environment.
    Promoted,
    /// Traffic was reverted away from this deployment.
    RolledBack,
    /// A later deployment to the same environment replaced this one.
    Superseded,
}

impl DeploymentPhase {
    /// Return `true` if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeploymentPhase::Active | DeploymentPhase::Monitoring)
    }
}

/// One record per deployment attempt. Immutable once `end_time` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    /// Monotonic sequence number, unique per controller.
    pub id: u64,
    /// Environment the attempt targeted.
    pub environment: Environment,
    /// Version deployed.
    pub version: String,
    /// Traffic share at creation or last update.
    pub traffic_percentage: u8,
    /// Result of the pre-cutover health probe.
    pub is_healthy: bool,
    /// Lifecycle phase.
    pub phase: DeploymentPhase,
    /// Full probe result behind `is_healthy`.
    pub health: HealthCheckResult,
    /// When the attempt started.
    pub start_time: DateTime<Utc>,
    /// When the attempt was finalized, if it has been.
    pub end_time: Option<DateTime<Utc>>,
    /// Last-polled metrics; frozen at `end_time`.
    pub metrics: DeploymentMetrics,
}

impl DeploymentStatus {
    /// Return `true` while the record has no `end_time`.
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Return `true` if this record is for the canary environment.
    pub fn is_canary(&self) -> bool {
        self.environment == Environment::Canary
    }
}
