//! # Declarative Orchestrator Configuration
//!
//! ## Responsibility
//! Parse and validate the TOML file describing the environments, the
//! deployment defaults, and the surrounding services. Run with:
//! ```text
//! traffic-orchestrator --config orchestrator.toml
//! ```
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `OrchestratorConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Hot-reloading (configuration is read once at startup)
//! - Building the controller (that belongs to `deploy::controller`)

pub mod loader;
pub mod validation;

use std::collections::BTreeSet;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::deploy::{
    ControllerSettings, DeploymentConfig, Environment, EnvironmentEndpoints, HttpMetricsConfig,
    MetricName, MonitorConfig,
};

// ── Default value functions ──────────────────────────────────────────────

fn default_environment() -> Environment {
    Environment::Blue
}

fn default_version() -> String {
    "v0".to_string()
}

fn default_health_path() -> String {
    crate::deploy::health::DEFAULT_HEALTH_PATH.to_string()
}

fn default_rollback_error_threshold() -> f64 {
    0.05
}

fn default_canary_window_minutes() -> u64 {
    30
}

fn default_canary_traffic() -> u8 {
    10
}

fn default_success_threshold() -> f64 {
    0.95
}

fn default_tracked_metrics() -> BTreeSet<MetricName> {
    MetricName::all()
}

/// Default probe timeout: 5000ms.
fn default_probe_timeout_ms() -> u64 {
    5000
}

/// Default connect timeout: 2000ms.
fn default_connect_timeout_ms() -> u64 {
    2000
}

/// Default monitor interval: 30 seconds.
fn default_interval_s() -> u64 {
    30
}

/// Default metrics poll timeout: 10 000ms.
fn default_metrics_timeout_ms() -> u64 {
    10_000
}

fn default_stale_threshold() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_source_timeout_ms() -> u64 {
    5000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for one orchestrator instance.
///
/// # Example
///
/// ```toml
/// [environments]
/// blue = "http://blue.internal:8080"
/// green = "http://green.internal:8080"
/// canary = "http://canary.internal:8080"
///
/// [metrics_source]
/// base_url = "http://metrics.internal:9000"
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OrchestratorConfig {
    /// Committed state at startup and blue/green defaults.
    #[serde(default)]
    pub deployment: DeploymentSection,
    /// Canary defaults applied when a start request carries no overrides.
    #[serde(default)]
    pub canary: CanarySection,
    /// Base URLs of the three environments.
    pub environments: EnvironmentsSection,
    /// Health probe timeouts.
    #[serde(default)]
    pub probe: ProbeSection,
    /// Canary monitor loop.
    #[serde(default)]
    pub monitor: MonitorSection,
    /// Where canary metrics are read from.
    pub metrics_source: MetricsSourceSection,
    /// Logging.
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Operator API listener.
    #[serde(default)]
    pub server: ServerSection,
}

// ── Sections ─────────────────────────────────────────────────────────────

/// `[deployment]`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DeploymentSection {
    /// Environment considered live at startup. Must be `blue` or `green`.
    #[serde(default = "default_environment")]
    pub initial_environment: Environment,
    /// Version considered live at startup.
    #[serde(default = "default_version")]
    pub initial_version: String,
    /// Path probed before any traffic shift. Must start with `/`.
    #[serde(default = "default_health_path")]
    pub health_check_path: String,
    /// Default canary error threshold (0.0–1.0).
    #[serde(default = "default_rollback_error_threshold")]
    pub rollback_error_threshold: f64,
    /// Default canary observation window in minutes.
    #[serde(default = "default_canary_window_minutes")]
    pub canary_window_minutes: u64,
}

impl Default for DeploymentSection {
    fn default() -> Self {
        Self {
            initial_environment: default_environment(),
            initial_version: default_version(),
            health_check_path: default_health_path(),
            rollback_error_threshold: default_rollback_error_threshold(),
            canary_window_minutes: default_canary_window_minutes(),
        }
    }
}

/// `[canary]`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CanarySection {
    /// Default share of traffic (1–100) sent to a new canary.
    #[serde(default = "default_canary_traffic")]
    pub traffic_percentage: u8,
    /// Default minimum success rate (0.0–1.0).
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,
    /// Metrics requested from the metrics source.
    #[serde(default = "default_tracked_metrics")]
    pub tracked_metrics: BTreeSet<MetricName>,
}

impl Default for CanarySection {
    fn default() -> Self {
        Self {
            traffic_percentage: default_canary_traffic(),
            success_threshold: default_success_threshold(),
            tracked_metrics: default_tracked_metrics(),
        }
    }
}

/// `[environments]`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EnvironmentsSection {
    /// Base URL of the blue environment.
    pub blue: String,
    /// Base URL of the green environment.
    pub green: String,
    /// Base URL of the canary environment.
    pub canary: String,
}

/// `[probe]`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProbeSection {
    /// Upper bound on one health check, in ms (1–30000).
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    /// TCP connect timeout for the probe client, in ms.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_probe_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// `[monitor]`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct MonitorSection {
    /// Seconds between monitor ticks.
    #[serde(default = "default_interval_s")]
    pub interval_s: u64,
    /// Upper bound on one metrics poll, in ms. Must be shorter than the interval.
    #[serde(default = "default_metrics_timeout_ms")]
    pub metrics_timeout_ms: u64,
    /// Promote or roll back automatically on a decisive verdict.
    #[serde(default = "default_true")]
    pub auto_apply: bool,
    /// Consecutive failed metrics polls before the monitor logs at ERROR.
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold: u32,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            interval_s: default_interval_s(),
            metrics_timeout_ms: default_metrics_timeout_ms(),
            auto_apply: true,
            stale_threshold: default_stale_threshold(),
        }
    }
}

/// `[metrics_source]`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct MetricsSourceSection {
    /// Base URL of the metrics service.
    pub base_url: String,
    /// HTTP request timeout, in ms.
    #[serde(default = "default_source_timeout_ms")]
    pub timeout_ms: u64,
}

// ── Observability ────────────────────────────────────────────────────────

/// Logging configuration.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilityConfig {
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// Structured JSON lines for log aggregators.
    Json,
}

impl LogFormat {
    /// Value understood by `init_tracing` through `LOG_FORMAT`.
    pub fn as_env_value(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        }
    }
}

/// `[server]`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ServerSection {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────────

impl OrchestratorConfig {
    /// Controller settings derived from this file.
    pub fn controller_settings(&self) -> ControllerSettings {
        let d = &self.deployment;
        ControllerSettings {
            initial: DeploymentConfig {
                environment: d.initial_environment,
                version: d.initial_version.clone(),
                traffic_percentage: 100,
                health_check_path: d.health_check_path.clone(),
                rollback_error_threshold: d.rollback_error_threshold,
                canary_window_minutes: d.canary_window_minutes,
            },
            canary_traffic_percentage: self.canary.traffic_percentage,
            canary_success_threshold: self.canary.success_threshold,
            canary_tracked_metrics: self.canary.tracked_metrics.clone(),
            endpoints: EnvironmentEndpoints {
                blue: self.environments.blue.clone(),
                green: self.environments.green.clone(),
                canary: self.environments.canary.clone(),
            },
            probe_timeout: Duration::from_millis(self.probe.timeout_ms),
            metrics_timeout: Duration::from_millis(self.monitor.metrics_timeout_ms),
        }
    }

    /// Monitor loop settings derived from this file.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(self.monitor.interval_s),
            auto_apply: self.monitor.auto_apply,
            stale_threshold: self.monitor.stale_threshold,
        }
    }

    /// HTTP metrics adapter settings derived from this file.
    pub fn metrics_source_config(&self) -> HttpMetricsConfig {
        HttpMetricsConfig {
            base_url: self.metrics_source.base_url.clone(),
            request_timeout: Duration::from_millis(self.metrics_source.timeout_ms),
        }
    }

    /// Probe client connect timeout.
    pub fn probe_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.probe.connect_timeout_ms)
    }
}

/// JSON Schema of [`OrchestratorConfig`], pretty-printed.
///
/// # Errors
///
/// Returns the serialization error if the schema cannot be rendered.
pub fn json_schema() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&schemars::schema_for!(OrchestratorConfig))
}
