//! # Deployment
//!
//! ## Responsibility
//! Blue/green and canary deployment control: health-gated cutover, canary
//! traffic splitting, metric-driven promotion and rollback, and the
//! append-only history of every attempt.
//!
//! ## Layout
//! - [`types`]: environments, configs, metrics, history records
//! - [`error`]: [`DeploymentError`] and the rejected-operation taxonomy
//! - [`health`]: the [`HealthProbe`] seam and its HTTP implementation
//! - [`metrics_source`]: the [`MetricsSource`] seam and its HTTP implementation
//! - [`evaluator`]: the pure canary verdict
//! - [`router`]: lock-free per-request environment selection
//! - [`history`]: the append-only log
//! - [`controller`]: the stateful core tying the above together
//! - [`monitor`]: the periodic canary check
//!
//! ## NOT Responsible For
//! - Proxying requests
//! - Provisioning environments

pub mod controller;
pub mod error;
pub mod evaluator;
pub mod health;
pub mod history;
pub mod metrics_source;
pub mod monitor;
pub mod router;
pub mod types;

pub use controller::{CanaryVerdict, ControllerSettings, DeploymentController, EnvironmentEndpoints};
pub use error::{DeploymentError, InvalidOperation};
pub use evaluator::{evaluate, CanaryDecision};
pub use health::{HealthCheckResult, HealthProbe, HttpHealthProbe};
pub use history::DeploymentHistory;
pub use metrics_source::{HttpMetricsConfig, HttpMetricsSource, MetricsError, MetricsSource};
pub use monitor::{monitor_tick, spawn_canary_monitor, CanaryMonitor, MonitorConfig, TickOutcome};
pub use router::{RoutingKey, RoutingSnapshot, TrafficRouter};
pub use types::{
    CanaryConfig, CanaryOverrides, DeploymentConfig, DeploymentMetrics, DeploymentPhase,
    DeploymentStatus, Environment, MetricName,
};
