//! # tokio-traffic-orchestrator
//!
//! Blue/green and canary deployment control over Tokio.
//!
//! ## Architecture
//!
//! ```text
//! operator API ─┐                        ┌─> HealthProbe   (blue|green|canary)
//!               ├─> DeploymentController ┼─> MetricsSource (canary)
//! monitor loop ─┘          │             └─> DeploymentHistory
//!                          ▼
//!                   TrafficRouter (atomic snapshot) <── request hot path
//! ```
//!
//! Every traffic shift is gated on a health check. A canary receives a
//! bounded share of requests and is promoted or rolled back on its observed
//! error and success rates.

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod deploy;
pub mod metrics;

#[cfg(feature = "web-api")]
pub mod web_api;

// Re-exports for convenience
pub use config::{validation::ConfigError, OrchestratorConfig};
pub use deploy::{
    CanaryConfig, CanaryOverrides, CanaryVerdict, DeploymentConfig, DeploymentController,
    DeploymentError, DeploymentStatus, Environment, InvalidOperation, RoutingKey, TrafficRouter,
};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```no_run
/// # use tokio_traffic_orchestrator::{init_tracing, OrchestratorError};
/// # fn example() -> Result<(), OrchestratorError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), OrchestratorError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::Other(format!("tracing init failed: {e}")))
}

/// Top-level orchestrator errors.
///
/// All variants implement `std::error::Error` via [`thiserror`].
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A deployment operation was rejected or could not run.
    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    /// The configuration file is missing, malformed, or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
