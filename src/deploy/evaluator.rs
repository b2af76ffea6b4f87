//! Canary verdicts.
//!
//! Pure decision logic: no lock, no I/O. Evaluated on every monitor tick,
//! not only at the end of the observation window.

use serde::{Deserialize, Serialize};

use super::types::{CanaryConfig, DeploymentMetrics};

/// What to do with the active canary after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanaryDecision {
    /// Keep observing.
    Continue,
    /// Make the canary the new stable environment.
    Promote,
    /// Pull the canary.
    Rollback,
}

/// Decide the fate of a canary.
///
/// Order matters: an error-rate breach rolls back even after the window has
/// elapsed, a success-rate shortfall rolls back next, and only a canary
/// passing both thresholds for the full `duration_minutes` is promoted.
/// With `duration_minutes == 0` the first healthy tick promotes.
pub fn evaluate(
    metrics: &DeploymentMetrics,
    elapsed_minutes: u64,
    config: &CanaryConfig,
) -> CanaryDecision {
    if metrics.error_rate > config.error_threshold {
        return CanaryDecision::Rollback;
    }
    if metrics.success_rate < config.success_threshold {
        return CanaryDecision::Rollback;
    }
    if elapsed_minutes >= config.duration_minutes {
        return CanaryDecision::Promote;
    }
    CanaryDecision::Continue
}
