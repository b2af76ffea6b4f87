//! # Canary Monitor
//!
//! ## Responsibility
//! Drive [`DeploymentController::monitor_canary`] on a fixed interval and,
//! when `auto_apply` is on, act on the verdict by promoting or rolling back.
//!
//! ## Guarantees
//! - Non-blocking: runs in a background task; cancel via `JoinHandle::abort`
//! - Idle-safe: ticks with no active canary do nothing
//! - Error-absorbing: controller errors are logged, never propagated, so one
//!   bad tick cannot end the loop
//!
//! ## NOT Responsible For
//! - Deciding the verdict (that belongs to `evaluator`)
//! - Starting canaries

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use super::controller::{CanaryVerdict, DeploymentController};
use super::error::{DeploymentError, InvalidOperation};
use super::evaluator::CanaryDecision;
use super::types::DeploymentStatus;

/// Monitor loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Promote or roll back automatically on a decisive verdict.
    pub auto_apply: bool,
    /// Consecutive stale ticks before the log level escalates to ERROR.
    pub stale_threshold: u32,
}

impl Default for MonitorConfig {
    /// - 60-second interval
    /// - auto-apply on
    /// - escalate after 3 stale ticks
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            auto_apply: true,
            stale_threshold: 3,
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No canary was active.
    Idle,
    /// Metrics were polled; nothing was applied.
    Observed(CanaryVerdict),
    /// The canary was promoted; carries the finalized canary entry.
    Promoted(DeploymentStatus),
    /// The canary was rolled back; carries the finalized canary entry.
    RolledBack(DeploymentStatus),
}

/// Run one monitor step against `controller`.
///
/// Promotion and rollback are applied to the canary the verdict was computed
/// for (by history id). If that canary ended between the verdict and the
/// apply step, nothing is changed and the tick yields `Idle`.
///
/// # Errors
/// Propagates controller errors other than "no active canary", which maps to
/// [`TickOutcome::Idle`].
///
/// # Panics
/// This function never panics.
pub async fn monitor_tick(
    controller: &DeploymentController,
    auto_apply: bool,
) -> Result<TickOutcome, DeploymentError> {
    if !controller.is_canary_active() {
        return Ok(TickOutcome::Idle);
    }
    let verdict = match controller.monitor_canary().await {
        Ok(v) => v,
        Err(e) if is_no_canary(&e) => return Ok(TickOutcome::Idle),
        Err(e) => return Err(e),
    };

    if !auto_apply || !verdict.fresh {
        return Ok(TickOutcome::Observed(verdict));
    }

    let applied = match verdict.decision {
        CanaryDecision::Continue => return Ok(TickOutcome::Observed(verdict)),
        CanaryDecision::Promote => controller
            .promote_canary_if(verdict.status_id)
            .map(TickOutcome::Promoted),
        CanaryDecision::Rollback => {
            warn!(
                error_rate = verdict.metrics.error_rate,
                success_rate = verdict.metrics.success_rate,
                elapsed_minutes = verdict.elapsed_minutes,
                "canary breached thresholds, rolling back"
            );
            controller
                .rollback_canary(verdict.status_id)
                .map(TickOutcome::RolledBack)
        }
    };
    match applied {
        Err(e) if is_no_canary(&e) => Ok(TickOutcome::Idle),
        other => other,
    }
}

fn is_no_canary(e: &DeploymentError) -> bool {
    matches!(
        e.invalid_operation(),
        Some(InvalidOperation::NoActiveCanary)
    )
}

/// Background loop around [`monitor_tick`].
#[derive(Debug)]
pub struct CanaryMonitor {
    controller: Arc<DeploymentController>,
    config: MonitorConfig,
}

impl CanaryMonitor {
    /// Create a monitor for `controller`.
    pub fn new(controller: Arc<DeploymentController>, config: MonitorConfig) -> Self {
        Self { controller, config }
    }

    /// Run the loop indefinitely. Drop or abort the task to stop it.
    ///
    /// # Panics
    /// This function never panics.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut stale: u32 = 0;

        loop {
            ticker.tick().await;

            match monitor_tick(&self.controller, self.config.auto_apply).await {
                Ok(TickOutcome::Idle) => {
                    stale = 0;
                    trace!("no active canary");
                }
                Ok(TickOutcome::Observed(verdict)) if !verdict.fresh => {
                    stale = stale.saturating_add(1);
                    if stale >= self.config.stale_threshold {
                        error!(
                            consecutive_stale = stale,
                            "canary metrics unavailable, verdict frozen"
                        );
                    }
                }
                Ok(TickOutcome::Observed(verdict)) => {
                    stale = 0;
                    trace!(
                        decision = ?verdict.decision,
                        elapsed_minutes = verdict.elapsed_minutes,
                        "canary observed"
                    );
                }
                Ok(TickOutcome::Promoted(status)) => {
                    stale = 0;
                    info!(version = %status.version, "canary promoted by monitor");
                }
                Ok(TickOutcome::RolledBack(status)) => {
                    stale = 0;
                    warn!(version = %status.version, "canary rolled back by monitor");
                }
                Err(e) => {
                    error!(error = %e, "canary monitor tick failed");
                }
            }
        }
    }
}

/// Spawn a [`CanaryMonitor`] on the current runtime.
pub fn spawn_canary_monitor(
    controller: Arc<DeploymentController>,
    config: MonitorConfig,
) -> JoinHandle<()> {
    tokio::spawn(CanaryMonitor::new(controller, config).run())
}
