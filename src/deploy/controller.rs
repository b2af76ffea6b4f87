//! # Deployment Controller
//!
//! ## Responsibility
//! Own the committed deployment state, the active canary, and the deployment
//! history, and expose the operations that move them: blue/green cutover,
//! canary start, canary monitoring, promotion, rollback, and the read-only
//! status/history queries.
//!
//! ## Guarantees
//! - Health-gated: a failed probe leaves the committed config, the routing
//!   snapshot, and every open history entry untouched
//! - Single canary: at most one canary is active, and starting a second one
//!   fails fast instead of replacing it
//! - Serialized: every read-modify-write happens under one `Mutex`, which is
//!   never held across a probe or metrics poll
//! - Fresh routing: the router snapshot is republished inside the same
//!   critical section that commits each change
//!
//! ## NOT Responsible For
//! - Running the monitor on a timer (that belongs to `monitor`)
//! - Forwarding traffic (callers consult [`TrafficRouter`])

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::{DeploymentError, InvalidOperation};
use super::evaluator::{evaluate, CanaryDecision};
use super::health::{HealthCheckResult, HealthProbe, DEFAULT_HEALTH_PATH, DEFAULT_PROBE_TIMEOUT};
use super::history::DeploymentHistory;
use super::metrics_source::{MetricsError, MetricsSource};
use super::router::{RoutingSnapshot, TrafficRouter};
use super::types::{
    CanaryConfig, CanaryOverrides, DeploymentConfig, DeploymentMetrics, DeploymentPhase,
    DeploymentStatus, Environment, MetricName,
};
use crate::metrics;

const KIND_BLUE_GREEN: &str = "blue_green";
const KIND_CANARY: &str = "canary";

// ─── Settings ─────────────────────────────────────────────────────────────────

/// Base URLs of the three environments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentEndpoints {
    /// Base URL of the blue environment.
    pub blue: String,
    /// Base URL of the green environment.
    pub green: String,
    /// Base URL of the canary environment.
    pub canary: String,
}

impl EnvironmentEndpoints {
    /// Base URL for `environment`.
    pub fn url_for(&self, environment: Environment) -> &str {
        match environment {
            Environment::Blue => &self.blue,
            Environment::Green => &self.green,
            Environment::Canary => &self.canary,
        }
    }
}

impl Default for EnvironmentEndpoints {
    fn default() -> Self {
        Self {
            blue: "http://127.0.0.1:8081".to_string(),
            green: "http://127.0.0.1:8082".to_string(),
            canary: "http://127.0.0.1:8083".to_string(),
        }
    }
}

/// Everything the controller needs besides its probe and metrics source.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Committed state at startup.
    pub initial: DeploymentConfig,
    /// Default canary traffic share.
    pub canary_traffic_percentage: u8,
    /// Default canary success threshold.
    pub canary_success_threshold: f64,
    /// Default metrics tracked for a canary.
    pub canary_tracked_metrics: std::collections::BTreeSet<MetricName>,
    /// Environment base URLs.
    pub endpoints: EnvironmentEndpoints,
    /// Upper bound on a single health check.
    pub probe_timeout: Duration,
    /// Upper bound on a single metrics poll.
    pub metrics_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            initial: DeploymentConfig {
                environment: Environment::Blue,
                version: "v0".to_string(),
                traffic_percentage: 100,
                health_check_path: DEFAULT_HEALTH_PATH.to_string(),
                rollback_error_threshold: 0.05,
                canary_window_minutes: 30,
            },
            canary_traffic_percentage: 10,
            canary_success_threshold: 0.95,
            canary_tracked_metrics: MetricName::all(),
            endpoints: EnvironmentEndpoints::default(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            metrics_timeout: Duration::from_secs(10),
        }
    }
}

// ─── Verdict ──────────────────────────────────────────────────────────────────

/// Result of one [`DeploymentController::monitor_canary`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryVerdict {
    /// History id of the canary this verdict is about. Pass it to
    /// [`DeploymentController::promote_canary_if`] or
    /// [`DeploymentController::rollback_canary`] to act on this canary only.
    pub status_id: u64,
    /// The evaluator asked for promotion.
    pub should_promote: bool,
    /// The evaluator asked for rollback.
    pub should_rollback: bool,
    /// Underlying decision (`Continue` when the tick was stale).
    pub decision: CanaryDecision,
    /// Metrics the decision was based on (last known when stale).
    pub metrics: DeploymentMetrics,
    /// Whole minutes since the canary started.
    pub elapsed_minutes: u64,
    /// `false` when the poll failed and evaluation was skipped.
    pub fresh: bool,
}

// ─── Inner state ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ActiveCanary {
    status_id: u64,
    version: String,
    config: CanaryConfig,
    target: Environment,
    started: Instant,
    last_metrics: DeploymentMetrics,
}

#[derive(Debug)]
struct InFlight {
    token: u64,
    environment: Environment,
    version: String,
}

#[derive(Debug)]
struct ControllerState {
    config: DeploymentConfig,
    canary: Option<ActiveCanary>,
    history: DeploymentHistory,
    in_flight: Option<InFlight>,
    next_token: u64,
}

impl ControllerState {
    fn ensure_idle(&self) -> Result<(), InvalidOperation> {
        match &self.in_flight {
            Some(f) => Err(InvalidOperation::DeploymentInProgress {
                environment: f.environment.to_string(),
                version: f.version.clone(),
            }),
            None => Ok(()),
        }
    }

    /// With `expected` set, require that exact canary to be the active one.
    fn ensure_canary(&self, expected: Option<u64>) -> Result<(), InvalidOperation> {
        match expected {
            Some(id) if self.canary.as_ref().map(|c| c.status_id) != Some(id) => {
                Err(InvalidOperation::NoActiveCanary)
            }
            _ => Ok(()),
        }
    }

    fn reserve(&mut self, environment: Environment, version: &str) -> u64 {
        self.next_token += 1;
        self.in_flight = Some(InFlight {
            token: self.next_token,
            environment,
            version: version.to_string(),
        });
        self.next_token
    }

    fn release(&mut self, token: u64) {
        if self.in_flight.as_ref().is_some_and(|f| f.token == token) {
            self.in_flight = None;
        }
    }

    fn routing_snapshot(&self) -> RoutingSnapshot {
        RoutingSnapshot {
            stable: self.config.environment,
            canary_percentage: self.canary.as_ref().map(|c| c.config.traffic_percentage),
        }
    }
}

/// Clears an in-flight reservation when the owning future completes or is
/// dropped mid-probe.
struct Reservation<'a> {
    state: &'a Mutex<ControllerState>,
    token: u64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.release(self.token);
        }
    }
}

// ─── Controller ───────────────────────────────────────────────────────────────

/// The stateful core of the orchestrator.
///
/// Constructed explicitly by the host process and usually shared as
/// `Arc<DeploymentController>`.
pub struct DeploymentController {
    state: Mutex<ControllerState>,
    router: TrafficRouter,
    probe: Arc<dyn HealthProbe>,
    source: Arc<dyn MetricsSource>,
    settings: ControllerSettings,
}

impl std::fmt::Debug for DeploymentController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentController")
            .field("settings", &self.settings)
            .field("routing", &self.router.snapshot())
            .finish()
    }
}

impl DeploymentController {
    /// Create a controller with an empty history.
    ///
    /// # Panics
    /// This function never panics.
    pub fn new(
        settings: ControllerSettings,
        probe: Arc<dyn HealthProbe>,
        source: Arc<dyn MetricsSource>,
    ) -> Self {
        let state = ControllerState {
            config: settings.initial.clone(),
            canary: None,
            history: DeploymentHistory::new(),
            in_flight: None,
            next_token: 0,
        };
        let router = TrafficRouter::new(state.routing_snapshot());
        Self {
            state: Mutex::new(state),
            router,
            probe,
            source,
            settings,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ControllerState>, DeploymentError> {
        self.state.lock().map_err(|_| DeploymentError::LockPoisoned)
    }

    fn publish(&self, state: &ControllerState) {
        self.router.publish(state.routing_snapshot());
        metrics::set_canary_traffic(
            state
                .canary
                .as_ref()
                .map_or(0, |c| c.config.traffic_percentage),
        );
    }

    fn canary_defaults(&self, config: &DeploymentConfig) -> CanaryConfig {
        CanaryConfig {
            traffic_percentage: self.settings.canary_traffic_percentage,
            duration_minutes: config.canary_window_minutes,
            success_threshold: self.settings.canary_success_threshold,
            error_threshold: config.rollback_error_threshold,
            tracked_metrics: self.settings.canary_tracked_metrics.clone(),
        }
    }

    async fn probe_environment(&self, environment: Environment, path: &str) -> HealthCheckResult {
        let base_url = self.settings.endpoints.url_for(environment);
        let timeout = self.settings.probe_timeout;
        let started = Instant::now();

        let result = tokio::time::timeout(timeout, self.probe.check(base_url, path, timeout))
            .await
            .unwrap_or_else(|_| HealthCheckResult::timed_out(timeout));

        metrics::record_health_check(environment.as_str(), result.healthy, started.elapsed());
        result
    }

    /// Handle for the per-request routing decision.
    pub fn router(&self) -> TrafficRouter {
        self.router.clone()
    }

    /// Settings this controller was built with.
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Blue/green cutover of `target` to `version`.
    ///
    /// Probes `target` first. When healthy, supersedes the previous open entry
    /// for `target`, appends an `Active` entry at 100% traffic, and commits
    /// `target` as the stable environment. When unhealthy, appends an already
    /// closed `Aborted` entry and changes nothing else.
    ///
    /// # Errors
    /// - [`InvalidOperation::CanaryNotDeployable`] if `target` is `canary`
    /// - [`InvalidOperation::CanaryInProgress`] while a canary is active
    /// - [`InvalidOperation::DeploymentInProgress`] while another start is probing
    ///
    /// # Panics
    /// This function never panics.
    pub async fn start_deployment(
        &self,
        target: Environment,
        version: impl Into<String>,
    ) -> Result<DeploymentStatus, DeploymentError> {
        let version = version.into();
        if !target.is_stable() {
            return Err(InvalidOperation::CanaryNotDeployable.into());
        }

        let (token, path) = {
            let mut state = self.lock()?;
            if let Some(canary) = &state.canary {
                return Err(InvalidOperation::CanaryInProgress {
                    version: canary.version.clone(),
                }
                .into());
            }
            state.ensure_idle()?;
            let token = state.reserve(target, &version);
            (token, state.config.health_check_path.clone())
        };
        let _reservation = Reservation {
            state: &self.state,
            token,
        };

        let start_time = Utc::now();
        info!(environment = %target, version = %version, "starting blue/green deployment");
        let health = self.probe_environment(target, &path).await;

        let mut state = self.lock()?;
        state.release(token);
        let now = Utc::now();

        if !health.healthy {
            warn!(
                environment = %target,
                version = %version,
                status_code = health.status_code,
                error = health.error.as_deref().unwrap_or(""),
                "health check failed, deployment aborted"
            );
            metrics::inc_deployment(KIND_BLUE_GREEN, "aborted");
            return Ok(append_aborted(&mut state.history, target, version, health, start_time, now));
        }

        if let Some(previous) = state.history.open_for(target).map(|s| s.id) {
            state
                .history
                .finalize(previous, DeploymentPhase::Superseded, now);
        }
        let status = DeploymentStatus {
            id: 0,
            environment: target,
            version: version.clone(),
            traffic_percentage: 100,
            is_healthy: true,
            phase: DeploymentPhase::Active,
            health,
            start_time,
            end_time: None,
            metrics: DeploymentMetrics::default(),
        };
        let id = state.history.append(status.clone());

        let previous_env = state.config.environment;
        if previous_env != target {
            drain(&mut state.history, previous_env);
        }
        state.config.environment = target;
        state.config.version = version.clone();
        state.config.traffic_percentage = 100;
        self.publish(&state);

        metrics::inc_deployment(KIND_BLUE_GREEN, "started");
        info!(
            from = %previous_env,
            to = %target,
            version = %version,
            "traffic cut over"
        );
        Ok(DeploymentStatus { id, ..status })
    }

    /// Start a canary of `version` at the merged canary traffic share.
    ///
    /// `overrides` are merged onto defaults built from the committed config
    /// (`canary_window_minutes`, `rollback_error_threshold`) and the
    /// controller settings.
    ///
    /// # Errors
    /// - [`InvalidOperation::CanaryAlreadyActive`] if a canary is active
    /// - [`InvalidOperation::DeploymentInProgress`] while another start is probing
    /// - [`DeploymentError::InvalidConfig`] if the merged config is invalid
    ///
    /// # Panics
    /// This function never panics.
    pub async fn start_canary_deployment(
        &self,
        version: impl Into<String>,
        overrides: CanaryOverrides,
    ) -> Result<DeploymentStatus, DeploymentError> {
        let version = version.into();

        let (token, path, canary_config) = {
            let mut state = self.lock()?;
            if let Some(canary) = &state.canary {
                return Err(InvalidOperation::CanaryAlreadyActive {
                    version: canary.version.clone(),
                }
                .into());
            }
            state.ensure_idle()?;
            let canary_config = overrides.merge_onto(&self.canary_defaults(&state.config))?;
            let token = state.reserve(Environment::Canary, &version);
            (token, state.config.health_check_path.clone(), canary_config)
        };
        let _reservation = Reservation {
            state: &self.state,
            token,
        };

        let start_time = Utc::now();
        info!(
            version = %version,
            traffic_pct = canary_config.traffic_percentage,
            duration_minutes = canary_config.duration_minutes,
            "starting canary deployment"
        );
        let health = self.probe_environment(Environment::Canary, &path).await;

        let mut state = self.lock()?;
        state.release(token);
        let now = Utc::now();

        if !health.healthy {
            warn!(
                version = %version,
                status_code = health.status_code,
                error = health.error.as_deref().unwrap_or(""),
                "canary health check failed, no traffic shifted"
            );
            metrics::inc_deployment(KIND_CANARY, "aborted");
            return Ok(append_aborted(
                &mut state.history,
                Environment::Canary,
                version,
                health,
                start_time,
                now,
            ));
        }

        let status = DeploymentStatus {
            id: 0,
            environment: Environment::Canary,
            version: version.clone(),
            traffic_percentage: canary_config.traffic_percentage,
            is_healthy: true,
            phase: DeploymentPhase::Monitoring,
            health,
            start_time,
            end_time: None,
            metrics: DeploymentMetrics::default(),
        };
        let id = state.history.append(status.clone());
        let target = state.config.environment.opposite();
        let traffic_pct = canary_config.traffic_percentage;
        state.canary = Some(ActiveCanary {
            status_id: id,
            version: version.clone(),
            config: canary_config,
            target,
            started: Instant::now(),
            last_metrics: DeploymentMetrics::default(),
        });
        self.publish(&state);

        metrics::inc_deployment(KIND_CANARY, "started");
        info!(
            version = %version,
            stable = %state.config.environment,
            target = %target,
            traffic_pct,
            "canary receiving traffic"
        );
        Ok(DeploymentStatus { id, ..status })
    }

    /// Poll canary metrics, record them, and evaluate. Does not act on the
    /// verdict.
    ///
    /// A failed or timed-out poll keeps the last known metrics and skips
    /// evaluation (`fresh == false`, decision `Continue`).
    ///
    /// # Errors
    /// Returns [`InvalidOperation::NoActiveCanary`] if no canary is active,
    /// including when the canary ended while the poll was in flight.
    ///
    /// # Panics
    /// This function never panics.
    pub async fn monitor_canary(&self) -> Result<CanaryVerdict, DeploymentError> {
        let (status_id, tracked) = {
            let state = self.lock()?;
            let canary = state
                .canary
                .as_ref()
                .ok_or(InvalidOperation::NoActiveCanary)?;
            (canary.status_id, canary.config.tracked_metrics.clone())
        };

        let timeout = self.settings.metrics_timeout;
        let collected = tokio::time::timeout(
            timeout,
            self.source.collect(Environment::Canary, &tracked),
        )
        .await
        .unwrap_or(Err(MetricsError::Timeout(timeout)));

        let mut state = self.lock()?;
        let ControllerState {
            canary, history, ..
        } = &mut *state;
        let canary = canary
            .as_mut()
            .filter(|c| c.status_id == status_id)
            .ok_or(InvalidOperation::NoActiveCanary)?;
        let elapsed_minutes = canary.started.elapsed().as_secs() / 60;

        match collected {
            Ok(fresh) => {
                canary.last_metrics = fresh;
                history.update_open(status_id, |s| s.metrics = fresh);
                let decision = evaluate(&fresh, elapsed_minutes, &canary.config);
                debug!(
                    version = %canary.version,
                    elapsed_minutes,
                    success_rate = fresh.success_rate,
                    error_rate = fresh.error_rate,
                    decision = ?decision,
                    "canary evaluated"
                );
                Ok(CanaryVerdict {
                    status_id,
                    should_promote: decision == CanaryDecision::Promote,
                    should_rollback: decision == CanaryDecision::Rollback,
                    decision,
                    metrics: fresh,
                    elapsed_minutes,
                    fresh: true,
                })
            }
            Err(e) => {
                metrics::inc_metrics_poll_failure(Environment::Canary.as_str());
                warn!(
                    version = %canary.version,
                    error = %e,
                    "metrics unavailable, keeping last known values"
                );
                Ok(CanaryVerdict {
                    status_id,
                    should_promote: false,
                    should_rollback: false,
                    decision: CanaryDecision::Continue,
                    metrics: canary.last_metrics,
                    elapsed_minutes,
                    fresh: false,
                })
            }
        }
    }

    /// Make the active canary the new stable deployment.
    ///
    /// Finalizes the canary entry as `Promoted`, supersedes the open entry of
    /// the promotion target (the blue/green environment opposite the stable
    /// one at canary start), appends an `Active` entry for the target, and
    /// commits it at 100% traffic. Returns the finalized canary entry.
    ///
    /// # Errors
    /// Returns [`InvalidOperation::NoActiveCanary`] if no canary is active.
    ///
    /// # Panics
    /// This function never panics.
    pub fn promote_canary(&self) -> Result<DeploymentStatus, DeploymentError> {
        self.promote(None)
    }

    /// [`promote_canary`](Self::promote_canary), but only if the active
    /// canary is the one recorded under `status_id`.
    ///
    /// # Errors
    /// Returns [`InvalidOperation::NoActiveCanary`] if no canary is active or
    /// a different canary is.
    ///
    /// # Panics
    /// This function never panics.
    pub fn promote_canary_if(&self, status_id: u64) -> Result<DeploymentStatus, DeploymentError> {
        self.promote(Some(status_id))
    }

    fn promote(&self, expected: Option<u64>) -> Result<DeploymentStatus, DeploymentError> {
        let mut state = self.lock()?;
        state.ensure_canary(expected)?;
        let canary = state
            .canary
            .take()
            .ok_or(InvalidOperation::NoActiveCanary)?;
        let now = Utc::now();

        state.history.update_open(canary.status_id, |s| {
            s.metrics = canary.last_metrics;
        });
        let promoted = state
            .history
            .finalize(canary.status_id, DeploymentPhase::Promoted, now);
        let health = promoted
            .as_ref()
            .map(|s| s.health.clone())
            .unwrap_or_default();

        if let Some(previous) = state.history.open_for(canary.target).map(|s| s.id) {
            state
                .history
                .finalize(previous, DeploymentPhase::Superseded, now);
        }
        state.history.append(DeploymentStatus {
            id: 0,
            environment: canary.target,
            version: canary.version.clone(),
            traffic_percentage: 100,
            is_healthy: true,
            phase: DeploymentPhase::Active,
            health,
            start_time: now,
            end_time: None,
            metrics: canary.last_metrics,
        });

        let previous_env = state.config.environment;
        if previous_env != canary.target {
            drain(&mut state.history, previous_env);
        }
        state.config.environment = canary.target;
        state.config.version = canary.version.clone();
        state.config.traffic_percentage = 100;
        self.publish(&state);

        metrics::inc_deployment(KIND_CANARY, "promoted");
        info!(
            version = %canary.version,
            from = %previous_env,
            to = %canary.target,
            "canary promoted"
        );

        // The canary entry is open for as long as `state.canary` is set.
        promoted.ok_or(DeploymentError::InvalidOperation(
            InvalidOperation::NoActiveCanary,
        ))
    }

    /// Revert traffic to the most recent non-canary deployment before the
    /// current one.
    ///
    /// With a canary active, the canary entry is the one rolled back and the
    /// canary is cleared; if nothing precedes it, the stable environment the
    /// canary ran against stays committed. Without a canary, the open entry of
    /// the committed environment is rolled back. Returns the finalized
    /// rolled-back entry.
    ///
    /// # Errors
    /// - [`InvalidOperation::NothingToRollBack`] if nothing is deployed
    /// - [`InvalidOperation::NoPriorDeployment`] if the current deployment is the first
    ///
    /// # Panics
    /// This function never panics.
    pub fn rollback_deployment(&self) -> Result<DeploymentStatus, DeploymentError> {
        self.rollback(None)
    }

    /// Roll back the canary recorded under `status_id`.
    ///
    /// Unlike [`rollback_deployment`](Self::rollback_deployment), this never
    /// touches a blue/green deployment: once that canary has been promoted or
    /// rolled back, the call fails and state is unchanged.
    ///
    /// # Errors
    /// Returns [`InvalidOperation::NoActiveCanary`] if no canary is active or
    /// a different canary is.
    ///
    /// # Panics
    /// This function never panics.
    pub fn rollback_canary(&self, status_id: u64) -> Result<DeploymentStatus, DeploymentError> {
        self.rollback(Some(status_id))
    }

    fn rollback(&self, expected: Option<u64>) -> Result<DeploymentStatus, DeploymentError> {
        let mut state = self.lock()?;
        state.ensure_canary(expected)?;

        let (current_id, canary_triggered) = match &state.canary {
            Some(canary) => (canary.status_id, true),
            None => {
                let current = state
                    .history
                    .open_for(state.config.environment)
                    .ok_or(InvalidOperation::NothingToRollBack)?;
                (current.id, false)
            }
        };

        let target = state.history.rollback_target(current_id).cloned();
        if target.is_none() && !canary_triggered {
            return Err(InvalidOperation::NoPriorDeployment.into());
        }

        let now = Utc::now();
        if canary_triggered {
            if let Some(canary) = state.canary.take() {
                state.history.update_open(canary.status_id, |s| {
                    s.metrics = canary.last_metrics;
                });
            }
        }
        let rolled_back = state
            .history
            .finalize(current_id, DeploymentPhase::RolledBack, now)
            .ok_or(InvalidOperation::NothingToRollBack)?;

        if let Some(target) = target {
            restore(&mut state.history, &target, now);
            state.config.environment = target.environment;
            state.config.version = target.version.clone();
        }
        state.config.traffic_percentage = 100;
        self.publish(&state);

        let kind = if canary_triggered {
            KIND_CANARY
        } else {
            KIND_BLUE_GREEN
        };
        metrics::inc_deployment(kind, "rolled_back");
        warn!(
            rolled_back_environment = %rolled_back.environment,
            rolled_back_version = %rolled_back.version,
            restored_environment = %state.config.environment,
            restored_version = %state.config.version,
            error_rate = rolled_back.metrics.error_rate,
            "deployment rolled back"
        );
        Ok(rolled_back)
    }

    /// Open history entry for the committed environment, if any.
    ///
    /// # Errors
    /// Returns [`DeploymentError::LockPoisoned`] if the state lock is poisoned.
    pub fn current_status(&self) -> Result<Option<DeploymentStatus>, DeploymentError> {
        let state = self.lock()?;
        Ok(state.history.open_for(state.config.environment).cloned())
    }

    /// Ordered copy of the full history.
    ///
    /// # Errors
    /// Returns [`DeploymentError::LockPoisoned`] if the state lock is poisoned.
    pub fn history(&self) -> Result<Vec<DeploymentStatus>, DeploymentError> {
        Ok(self.lock()?.history.snapshot())
    }

    /// The committed deployment config.
    ///
    /// # Errors
    /// Returns [`DeploymentError::LockPoisoned`] if the state lock is poisoned.
    pub fn deployment_config(&self) -> Result<DeploymentConfig, DeploymentError> {
        Ok(self.lock()?.config.clone())
    }

    /// Parameters of the active canary, if any.
    ///
    /// # Errors
    /// Returns [`DeploymentError::LockPoisoned`] if the state lock is poisoned.
    pub fn canary_config(&self) -> Result<Option<CanaryConfig>, DeploymentError> {
        Ok(self.lock()?.canary.as_ref().map(|c| c.config.clone()))
    }

    /// Return `true` while a canary is active. Reads the routing snapshot, so
    /// it never waits on the state lock.
    pub fn is_canary_active(&self) -> bool {
        self.router.snapshot().canary_percentage.is_some()
    }
}

fn append_aborted(
    history: &mut DeploymentHistory,
    environment: Environment,
    version: String,
    health: HealthCheckResult,
    start_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DeploymentStatus {
    let status = DeploymentStatus {
        id: 0,
        environment,
        version,
        traffic_percentage: 0,
        is_healthy: false,
        phase: DeploymentPhase::Aborted,
        health,
        start_time,
        end_time: Some(now),
        metrics: DeploymentMetrics::default(),
    };
    let id = history.append(status.clone());
    DeploymentStatus { id, ..status }
}

/// Stable environment losing traffic keeps its open entry, at 0%.
fn drain(history: &mut DeploymentHistory, environment: Environment) {
    if let Some(id) = history.open_for(environment).map(|s| s.id) {
        history.update_open(id, |s| s.traffic_percentage = 0);
    }
}

/// Make `target` current again. A still-open target just regains full
/// traffic; a closed one is re-opened as a fresh entry.
fn restore(history: &mut DeploymentHistory, target: &DeploymentStatus, now: DateTime<Utc>) {
    if target.is_open() {
        history.update_open(target.id, |s| s.traffic_percentage = 100);
        return;
    }
    if let Some(stale) = history.open_for(target.environment).map(|s| s.id) {
        history.finalize(stale, DeploymentPhase::Superseded, now);
    }
    history.append(DeploymentStatus {
        id: 0,
        environment: target.environment,
        version: target.version.clone(),
        traffic_percentage: 100,
        is_healthy: target.is_healthy,
        phase: DeploymentPhase::Active,
        health: target.health.clone(),
        start_time: now,
        end_time: None,
        metrics: DeploymentMetrics::default(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SwitchProbe {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl HealthProbe for SwitchProbe {
        async fn check(&self, _: &str, _: &str, _: Duration) -> HealthCheckResult {
            if self.healthy.load(Ordering::SeqCst) {
                HealthCheckResult::healthy(200, 1)
            } else {
                HealthCheckResult {
                    healthy: false,
                    response_time_ms: 1,
                    status_code: 503,
                    error: Some("HTTP 503".into()),
                }
            }
        }
    }

    struct FixedSource(DeploymentMetrics);

    #[async_trait]
    impl MetricsSource for FixedSource {
        async fn collect(
            &self,
            _: Environment,
            _: &BTreeSet<MetricName>,
        ) -> Result<DeploymentMetrics, MetricsError> {
            Ok(self.0)
        }
    }

    fn healthy_metrics() -> DeploymentMetrics {
        DeploymentMetrics {
            success_rate: 0.99,
            error_rate: 0.01,
            response_time_ms: 80.0,
            throughput: 100.0,
        }
    }

    fn make_controller(healthy: bool) -> (DeploymentController, Arc<SwitchProbe>) {
        let probe = Arc::new(SwitchProbe {
            healthy: AtomicBool::new(healthy),
        });
        let controller = DeploymentController::new(
            ControllerSettings::default(),
            probe.clone(),
            Arc::new(FixedSource(healthy_metrics())),
        );
        (controller, probe)
    }

    #[test]
    fn test_new_controller_has_no_current_status() {
        let (controller, _) = make_controller(true);
        assert!(controller.current_status().unwrap().is_none());
        assert!(controller.history().unwrap().is_empty());
        assert_eq!(
            controller.deployment_config().unwrap().environment,
            Environment::Blue
        );
        assert!(!controller.is_canary_active());
    }

    #[tokio::test]
    async fn test_start_deployment_cuts_over() {
        let (controller, _) = make_controller(true);
        let status = controller
            .start_deployment(Environment::Green, "v2")
            .await
            .unwrap();
        assert!(status.is_healthy);
        assert_eq!(status.phase, DeploymentPhase::Active);
        assert_eq!(status.traffic_percentage, 100);

        let config = controller.deployment_config().unwrap();
        assert_eq!(config.environment, Environment::Green);
        assert_eq!(config.version, "v2");
        assert_eq!(controller.router().snapshot().stable, Environment::Green);
        assert_eq!(controller.current_status().unwrap().unwrap().id, status.id);
    }

    #[tokio::test]
    async fn test_start_deployment_to_canary_is_rejected() {
        let (controller, _) = make_controller(true);
        let err = controller
            .start_deployment(Environment::Canary, "v2")
            .await
            .unwrap_err();
        assert_eq!(
            err.invalid_operation(),
            Some(&InvalidOperation::CanaryNotDeployable)
        );
        assert!(controller.history().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redeploying_same_environment_supersedes_previous() {
        let (controller, _) = make_controller(true);
        let first = controller
            .start_deployment(Environment::Blue, "v1")
            .await
            .unwrap();
        controller
            .start_deployment(Environment::Blue, "v2")
            .await
            .unwrap();

        let history = controller.history().unwrap();
        let old = history.iter().find(|s| s.id == first.id).unwrap();
        assert_eq!(old.phase, DeploymentPhase::Superseded);
        assert!(old.end_time.is_some());
        assert_eq!(
            history
                .iter()
                .filter(|s| s.environment == Environment::Blue && s.is_open())
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_unhealthy_canary_shifts_no_traffic() {
        let (controller, _) = make_controller(false);
        let status = controller
            .start_canary_deployment("v2", CanaryOverrides::default())
            .await
            .unwrap();
        assert!(!status.is_healthy);
        assert_eq!(status.phase, DeploymentPhase::Aborted);
        assert_eq!(status.traffic_percentage, 0);
        assert!(status.end_time.is_some());
        assert!(!controller.is_canary_active());
        assert!(controller.canary_config().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_canary_defaults_come_from_deployment_config() {
        let (controller, _) = make_controller(true);
        controller
            .start_canary_deployment("v2", CanaryOverrides::default())
            .await
            .unwrap();
        let canary = controller.canary_config().unwrap().unwrap();
        assert_eq!(canary.duration_minutes, 30);
        assert_eq!(canary.error_threshold, 0.05);
        assert_eq!(canary.traffic_percentage, 10);
        assert_eq!(controller.router().snapshot().canary_percentage, Some(10));
    }

    #[tokio::test]
    async fn test_invalid_overrides_do_not_reserve() {
        let (controller, _) = make_controller(true);
        let err = controller
            .start_canary_deployment(
                "v2",
                CanaryOverrides {
                    error_threshold: Some(2.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeploymentError::InvalidConfig { .. }));
        // A valid start right after is not blocked by a stale reservation.
        assert!(controller
            .start_canary_deployment("v2", CanaryOverrides::default())
            .await
            .unwrap()
            .is_healthy);
    }

    #[tokio::test]
    async fn test_blue_green_rejected_while_canary_active() {
        let (controller, _) = make_controller(true);
        controller
            .start_canary_deployment("v2", CanaryOverrides::default())
            .await
            .unwrap();
        let err = controller
            .start_deployment(Environment::Green, "v3")
            .await
            .unwrap_err();
        assert!(matches!(
            err.invalid_operation(),
            Some(InvalidOperation::CanaryInProgress { .. })
        ));
    }

    #[tokio::test]
    async fn test_monitor_without_canary_is_invalid() {
        let (controller, _) = make_controller(true);
        let err = controller.monitor_canary().await.unwrap_err();
        assert_eq!(
            err.invalid_operation(),
            Some(&InvalidOperation::NoActiveCanary)
        );
    }

    #[test]
    fn test_promote_without_canary_is_invalid() {
        let (controller, _) = make_controller(true);
        let err = controller.promote_canary().unwrap_err();
        assert_eq!(
            err.invalid_operation(),
            Some(&InvalidOperation::NoActiveCanary)
        );
    }

    #[test]
    fn test_rollback_with_nothing_deployed_is_invalid() {
        let (controller, _) = make_controller(true);
        let err = controller.rollback_deployment().unwrap_err();
        assert_eq!(
            err.invalid_operation(),
            Some(&InvalidOperation::NothingToRollBack)
        );
    }

    #[tokio::test]
    async fn test_rollback_first_deployment_is_invalid() {
        let (controller, _) = make_controller(true);
        controller
            .start_deployment(Environment::Green, "v1")
            .await
            .unwrap();
        let err = controller.rollback_deployment().unwrap_err();
        assert_eq!(
            err.invalid_operation(),
            Some(&InvalidOperation::NoPriorDeployment)
        );
        // Nothing changed.
        let config = controller.deployment_config().unwrap();
        assert_eq!(config.environment, Environment::Green);
        assert!(controller.current_status().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rollback_blue_green_restores_previous_environment() {
        let (controller, _) = make_controller(true);
        controller
            .start_deployment(Environment::Blue, "v1")
            .await
            .unwrap();
        let second = controller
            .start_deployment(Environment::Green, "v2")
            .await
            .unwrap();

        let rolled = controller.rollback_deployment().unwrap();
        assert_eq!(rolled.id, second.id);
        assert_eq!(rolled.phase, DeploymentPhase::RolledBack);

        let config = controller.deployment_config().unwrap();
        assert_eq!(config.environment, Environment::Blue);
        assert_eq!(config.version, "v1");
        assert_eq!(controller.current_status().unwrap().unwrap().version, "v1");
        assert_eq!(controller.router().snapshot().stable, Environment::Blue);
    }

    #[tokio::test]
    async fn test_rollback_within_same_environment_reopens_target() {
        let (controller, _) = make_controller(true);
        controller
            .start_deployment(Environment::Green, "v1")
            .await
            .unwrap();
        controller
            .start_deployment(Environment::Green, "v2")
            .await
            .unwrap();

        controller.rollback_deployment().unwrap();
        let current = controller.current_status().unwrap().unwrap();
        assert_eq!(current.environment, Environment::Green);
        assert_eq!(current.version, "v1");
        assert_eq!(current.phase, DeploymentPhase::Active);
        // v1's original entry stays frozen as superseded; a fresh one was appended.
        assert_eq!(controller.history().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_canary_rollback_without_prior_history_keeps_stable() {
        let (controller, _) = make_controller(true);
        controller
            .start_canary_deployment("v2", CanaryOverrides::default())
            .await
            .unwrap();
        let rolled = controller.rollback_deployment().unwrap();
        assert_eq!(rolled.environment, Environment::Canary);
        assert!(!controller.is_canary_active());

        let config = controller.deployment_config().unwrap();
        assert_eq!(config.environment, Environment::Blue);
        assert_eq!(config.version, "v0");
    }

    struct SlowProbe;

    #[async_trait]
    impl HealthProbe for SlowProbe {
        async fn check(&self, _: &str, _: &str, _: Duration) -> HealthCheckResult {
            tokio::time::sleep(Duration::from_secs(60)).await;
            HealthCheckResult::healthy(200, 60_000)
        }
    }

    fn slow_controller(probe_timeout: Duration) -> DeploymentController {
        DeploymentController::new(
            ControllerSettings {
                probe_timeout,
                ..Default::default()
            },
            Arc::new(SlowProbe),
            Arc::new(FixedSource(healthy_metrics())),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_start_is_rejected_while_probing() {
        let controller = slow_controller(Duration::from_secs(120));
        let (first, second) = tokio::join!(
            controller.start_deployment(Environment::Green, "v1"),
            async {
                tokio::task::yield_now().await;
                controller.start_deployment(Environment::Blue, "v2").await
            }
        );
        assert!(first.unwrap().is_healthy);
        assert!(matches!(
            second.unwrap_err().invalid_operation(),
            Some(InvalidOperation::DeploymentInProgress { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_start_releases_reservation() {
        let controller = slow_controller(Duration::from_secs(120));
        let cancelled = tokio::time::timeout(
            Duration::from_secs(1),
            controller.start_deployment(Environment::Green, "v1"),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(controller.history().unwrap().is_empty());

        let status = controller
            .start_deployment(Environment::Green, "v1")
            .await
            .unwrap();
        assert!(status.is_healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_aborts_deployment() {
        let controller = slow_controller(Duration::from_secs(5));
        let status = controller
            .start_deployment(Environment::Green, "v1")
            .await
            .unwrap();
        assert_eq!(status.phase, DeploymentPhase::Aborted);
        assert!(status.health.error.is_some());
        assert_eq!(
            controller.deployment_config().unwrap().environment,
            Environment::Blue
        );
    }

    #[tokio::test]
    async fn test_cutover_drains_previous_environment() {
        let (controller, _) = make_controller(true);
        let blue = controller
            .start_deployment(Environment::Blue, "v1")
            .await
            .unwrap();
        controller
            .start_deployment(Environment::Green, "v2")
            .await
            .unwrap();
        let history = controller.history().unwrap();
        let blue = history.iter().find(|s| s.id == blue.id).unwrap();
        assert!(blue.is_open());
        assert_eq!(blue.traffic_percentage, 0);
    }

    fn breaching_controller() -> DeploymentController {
        DeploymentController::new(
            ControllerSettings::default(),
            Arc::new(SwitchProbe {
                healthy: AtomicBool::new(true),
            }),
            Arc::new(FixedSource(DeploymentMetrics {
                success_rate: 0.80,
                error_rate: 0.20,
                response_time_ms: 400.0,
                throughput: 10.0,
            })),
        )
    }

    #[tokio::test]
    async fn test_rollback_canary_after_operator_promotion_changes_nothing() {
        let controller = breaching_controller();
        controller
            .start_deployment(Environment::Blue, "v1")
            .await
            .unwrap();
        controller
            .start_canary_deployment("v2", CanaryOverrides::default())
            .await
            .unwrap();
        let verdict = controller.monitor_canary().await.unwrap();
        assert!(verdict.should_rollback);

        // Operator promotes before the rollback verdict is applied.
        controller.promote_canary().unwrap();
        let history_before = controller.history().unwrap();

        let err = controller.rollback_canary(verdict.status_id).unwrap_err();
        assert_eq!(
            err.invalid_operation(),
            Some(&InvalidOperation::NoActiveCanary)
        );
        let config = controller.deployment_config().unwrap();
        assert_eq!(config.environment, Environment::Green);
        assert_eq!(config.version, "v2");
        assert_eq!(controller.history().unwrap(), history_before);
        assert_eq!(controller.router().snapshot().stable, Environment::Green);
    }

    #[tokio::test]
    async fn test_stale_verdict_does_not_touch_newer_canary() {
        let controller = breaching_controller();
        controller
            .start_deployment(Environment::Blue, "v1")
            .await
            .unwrap();
        controller
            .start_canary_deployment("v2", CanaryOverrides::default())
            .await
            .unwrap();
        let old = controller.monitor_canary().await.unwrap();

        controller.rollback_deployment().unwrap();
        let newer = controller
            .start_canary_deployment("v3", CanaryOverrides::default())
            .await
            .unwrap();
        assert_ne!(newer.id, old.status_id);

        for err in [
            controller.rollback_canary(old.status_id).unwrap_err(),
            controller.promote_canary_if(old.status_id).unwrap_err(),
        ] {
            assert_eq!(
                err.invalid_operation(),
                Some(&InvalidOperation::NoActiveCanary)
            );
        }
        assert!(controller.is_canary_active());
        assert_eq!(
            controller.current_status().unwrap().unwrap().version,
            "v1"
        );

        let rolled_back = controller.rollback_canary(newer.id).unwrap();
        assert_eq!(rolled_back.version, "v3");
        assert_eq!(rolled_back.phase, DeploymentPhase::RolledBack);
        assert!(!controller.is_canary_active());
    }

    #[tokio::test]
    async fn test_promote_canary_if_matching_id_promotes() {
        let (controller, _) = make_controller(true);
        let canary = controller
            .start_canary_deployment(
                "v2",
                CanaryOverrides {
                    duration_minutes: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let verdict = controller.monitor_canary().await.unwrap();
        assert_eq!(verdict.status_id, canary.id);
        assert!(verdict.should_promote);

        let promoted = controller.promote_canary_if(verdict.status_id).unwrap();
        assert_eq!(promoted.phase, DeploymentPhase::Promoted);
        assert_eq!(
            controller.deployment_config().unwrap().environment,
            Environment::Green
        );
    }
}
