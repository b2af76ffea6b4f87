//! End-to-end controller scenarios with scripted health and metrics fakes.
//!
//! Time-dependent tests run on a paused Tokio clock and advance it explicitly,
//! one minute per monitor tick.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use tokio_traffic_orchestrator::deploy::{
    CanaryDecision, CanaryOverrides, ControllerSettings, DeploymentController, DeploymentMetrics,
    DeploymentPhase, DeploymentStatus, Environment, HealthCheckResult, HealthProbe,
    InvalidOperation, MetricName, MetricsError, MetricsSource, RoutingKey,
};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct ScriptedProbe {
    unhealthy: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(&self, _: &str, _: &str, _: Duration) -> HealthCheckResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unhealthy.load(Ordering::SeqCst) {
            HealthCheckResult {
                healthy: false,
                response_time_ms: 4,
                status_code: 503,
                error: Some("HTTP 503".into()),
            }
        } else {
            HealthCheckResult::healthy(200, 4)
        }
    }
}

/// Pops one scripted result per poll; repeats the last one when exhausted.
#[derive(Default)]
struct ScriptedMetrics {
    script: Mutex<VecDeque<Result<DeploymentMetrics, MetricsError>>>,
    fallback: Mutex<Option<DeploymentMetrics>>,
}

impl ScriptedMetrics {
    fn push(&self, result: Result<DeploymentMetrics, MetricsError>) {
        self.script.lock().expect("test: script lock").push_back(result);
    }
}

#[async_trait]
impl MetricsSource for ScriptedMetrics {
    async fn collect(
        &self,
        _: Environment,
        _: &BTreeSet<MetricName>,
    ) -> Result<DeploymentMetrics, MetricsError> {
        let next = self.script.lock().expect("test: script lock").pop_front();
        let mut fallback = self.fallback.lock().expect("test: fallback lock");
        match next {
            Some(Ok(m)) => {
                *fallback = Some(m);
                Ok(m)
            }
            Some(Err(e)) => Err(e),
            None => fallback
                .ok_or_else(|| MetricsError::Transport("no metrics scripted".into())),
        }
    }
}

fn good() -> DeploymentMetrics {
    DeploymentMetrics {
        success_rate: 0.99,
        error_rate: 0.01,
        response_time_ms: 110.0,
        throughput: 250.0,
    }
}

fn failing() -> DeploymentMetrics {
    DeploymentMetrics {
        success_rate: 0.88,
        error_rate: 0.12,
        response_time_ms: 480.0,
        throughput: 240.0,
    }
}

struct Fixture {
    controller: DeploymentController,
    probe: Arc<ScriptedProbe>,
    metrics: Arc<ScriptedMetrics>,
}

fn fixture() -> Fixture {
    let probe = Arc::new(ScriptedProbe::default());
    let metrics = Arc::new(ScriptedMetrics::default());
    let controller =
        DeploymentController::new(ControllerSettings::default(), probe.clone(), metrics.clone());
    Fixture {
        controller,
        probe,
        metrics,
    }
}

/// 10% / 5 min / success 0.95 / error 0.05.
fn scenario_overrides() -> CanaryOverrides {
    CanaryOverrides {
        traffic_percentage: Some(10),
        duration_minutes: Some(5),
        success_threshold: Some(0.95),
        error_threshold: Some(0.05),
        tracked_metrics: None,
    }
}

fn closed_entries_unchanged(before: &[DeploymentStatus], after: &[DeploymentStatus]) {
    for old in before.iter().filter(|s| s.end_time.is_some()) {
        let new = after
            .iter()
            .find(|s| s.id == old.id)
            .expect("test: entry never removed");
        assert_eq!(new, old, "closed entry {} changed", old.id);
    }
}

// ============================================================================
// Health gate
// ============================================================================

#[tokio::test]
async fn test_failed_health_check_aborts_cleanly() {
    let f = fixture();
    f.controller
        .start_deployment(Environment::Blue, "v2")
        .await
        .expect("test: blue deploy");
    let before = f.controller.deployment_config().expect("test: config");
    let router_before = f.controller.router().snapshot();

    f.probe.set_healthy(false);
    let status = f
        .controller
        .start_deployment(Environment::Green, "v3")
        .await
        .expect("test: deploy returns status");

    assert!(!status.is_healthy);
    assert_eq!(status.traffic_percentage, 0);
    assert_eq!(f.controller.deployment_config().expect("test: config"), before);
    assert_eq!(f.controller.router().snapshot(), router_before);

    let history = f.controller.history().expect("test: history");
    assert!(history
        .iter()
        .filter(|s| s.environment == Environment::Green)
        .all(|s| s.end_time.is_some() && s.traffic_percentage == 0));
    for _ in 0..1000 {
        assert_ne!(f.controller.router().route(RoutingKey::Random), Environment::Green);
    }
}

#[tokio::test]
async fn test_unhealthy_canary_routes_nothing() {
    let f = fixture();
    f.probe.set_healthy(false);
    let before = f.controller.deployment_config().expect("test: config");
    let status = f
        .controller
        .start_canary_deployment("v2", scenario_overrides())
        .await
        .expect("test: canary returns status");

    assert!(!status.is_healthy);
    assert_eq!(status.phase, DeploymentPhase::Aborted);
    assert_eq!(f.controller.deployment_config().expect("test: config"), before);
    assert!(!f.controller.is_canary_active());
    for _ in 0..1000 {
        assert_ne!(f.controller.router().route(RoutingKey::Random), Environment::Canary);
    }
}

// ============================================================================
// Canary lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_happy_path_canary_promotes_after_window() {
    let f = fixture();
    f.controller
        .start_deployment(Environment::Blue, "v1")
        .await
        .expect("test: blue deploy");
    f.controller
        .start_canary_deployment("v2", scenario_overrides())
        .await
        .expect("test: canary start");
    for _ in 0..5 {
        f.metrics.push(Ok(good()));
    }

    let mut verdicts = Vec::new();
    for _ in 0..5 {
        tokio::time::advance(Duration::from_secs(60)).await;
        verdicts.push(f.controller.monitor_canary().await.expect("test: monitor"));
    }
    assert!(verdicts[..4].iter().all(|v| v.decision == CanaryDecision::Continue));
    let last = verdicts.last().expect("test: five verdicts");
    assert!(last.should_promote);
    assert!(!last.should_rollback);
    assert_eq!(last.elapsed_minutes, 5);

    let promoted = f.controller.promote_canary().expect("test: promote");
    assert_eq!(promoted.phase, DeploymentPhase::Promoted);
    assert!(promoted.end_time.is_some());
    assert_eq!(promoted.metrics, good());

    let config = f.controller.deployment_config().expect("test: config");
    assert_eq!(config.traffic_percentage, 100);
    assert_eq!(config.environment, Environment::Green);
    assert_eq!(config.version, "v2");
    assert!(f.controller.canary_config().expect("test: canary").is_none());

    let current = f
        .controller
        .current_status()
        .expect("test: status")
        .expect("test: current entry");
    assert_eq!(current.environment, Environment::Green);
    assert_eq!(current.version, "v2");
}

#[tokio::test(start_paused = true)]
async fn test_error_spike_rolls_back_before_window_ends() {
    let f = fixture();
    f.controller
        .start_deployment(Environment::Blue, "v1")
        .await
        .expect("test: blue deploy");
    f.controller
        .start_canary_deployment("v2", scenario_overrides())
        .await
        .expect("test: canary start");
    f.metrics.push(Ok(good()));
    f.metrics.push(Ok(failing()));

    tokio::time::advance(Duration::from_secs(60)).await;
    let first = f.controller.monitor_canary().await.expect("test: tick 1");
    assert_eq!(first.decision, CanaryDecision::Continue);

    tokio::time::advance(Duration::from_secs(60)).await;
    let second = f.controller.monitor_canary().await.expect("test: tick 2");
    assert!(second.should_rollback);
    assert_eq!(second.elapsed_minutes, 2);

    let rolled = f.controller.rollback_deployment().expect("test: rollback");
    assert_eq!(rolled.environment, Environment::Canary);
    assert_eq!(rolled.phase, DeploymentPhase::RolledBack);
    assert_eq!(rolled.metrics.error_rate, 0.12);

    let config = f.controller.deployment_config().expect("test: config");
    assert_eq!(config.environment, Environment::Blue);
    assert_eq!(config.version, "v1");
    assert!(!f.controller.is_canary_active());
}

#[tokio::test(start_paused = true)]
async fn test_metrics_outage_keeps_last_known_values() {
    let f = fixture();
    f.controller
        .start_canary_deployment("v2", scenario_overrides())
        .await
        .expect("test: canary start");
    f.metrics.push(Ok(good()));
    f.metrics.push(Err(MetricsError::Status(502)));

    tokio::time::advance(Duration::from_secs(60)).await;
    f.controller.monitor_canary().await.expect("test: tick 1");

    tokio::time::advance(Duration::from_secs(60)).await;
    let stale = f.controller.monitor_canary().await.expect("test: tick 2");
    assert!(!stale.fresh);
    assert_eq!(stale.decision, CanaryDecision::Continue);
    assert_eq!(stale.metrics, good());
    assert!(f.controller.is_canary_active());
}

#[tokio::test]
async fn test_second_canary_fails_and_leaves_first_untouched() {
    let f = fixture();
    let first = f
        .controller
        .start_canary_deployment("v2", scenario_overrides())
        .await
        .expect("test: first canary");
    let config_before = f.controller.canary_config().expect("test: canary");
    let probes_before = f.probe.calls.load(Ordering::SeqCst);

    let err = f
        .controller
        .start_canary_deployment(
            "v3",
            CanaryOverrides {
                traffic_percentage: Some(50),
                ..Default::default()
            },
        )
        .await
        .expect_err("test: second canary must fail");
    assert_eq!(
        err.invalid_operation(),
        Some(&InvalidOperation::CanaryAlreadyActive {
            version: "v2".into()
        })
    );

    assert_eq!(f.probe.calls.load(Ordering::SeqCst), probes_before);
    assert_eq!(f.controller.canary_config().expect("test: canary"), config_before);
    assert_eq!(f.controller.router().snapshot().canary_percentage, Some(10));
    let history = f.controller.history().expect("test: history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, first.id);
    assert!(history[0].is_open());
}

#[tokio::test]
async fn test_rollback_picks_most_recent_stable_entry() {
    let f = fixture();
    f.controller
        .start_deployment(Environment::Blue, "v1")
        .await
        .expect("test: A");
    f.controller
        .start_deployment(Environment::Green, "v2")
        .await
        .expect("test: B");
    f.controller
        .start_canary_deployment("v3", scenario_overrides())
        .await
        .expect("test: C");

    f.controller.rollback_deployment().expect("test: rollback");
    let config = f.controller.deployment_config().expect("test: config");
    assert_eq!(config.environment, Environment::Green);
    assert_eq!(config.version, "v2");
}

// ============================================================================
// History invariants
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_closed_entries_never_change() {
    let f = fixture();
    let mut snapshots = Vec::new();

    f.controller
        .start_deployment(Environment::Blue, "v1")
        .await
        .expect("test: deploy");
    snapshots.push(f.controller.history().expect("test: history"));

    f.probe.set_healthy(false);
    f.controller
        .start_deployment(Environment::Green, "v2")
        .await
        .expect("test: aborted deploy");
    snapshots.push(f.controller.history().expect("test: history"));

    f.probe.set_healthy(true);
    f.controller
        .start_deployment(Environment::Blue, "v1.1")
        .await
        .expect("test: redeploy");
    snapshots.push(f.controller.history().expect("test: history"));

    f.controller
        .start_canary_deployment("v3", scenario_overrides())
        .await
        .expect("test: canary");
    f.metrics.push(Ok(good()));
    tokio::time::advance(Duration::from_secs(60)).await;
    f.controller.monitor_canary().await.expect("test: tick");
    f.controller.rollback_deployment().expect("test: rollback");
    snapshots.push(f.controller.history().expect("test: history"));

    f.controller
        .start_deployment(Environment::Green, "v4")
        .await
        .expect("test: deploy");
    f.controller.rollback_deployment().expect("test: rollback");
    snapshots.push(f.controller.history().expect("test: history"));

    for pair in snapshots.windows(2) {
        closed_entries_unchanged(&pair[0], &pair[1]);
    }

    let last = snapshots.last().expect("test: snapshots");
    assert!(last.windows(2).all(|w| w[0].id < w[1].id));
    for env in [Environment::Blue, Environment::Green, Environment::Canary] {
        assert!(
            last.iter()
                .filter(|s| s.environment == env && s.is_open())
                .count()
                <= 1,
            "more than one open entry for {env}"
        );
    }
}

#[tokio::test]
async fn test_current_status_tracks_committed_environment() {
    let f = fixture();
    assert!(f.controller.current_status().expect("test: status").is_none());

    f.controller
        .start_deployment(Environment::Green, "v1")
        .await
        .expect("test: deploy");
    let current = f
        .controller
        .current_status()
        .expect("test: status")
        .expect("test: current");
    assert_eq!(current.environment, Environment::Green);
    assert!(current.end_time.is_none());
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_router_follows_canary_lifecycle() {
    let f = fixture();
    let router = f.controller.router();
    f.controller
        .start_canary_deployment(
            "v2",
            CanaryOverrides {
                traffic_percentage: Some(30),
                ..Default::default()
            },
        )
        .await
        .expect("test: canary");

    let n = 100_000;
    let canary = (0..n)
        .filter(|_| router.route(RoutingKey::Random) == Environment::Canary)
        .count();
    let share = canary as f64 / n as f64;
    assert!((share - 0.30).abs() <= 0.01, "canary share {share}");

    f.controller.promote_canary().expect("test: promote");
    for _ in 0..1000 {
        assert_eq!(router.route(RoutingKey::Random), Environment::Green);
    }
}
