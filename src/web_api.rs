//! Operator API
//!
//! HTTP control surface over a shared [`DeploymentController`].
//!
//! ## Endpoints
//!
//! - `POST /api/v1/deployments`: blue/green cutover `{environment, version}`
//! - `POST /api/v1/canary`: start a canary `{version, overrides?}`
//! - `POST /api/v1/canary/monitor`: poll and evaluate the active canary
//! - `POST /api/v1/canary/promote`: promote the active canary
//! - `POST /api/v1/rollback`: roll back the current deployment
//! - `GET  /api/v1/status`: current deployment, config, canary, routing
//! - `GET  /api/v1/history`: full deployment history
//! - `GET  /api/v1/route?key=`: which environment a request would hit
//! - `GET  /health`: liveness
//! - `GET  /metrics`: Prometheus metrics
//!
//! Rejected operations answer 409, bad canary overrides 422, and internal
//! failures 500, each with a `{"error": "..."}` body. A failed health check
//! is not an error: it is a 200 whose body has `is_healthy: false`.

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::deploy::{
    CanaryConfig, CanaryOverrides, CanaryVerdict, DeploymentConfig, DeploymentController,
    DeploymentError, DeploymentStatus, Environment, RoutingKey, RoutingSnapshot,
};

// ============================================================================
// Types & Configuration
// ============================================================================

/// Configuration for the operator API HTTP server.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address or hostname to bind to (e.g. `"0.0.0.0"` for all interfaces).
    pub host: String,
    /// TCP port the server listens on.
    pub port: u16,
    /// Maximum allowed request body size in bytes.
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_request_size: 64 * 1024,
        }
    }
}

/// JSON body for `POST /api/v1/deployments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Environment to cut over (`blue` or `green`).
    pub environment: Environment,
    /// Version to deploy.
    pub version: String,
}

/// JSON body for `POST /api/v1/canary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryRequest {
    /// Version to canary.
    pub version: String,
    /// Per-canary parameter overrides.
    #[serde(default)]
    pub overrides: CanaryOverrides,
}

/// Response body for `GET /api/v1/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Open entry of the committed environment.
    pub current: Option<DeploymentStatus>,
    /// Committed deployment config.
    pub config: DeploymentConfig,
    /// Active canary parameters.
    pub canary: Option<CanaryConfig>,
    /// Routing snapshot requests currently see.
    pub routing: RoutingSnapshot,
}

/// Query string for `GET /api/v1/route`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteQuery {
    /// Sticky routing key; a random draw is used when absent.
    pub key: Option<String>,
}

/// Response body for `GET /api/v1/route`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResponse {
    /// Selected environment.
    pub environment: Environment,
}

type AppState = Arc<DeploymentController>;

// ============================================================================
// Server
// ============================================================================

/// Build the operator API router.
pub fn router(controller: Arc<DeploymentController>, max_request_size: usize) -> Router {
    Router::new()
        .route("/api/v1/deployments", post(deploy_handler))
        .route("/api/v1/canary", post(canary_handler))
        .route("/api/v1/canary/monitor", post(monitor_handler))
        .route("/api/v1/canary/promote", post(promote_handler))
        .route("/api/v1/rollback", post(rollback_handler))
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/history", get(history_handler))
        .route("/api/v1/route", get(route_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(
            max_request_size,
            body_size_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}

/// Start the operator API server.
///
/// Binds to `config.host:config.port` and serves until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
///
/// # Panics
///
/// This function never panics.
pub async fn start_server(
    config: ServerConfig,
    controller: Arc<DeploymentController>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = router(controller, config.max_request_size);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Operator API ready on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

// ============================================================================
// Middleware
// ============================================================================

/// Rejects requests whose `Content-Length` exceeds `max_size` with 413.
///
/// # Panics
///
/// This function never panics.
async fn body_size_middleware(
    State(max_size): State<usize>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(content_length) = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok())
    {
        if content_length > max_size {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({"error": "Request body too large"})),
            )
                .into_response();
        }
    }

    next.run(req).await
}

// ============================================================================
// Handlers
// ============================================================================

async fn deploy_handler(
    State(controller): State<AppState>,
    Json(req): Json<DeployRequest>,
) -> Result<Json<DeploymentStatus>, AppError> {
    let status = controller
        .start_deployment(req.environment, req.version)
        .await?;
    Ok(Json(status))
}

async fn canary_handler(
    State(controller): State<AppState>,
    Json(req): Json<CanaryRequest>,
) -> Result<Json<DeploymentStatus>, AppError> {
    let status = controller
        .start_canary_deployment(req.version, req.overrides)
        .await?;
    Ok(Json(status))
}

async fn monitor_handler(
    State(controller): State<AppState>,
) -> Result<Json<CanaryVerdict>, AppError> {
    Ok(Json(controller.monitor_canary().await?))
}

async fn promote_handler(
    State(controller): State<AppState>,
) -> Result<Json<DeploymentStatus>, AppError> {
    Ok(Json(controller.promote_canary()?))
}

async fn rollback_handler(
    State(controller): State<AppState>,
) -> Result<Json<DeploymentStatus>, AppError> {
    Ok(Json(controller.rollback_deployment()?))
}

/// `GET /api/v1/status`
///
/// The routing snapshot is read after the locked fields, so it may be newer
/// than `config` but never older.
async fn status_handler(
    State(controller): State<AppState>,
) -> Result<Json<StatusResponse>, AppError> {
    let current = controller.current_status()?;
    let config = controller.deployment_config()?;
    let canary = controller.canary_config()?;
    Ok(Json(StatusResponse {
        current,
        config,
        canary,
        routing: controller.router().snapshot(),
    }))
}

async fn history_handler(
    State(controller): State<AppState>,
) -> Result<Json<Vec<DeploymentStatus>>, AppError> {
    Ok(Json(controller.history()?))
}

async fn route_handler(
    State(controller): State<AppState>,
    Query(query): Query<RouteQuery>,
) -> Json<RouteResponse> {
    let key = match query.key.as_deref() {
        Some(k) => RoutingKey::Sticky(k),
        None => RoutingKey::Random,
    };
    let environment = controller.router().route(key);
    crate::metrics::inc_route(environment.as_str());
    Json(RouteResponse { environment })
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /metrics`: Prometheus text exposition.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

// ============================================================================
// Errors
// ============================================================================

/// Handler error rendered as `{"error": "..."}`.
#[derive(Debug)]
enum AppError {
    Deployment(DeploymentError),
}

impl From<DeploymentError> for AppError {
    fn from(e: DeploymentError) -> Self {
        AppError::Deployment(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let AppError::Deployment(e) = self;
        let status = match &e {
            DeploymentError::InvalidOperation(_) => StatusCode::CONFLICT,
            DeploymentError::InvalidConfig { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DeploymentError::LockPoisoned => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
    }
}

// ============================================================================
// Tests
// ============================================================================
