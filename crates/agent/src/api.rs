//! HTTP API for the lifecycle handlers, capacity reports, health and metrics

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use drain_lib::{
    CapacityEstimator, DrainController, DrainError, HeadroomPublisher, LifecycleEnvelope,
    LifecycleInit, StructuredLogger,
};
use anyhow::{anyhow, Context};
use prometheus::{Encoder, TextEncoder};
use tokio::task::JoinHandle;
use serde_json::{json, Value};
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub init: Arc<LifecycleInit>,
    pub controller: Arc<DrainController>,
    pub estimator: Arc<CapacityEstimator>,
    pub publisher: Arc<dyn HeadroomPublisher>,
    pub logger: StructuredLogger,
}

/// Handler failure mapped onto an HTTP status
pub struct ApiError(DrainError);

impl From<DrainError> for ApiError {
    fn from(err: DrainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self.0 {
            DrainError::InvalidEnvelope(_)
            | DrainError::InvalidTimeout(_)
            | DrainError::InvalidDeadline(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": self.0.to_string() })),
            )
                .into_response(),
            DrainError::NodeNotFound { .. } => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": self.0.to_string() })),
            )
                .into_response(),
            _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

/// Start the drain workflow for a fresh scale-in notification
async fn notify(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Json<LifecycleEnvelope>, ApiError> {
    let envelope = LifecycleEnvelope::from_value(payload)?;
    match state.init.start(envelope).await {
        Ok(stamped) => Ok(Json(stamped)),
        Err(e) => {
            state
                .logger
                .log_drain_failure(&e.to_string(), e.is_retryable());
            Err(e.into())
        }
    }
}

/// Perform one drain transition and hand back the updated payload
async fn step(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Json<LifecycleEnvelope>, ApiError> {
    let envelope = LifecycleEnvelope::from_value(payload)?;
    match state.controller.step(envelope).await {
        Ok(outcome) => {
            state.logger.log_drain_step(
                outcome
                    .envelope
                    .container_instance_arn
                    .as_deref()
                    .unwrap_or("unknown"),
                outcome.phase,
                outcome.reason.as_str(),
            );
            Ok(Json(outcome.envelope))
        }
        Err(e) => {
            state
                .logger
                .log_drain_failure(&e.to_string(), e.is_retryable());
            Err(e.into())
        }
    }
}

/// Estimate and publish headroom for one cluster
async fn capacity(
    State(state): State<Arc<AppState>>,
    Path(cluster): Path<String>,
) -> Result<Json<drain_lib::CapacityReport>, ApiError> {
    let report = state
        .estimator
        .estimate_and_publish(&cluster, state.publisher.as_ref())
        .await
        .map_err(|e| {
            error!(cluster = %cluster, error = %e, "Capacity estimation failed");
            e
        })?;
    state.logger.log_capacity(&report);
    Ok(Json(report))
}

async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/lifecycle/notify", post(notify))
        .route("/lifecycle/step", post(step))
        .route("/capacity/:cluster", get(capacity))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server; returns once `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Wait for the shutdown signal while watching the server task.
///
/// Returns the still-running server handle once the signal fires, or an
/// error as soon as the server exits on its own.
pub async fn wait_for_shutdown<F>(
    signal: F,
    mut server: JoinHandle<anyhow::Result<()>>,
) -> anyhow::Result<JoinHandle<anyhow::Result<()>>>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        result = signal => {
            result.context("Failed to listen for shutdown signal")?;
            Ok(server)
        }
        result = &mut server => match result {
            Ok(Ok(())) => Err(anyhow!("API server stopped unexpectedly")),
            Ok(Err(e)) => Err(e.context("API server failed")),
            Err(e) => Err(anyhow::Error::new(e).context("API server task failed")),
        },
    }
}
