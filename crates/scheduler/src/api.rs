//! HTTP API for health checks, Prometheus metrics and scheduler state

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use scheduler_lib::{
    assignment::AssignmentEngine,
    health::{ComponentStatus, HealthRegistry},
    monitor::LoadRegistry,
    observability::SchedulerMetrics,
    predictor::PredictiveAutoscaler,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: SchedulerMetrics,
    pub assignment: Arc<AssignmentEngine>,
    pub load: Arc<LoadRegistry>,
    pub overflow_processor: String,
    pub autoscaler: Arc<PredictiveAutoscaler>,
}

/// Machines routed to the overflow processor and current arrival rates
#[derive(Debug, Serialize)]
pub struct OverflowView {
    pub overflow_processor: String,
    pub machines: Vec<String>,
    pub rates: Vec<MachineRate>,
}

#[derive(Debug, Serialize)]
pub struct MachineRate {
    pub machine_id: String,
    pub messages_in_window: usize,
    pub overflow: bool,
}

fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
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

/// Latest applied machine-to-processor assignment
async fn assignments(State(state): State<Arc<AppState>>) -> Response {
    match state.assignment.latest().await {
        Some(assignment) => Json(assignment).into_response(),
        None => not_found("no assignment applied yet"),
    }
}

async fn overflow(State(state): State<Arc<AppState>>) -> Json<OverflowView> {
    let rates = state
        .load
        .rates(Instant::now())
        .into_iter()
        .map(|(machine_id, messages_in_window)| MachineRate {
            overflow: state.load.is_overflow_assigned(&machine_id),
            machine_id,
            messages_in_window,
        })
        .collect();

    Json(OverflowView {
        overflow_processor: state.overflow_processor.clone(),
        machines: state.load.overflow_assigned(),
        rates,
    })
}

async fn last_cycle(State(state): State<Arc<AppState>>) -> Response {
    match state.autoscaler.last_cycle().await {
        Some(report) => Json(report).into_response(),
        None => not_found("no autoscaler cycle completed yet"),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/assignments", get(assignments))
        .route("/api/v1/overflow", get(overflow))
        .route("/api/v1/autoscaler/last-cycle", get(last_cycle))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
