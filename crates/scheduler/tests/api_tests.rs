//! Integration tests for the scheduler API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use fleet_scheduler::api::{create_router, AppState};
use scheduler_lib::{
    assignment::{AssignmentConfig, AssignmentEngine},
    benchmark::{BenchmarkConfig, BenchmarkHarness, BenchmarkLog},
    bus::InMemoryBus,
    health::{components, HealthRegistry},
    monitor::LoadRegistry,
    observability::{SchedulerMetrics, StructuredLogger},
    orchestrator::{SimulatedCluster, SimulatedDeployment},
    predictor::{AutoscalerConfig, PredictiveAutoscaler},
    prewarm::{PrewarmConfig, PrewarmStateMachine},
    telemetry::TelemetryCollector,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    _dir: TempDir,
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn setup_test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let health_registry = HealthRegistry::new();
    health_registry
        .watch(components::MONITOR, Duration::from_secs(15), true)
        .await;

    let metrics = SchedulerMetrics::new();
    let logger = StructuredLogger::new("test");

    let cluster = Arc::new(SimulatedCluster::new());
    cluster.add_deployment(
        SimulatedDeployment::new("machine", labels(&[("app", "machine")]))
            .with_pod_names(["m1", "m2", "m3", "m4", "m5"]),
    );
    cluster.add_deployment(
        SimulatedDeployment::new("processor", labels(&[("app", "processor")]))
            .with_pod_names(["p1", "p2"]),
    );
    let bus = Arc::new(InMemoryBus::new());
    let log = Arc::new(BenchmarkLog::new(dir.path().join("benchmark.csv")));

    let assignment = Arc::new(AssignmentEngine::new(
        cluster.clone(),
        bus.clone(),
        AssignmentConfig {
            grace_period: Duration::ZERO,
            ..Default::default()
        },
        metrics.clone(),
        logger.clone(),
    ));
    let autoscaler = Arc::new(PredictiveAutoscaler::new(
        assignment.clone(),
        Arc::new(TelemetryCollector::new()),
        Arc::new(BenchmarkHarness::new(
            cluster.clone(),
            log.clone(),
            BenchmarkConfig::default(),
            metrics.clone(),
            logger.clone(),
        )),
        Arc::new(PrewarmStateMachine::new(
            cluster,
            bus,
            log,
            PrewarmConfig::default(),
            metrics.clone(),
            logger.clone(),
        )),
        AutoscalerConfig {
            classifier_path: dir.path().join("classifier.json"),
            benchmark_each_cycle: false,
            ..Default::default()
        },
        metrics.clone(),
        logger,
    ));

    let state = Arc::new(AppState {
        health_registry,
        metrics,
        assignment,
        load: Arc::new(LoadRegistry::new(Duration::from_secs(30))),
        overflow_processor: "processor-overflow".to_string(),
        autoscaler,
    });

    TestApp {
        router: create_router(state.clone()),
        state,
        _dir: dir,
    }
}

async fn get(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .report_healthy(components::MONITOR)
        .await;

    let (status, health) = get(app.router, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .report_degraded(components::ASSIGNMENT, "Timed out waiting for machines")
        .await;

    let (status, health) = get(app.router, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .report_unhealthy(components::MONITOR, "Bus disconnected")
        .await;

    let (status, health) = get(app.router, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_before_first_evaluation() {
    let app = setup_test_app().await;

    let (status, readiness) = get(app.router, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
    assert_eq!(readiness["reason"], "Waiting for first monitor report");
}

#[tokio::test]
async fn test_readyz_returns_ok_after_monitor_reports() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .report_healthy(components::MONITOR)
        .await;

    let (status, readiness) = get(app.router, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_during_shutdown() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .report_healthy(components::MONITOR)
        .await;
    app.state.health_registry.begin_shutdown();

    let (status, readiness) = get(app.router, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["reason"], "Scheduler shutting down");
}

#[tokio::test]
async fn test_metrics_exposition() {
    let app = setup_test_app().await;
    app.state.metrics.set_assignment(5, 2);

    let response = app
        .router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("fleet_scheduler_"));
}

#[tokio::test]
async fn test_assignments_404_before_first_schedule() {
    let app = setup_test_app().await;

    let (status, body) = get(app.router, "/api/v1/assignments").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_assignments_after_schedule() {
    let app = setup_test_app().await;
    app.state.assignment.schedule().await.unwrap();

    let (status, body) = get(app.router, "/api/v1/assignments").await;

    assert_eq!(status, StatusCode::OK);
    let processors = body["processors"].as_array().unwrap();
    assert_eq!(processors.len(), 2);
    assert_eq!(processors[0]["processor_id"], "p1");
    assert_eq!(processors[1]["machines"], serde_json::json!(["m3", "m4", "m5"]));
}

#[tokio::test]
async fn test_overflow_view() {
    let app = setup_test_app().await;
    let now = Instant::now();
    for _ in 0..3 {
        app.state.load.record_arrival("m1", now);
    }
    app.state.load.record_arrival("m2", now);
    app.state.load.mark_overflow_assigned("m1");

    let (status, body) = get(app.router, "/api/v1/overflow").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overflow_processor"], "processor-overflow");
    assert_eq!(body["machines"], serde_json::json!(["m1"]));

    let rates = body["rates"].as_array().unwrap();
    assert_eq!(rates.len(), 2);
    assert_eq!(rates[0]["machine_id"], "m1");
    assert_eq!(rates[0]["messages_in_window"], 3);
    assert_eq!(rates[0]["overflow"], true);
    assert_eq!(rates[1]["overflow"], false);
}

#[tokio::test]
async fn test_last_cycle_after_run() {
    let app = setup_test_app().await;

    let (status, _) = get(app.router.clone(), "/api/v1/autoscaler/last-cycle").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.state.autoscaler.run_cycle().await;

    let (status, body) = get(app.router, "/api/v1/autoscaler/last-cycle").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["score"]["status"], "no_classifier");
    assert_eq!(body["decision"]["action"], "hold");
    assert_eq!(body["assigned_machines"], 5);
}
