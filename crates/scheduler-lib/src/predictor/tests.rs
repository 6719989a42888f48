//! Autoscaler cycle scenarios against the simulated cluster

use super::*;
use crate::assignment::{AssignmentConfig, AssignmentEngine};
use crate::benchmark::{BenchmarkConfig, BenchmarkHarness, BenchmarkLog, ColdStartOutcome};
use crate::bus::{InMemoryBus, Message};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{BenchmarkEvent, PrewarmPhase};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::orchestrator::{SimulatedCluster, SimulatedDeployment};
use crate::prewarm::{PrewarmConfig, PrewarmStateMachine};
use crate::telemetry::TelemetryCollector;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn fleet(with_machines: bool, with_prewarm: bool) -> Arc<SimulatedCluster> {
    let cluster = Arc::new(SimulatedCluster::new());
    if with_machines {
        cluster.add_deployment(
            SimulatedDeployment::new("machine", labels(&[("app", "machine")]))
                .with_pod_names(["m1", "m2", "m3", "m4", "m5"]),
        );
    }
    cluster.add_deployment(
        SimulatedDeployment::new("processor", labels(&[("app", "processor")]))
            .with_pod_names(["p1", "p2"])
            .with_ready_delay(Duration::from_secs(2)),
    );
    if with_prewarm {
        cluster.add_deployment(
            SimulatedDeployment::new(
                "processor-prewarm",
                labels(&[("app", "processor"), ("mode", "prewarm")]),
            )
            .with_ready_delay(Duration::from_secs(1)),
        );
    }
    cluster
}

fn autoscaler(
    cluster: Arc<SimulatedCluster>,
    bus: Arc<InMemoryBus>,
    telemetry: Arc<TelemetryCollector>,
    dir: &Path,
) -> PredictiveAutoscaler {
    let metrics = SchedulerMetrics::new();
    let logger = StructuredLogger::new("test");
    let log = Arc::new(BenchmarkLog::new(dir.join("benchmark.csv")));

    let assignment = Arc::new(AssignmentEngine::new(
        cluster.clone(),
        bus.clone(),
        AssignmentConfig::default(),
        metrics.clone(),
        logger.clone(),
    ));
    let benchmark = Arc::new(BenchmarkHarness::new(
        cluster.clone(),
        log.clone(),
        BenchmarkConfig::default(),
        metrics.clone(),
        logger.clone(),
    ));
    let prewarm = Arc::new(PrewarmStateMachine::new(
        cluster,
        bus,
        log,
        PrewarmConfig::default(),
        metrics.clone(),
        logger.clone(),
    ));

    PredictiveAutoscaler::new(
        assignment,
        telemetry,
        benchmark,
        prewarm,
        AutoscalerConfig {
            classifier_path: dir.join("classifier.json"),
            ..Default::default()
        },
        metrics,
        logger,
    )
}

fn write_classifier(dir: &Path, bias: f64) {
    let model = serde_json::json!({
        "version": "v-test",
        "weights": vec![0.0_f64; NUM_FEATURES],
        "bias": bias,
    });
    std::fs::write(dir.join("classifier.json"), model.to_string()).unwrap();
}

#[test]
fn test_decision_tiers() {
    assert_eq!(ScaleDecision::from_probability(0.9, 0.5), ScaleDecision::Provision(3));
    assert_eq!(ScaleDecision::from_probability(0.75, 0.5), ScaleDecision::Provision(2));
    assert_eq!(ScaleDecision::from_probability(0.6, 0.5), ScaleDecision::Provision(1));
    assert_eq!(ScaleDecision::from_probability(0.5, 0.5), ScaleDecision::Hold);
    assert_eq!(ScaleDecision::from_probability(0.0, 0.0), ScaleDecision::Hold);
    assert_eq!(ScaleDecision::from_probability(0.01, 0.0), ScaleDecision::Provision(1));
}

#[tokio::test(start_paused = true)]
async fn test_missing_classifier_holds_but_still_benchmarks() {
    let dir = TempDir::new().unwrap();
    let cluster = fleet(true, true);
    let scaler = autoscaler(
        cluster.clone(),
        Arc::new(InMemoryBus::new()),
        Arc::new(TelemetryCollector::new()),
        dir.path(),
    );

    let report = scaler.run_cycle().await;

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.assigned_machines, Some(5));
    assert_eq!(report.score, ScoreOutcome::NoClassifier);
    assert_eq!(report.decision, ScaleDecision::Hold);
    assert!(report.prewarm.is_none());
    assert!(matches!(report.cold_start, Some(ColdStartOutcome::Measured { .. })));

    // Benchmark scaled up and back; nothing touched the prewarm pool
    assert_eq!(cluster.replicas("processor"), Some(2));
    assert_eq!(cluster.replicas("processor-prewarm"), Some(0));
    assert_eq!(cluster.scale_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_high_probability_provisions_prewarm_pool() {
    let dir = TempDir::new().unwrap();
    write_classifier(dir.path(), 5.0);
    let cluster = fleet(true, true);
    let bus = Arc::new(InMemoryBus::new());
    let telemetry = Arc::new(TelemetryCollector::new());
    telemetry.ingest(&Message::new(
        "metrics/p1",
        br#"{"cpu_usage":0.9,"buffer_size":48}"#.to_vec(),
    ));
    let scaler = autoscaler(cluster.clone(), bus.clone(), telemetry, dir.path());

    let report = scaler.run_cycle().await;

    assert!(report.score.probability() > 0.99);
    assert!(matches!(&report.score, ScoreOutcome::Scored { version, .. } if version == "v-test"));
    assert_eq!(report.features.get("buffer_size"), Some(48.0));
    assert_eq!(report.decision, ScaleDecision::Provision(3));

    let prewarm = report.prewarm.unwrap();
    assert_eq!(prewarm.activated(), 3);
    assert!(prewarm.pods.iter().all(|p| p.phase == PrewarmPhase::Active));
    assert_eq!(cluster.replicas("processor-prewarm"), Some(3));
    assert_eq!(bus.published_to("prewarm/+/activate").len(), 3);

    let events: Vec<BenchmarkEvent> = BenchmarkLog::new(dir.path().join("benchmark.csv"))
        .read_all()
        .unwrap()
        .into_iter()
        .map(|r| r.event_type)
        .collect();
    assert_eq!(events.iter().filter(|e| **e == BenchmarkEvent::Cold).count(), 1);
    assert_eq!(events.iter().filter(|e| **e == BenchmarkEvent::Prewarm).count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_hold_releases_existing_pool() {
    let dir = TempDir::new().unwrap();
    write_classifier(dir.path(), 5.0);
    let cluster = fleet(true, true);
    let scaler = autoscaler(
        cluster.clone(),
        Arc::new(InMemoryBus::new()),
        Arc::new(TelemetryCollector::new()),
        dir.path(),
    );

    scaler.run_cycle().await;
    assert_eq!(cluster.replicas("processor-prewarm"), Some(3));

    write_classifier(dir.path(), -5.0);
    let report = scaler.run_cycle().await;

    assert_eq!(report.decision, ScaleDecision::Hold);
    assert_eq!(cluster.replicas("processor-prewarm"), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_classifier_scores_zero() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("classifier.json"), b"not a model").unwrap();
    let scaler = autoscaler(
        fleet(true, true),
        Arc::new(InMemoryBus::new()),
        Arc::new(TelemetryCollector::new()),
        dir.path(),
    );

    let report = scaler.run_cycle().await;

    match &report.score {
        ScoreOutcome::Failed { reason } => assert!(reason.starts_with("classifier error")),
        other => panic!("expected failed score, got {:?}", other),
    }
    assert_eq!(report.score.probability(), 0.0);
    assert_eq!(report.decision, ScaleDecision::Hold);
}

#[tokio::test(start_paused = true)]
async fn test_assignment_timeout_does_not_stop_cycle() {
    let dir = TempDir::new().unwrap();
    write_classifier(dir.path(), 5.0);
    let cluster = fleet(false, true);
    let health = HealthRegistry::new();
    let scaler = autoscaler(
        cluster.clone(),
        Arc::new(InMemoryBus::new()),
        Arc::new(TelemetryCollector::new()),
        dir.path(),
    )
    .with_health(health.clone());

    let report = scaler.run_cycle().await;

    assert_eq!(report.assigned_machines, None);
    assert!(report.errors[0].starts_with("assignment"));
    assert!(report.cold_start.is_some());
    assert_eq!(report.decision, ScaleDecision::Provision(3));
    assert!(report.prewarm.is_some());

    let status = health.health().await;
    assert_eq!(
        status.components[components::ASSIGNMENT].status,
        ComponentStatus::Degraded
    );
    assert_eq!(
        status.components[components::BENCHMARK].status,
        ComponentStatus::Healthy
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_prewarm_template_is_reported() {
    let dir = TempDir::new().unwrap();
    write_classifier(dir.path(), 5.0);
    let scaler = autoscaler(
        fleet(true, false),
        Arc::new(InMemoryBus::new()),
        Arc::new(TelemetryCollector::new()),
        dir.path(),
    );

    let report = scaler.run_cycle().await;

    assert_eq!(report.decision, ScaleDecision::Provision(3));
    assert!(report.prewarm.is_none());
    assert!(report.errors.iter().any(|e| e.contains("processor-prewarm")));
}

#[tokio::test(start_paused = true)]
async fn test_run_stores_last_cycle_until_shutdown() {
    let dir = TempDir::new().unwrap();
    let scaler = Arc::new(autoscaler(
        fleet(true, true),
        Arc::new(InMemoryBus::new()),
        Arc::new(TelemetryCollector::new()),
        dir.path(),
    ));
    assert!(scaler.last_cycle().await.is_none());

    let (tx, rx) = tokio::sync::broadcast::channel(1);
    let handle = tokio::spawn(scaler.clone().run(rx));

    tokio::time::sleep(Duration::from_secs(60)).await;
    let report = scaler.last_cycle().await.unwrap();
    assert_eq!(report.decision, ScaleDecision::Hold);

    tx.send(()).unwrap();
    handle.await.unwrap();
}
