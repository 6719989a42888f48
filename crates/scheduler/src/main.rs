//! Fleet Scheduler - processor placement and predictive autoscaling
//!
//! This binary runs the control plane: baseline assignment, reactive
//! overflow routing, predictive prewarm provisioning and the cold-start
//! benchmark, plus the health/metrics/state API.

use anyhow::Result;
use fleet_scheduler::{
    api,
    config::{BusKind, OrchestratorKind, SchedulerConfig},
};
use scheduler_lib::{
    assignment::AssignmentEngine,
    benchmark::{BenchmarkHarness, BenchmarkLog},
    bus::{InMemoryBus, MessageBus, MqttBus},
    health::{components, HealthRegistry},
    monitor::ReactiveMonitor,
    observability::{SchedulerMetrics, StructuredLogger},
    orchestrator::{KubeOrchestrator, Orchestrator, SimulatedCluster, SimulatedDeployment},
    predictor::PredictiveAutoscaler,
    prewarm::PrewarmStateMachine,
    telemetry::{FeatureExporter, TelemetryCollector},
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SCHEDULER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long loops get to finish their current cycle after Ctrl-C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Missed intervals after which a loop is reported stale
const STALE_INTERVALS: u32 = 3;

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Local demo cluster: machines, the processor pool and the prewarm template
fn simulated_cluster(config: &SchedulerConfig) -> SimulatedCluster {
    let cluster = SimulatedCluster::new();
    cluster.add_deployment(
        SimulatedDeployment::new("machine", labels(&[("app", "machine")]))
            .with_replicas(config.min_machines as u32),
    );
    cluster.add_deployment(
        SimulatedDeployment::new(
            config.processor_deployment.clone(),
            labels(&[("app", "processor")]),
        )
        .with_replicas(config.min_processors as u32)
        .with_ready_delay(Duration::from_secs(8)),
    );
    cluster.add_deployment(
        SimulatedDeployment::new(
            config.prewarm_deployment.clone(),
            labels(&[("app", "processor"), ("mode", "prewarm")]),
        )
        .with_ready_delay(Duration::from_secs(2)),
    );
    cluster
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting fleet-scheduler");

    // Load configuration
    let config = SchedulerConfig::load()?;
    info!(
        instance = %config.instance_name,
        bus = ?config.bus,
        orchestrator = ?config.orchestrator,
        "Scheduler configured"
    );

    let metrics = SchedulerMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);

    let mut health_registry = HealthRegistry::new();
    let bus: Arc<dyn MessageBus> = match config.bus {
        BusKind::Mqtt => {
            let mqtt = Arc::new(MqttBus::connect(config.mqtt()));
            let connection = mqtt.clone();
            health_registry =
                health_registry.with_bus_check(Arc::new(move || connection.is_connected()));
            mqtt
        }
        BusKind::Memory => Arc::new(InMemoryBus::new()),
    };

    // Each loop must report within a few of its own intervals
    let monitor_config = config.monitor();
    let telemetry_config = config.telemetry();
    let autoscaler_config = config.autoscaler();
    health_registry
        .watch(components::MONITOR, monitor_config.check_interval * STALE_INTERVALS, true)
        .await;
    health_registry
        .watch(
            components::TELEMETRY,
            telemetry_config.export_interval * STALE_INTERVALS,
            false,
        )
        .await;
    health_registry
        .watch(
            components::AUTOSCALER,
            autoscaler_config.cycle_interval * STALE_INTERVALS,
            false,
        )
        .await;

    let orchestrator: Arc<dyn Orchestrator> = match config.orchestrator {
        OrchestratorKind::Kube => Arc::new(KubeOrchestrator::connect(&config.namespace).await?),
        OrchestratorKind::Simulated => Arc::new(simulated_cluster(&config)),
    };

    logger.log_startup(
        SCHEDULER_VERSION,
        &format!("{:?}", config.bus).to_lowercase(),
        &format!("{:?}", config.orchestrator).to_lowercase(),
    );

    // Telemetry
    let telemetry = Arc::new(TelemetryCollector::new());
    telemetry.attach(bus.as_ref()).await?;
    let exporter = Arc::new(
        FeatureExporter::new(telemetry.clone(), telemetry_config)
            .with_health(health_registry.clone()),
    );

    // Reactive monitor
    let monitor = Arc::new(
        ReactiveMonitor::new(bus.clone(), monitor_config, metrics.clone(), logger.clone())
            .with_health(health_registry.clone()),
    );
    monitor.attach().await?;

    // Assignment, benchmark and prewarm, driven by the autoscaler cycle
    let assignment = Arc::new(AssignmentEngine::new(
        orchestrator.clone(),
        bus.clone(),
        config.assignment(),
        metrics.clone(),
        logger.clone(),
    ));
    let benchmark_log = Arc::new(BenchmarkLog::new(config.benchmark_log_path.clone()));
    let benchmark = Arc::new(BenchmarkHarness::new(
        orchestrator.clone(),
        benchmark_log.clone(),
        config.benchmark(),
        metrics.clone(),
        logger.clone(),
    ));
    let prewarm = Arc::new(PrewarmStateMachine::new(
        orchestrator.clone(),
        bus.clone(),
        benchmark_log,
        config.prewarm(),
        metrics.clone(),
        logger.clone(),
    ));
    let autoscaler = Arc::new(
        PredictiveAutoscaler::new(
            assignment.clone(),
            telemetry,
            benchmark,
            prewarm,
            autoscaler_config,
            metrics.clone(),
            logger.clone(),
        )
        .with_health(health_registry.clone()),
    );

    // Create shared application state
    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        metrics: metrics.clone(),
        assignment,
        load: monitor.registry(),
        overflow_processor: config.overflow_processor.clone(),
        autoscaler: autoscaler.clone(),
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let loops = vec![
        tokio::spawn(monitor.run(shutdown_tx.subscribe())),
        tokio::spawn(exporter.run(shutdown_tx.subscribe())),
        tokio::spawn(autoscaler.run(shutdown_tx.subscribe())),
    ];

    // Start health and metrics server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.begin_shutdown();
    let _ = shutdown_tx.send(());

    for handle in loops {
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            warn!("Control loop did not stop within the shutdown grace period");
        }
    }
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
