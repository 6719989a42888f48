//! Predictive autoscaling cycle
//!
//! Each cycle keeps the baseline assignment current, scores the latest
//! aggregate telemetry, refreshes the cold-start benchmark and, when an
//! overload is predicted, provisions prewarm capacity ahead of demand.

use super::{load_classifier, FeatureSnapshot};
use crate::assignment::AssignmentEngine;
use crate::benchmark::{BenchmarkHarness, ColdStartOutcome};
use crate::error::SchedulerError;
use crate::health::{components, HealthRegistry};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::prewarm::{PrewarmOutcome, PrewarmStateMachine};
use crate::telemetry::TelemetryCollector;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Default cycle interval (5 minutes)
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Configuration for the predictive autoscaler
#[derive(Debug, Clone)]
pub struct AutoscalerConfig {
    pub cycle_interval: Duration,
    /// Classifier artifact (`.onnx` or `.json`), re-read every cycle
    pub classifier_path: PathBuf,
    /// Probability above which prewarm capacity is provisioned
    pub decision_threshold: f64,
    /// Run the cold-start benchmark every cycle
    pub benchmark_each_cycle: bool,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            classifier_path: PathBuf::from("/data/classifier.onnx"),
            decision_threshold: 0.5,
            benchmark_each_cycle: true,
        }
    }
}

/// Capacity decision derived from the overload probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "replicas", rename_all = "snake_case")]
pub enum ScaleDecision {
    Hold,
    Provision(u32),
}

impl ScaleDecision {
    /// Tiers: above 0.8 → 3 pods, above 0.7 → 2, otherwise 1
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        if probability <= threshold {
            return ScaleDecision::Hold;
        }
        let replicas = if probability > 0.8 {
            3
        } else if probability > 0.7 {
            2
        } else {
            1
        };
        ScaleDecision::Provision(replicas)
    }

    pub fn replicas(&self) -> u32 {
        match self {
            ScaleDecision::Hold => 0,
            ScaleDecision::Provision(n) => *n,
        }
    }
}

/// How the feature snapshot was scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScoreOutcome {
    Scored { probability: f64, version: String },
    NoClassifier,
    Failed { reason: String },
}

impl ScoreOutcome {
    /// Probability used for the decision; degraded outcomes count as zero
    pub fn probability(&self) -> f64 {
        match self {
            ScoreOutcome::Scored { probability, .. } => *probability,
            _ => 0.0,
        }
    }
}

/// Everything one cycle did, including its degraded steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: i64,
    pub assigned_machines: Option<usize>,
    pub assigned_processors: Option<usize>,
    pub features: FeatureSnapshot,
    pub score: ScoreOutcome,
    pub cold_start: Option<ColdStartOutcome>,
    pub decision: ScaleDecision,
    pub prewarm: Option<PrewarmOutcome>,
    pub errors: Vec<String>,
}

/// Periodic predictive scaling loop
pub struct PredictiveAutoscaler {
    assignment: Arc<AssignmentEngine>,
    telemetry: Arc<TelemetryCollector>,
    benchmark: Arc<BenchmarkHarness>,
    prewarm: Arc<PrewarmStateMachine>,
    config: AutoscalerConfig,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
    last_cycle: RwLock<Option<CycleReport>>,
}

impl PredictiveAutoscaler {
    pub fn new(
        assignment: Arc<AssignmentEngine>,
        telemetry: Arc<TelemetryCollector>,
        benchmark: Arc<BenchmarkHarness>,
        prewarm: Arc<PrewarmStateMachine>,
        config: AutoscalerConfig,
        metrics: SchedulerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            assignment,
            telemetry,
            benchmark,
            prewarm,
            config,
            metrics,
            logger,
            health: None,
            last_cycle: RwLock::new(None),
        }
    }

    /// Report per-cycle component health to `health`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub async fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.read().await.clone()
    }

    /// Run one full cycle; failures are recorded in the report, never raised
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport {
            started_at: chrono::Utc::now().timestamp(),
            assigned_machines: None,
            assigned_processors: None,
            features: FeatureSnapshot::zeros(),
            score: ScoreOutcome::NoClassifier,
            cold_start: None,
            decision: ScaleDecision::Hold,
            prewarm: None,
            errors: Vec::new(),
        };

        // 1. Baseline placement
        match self.assignment.schedule().await {
            Ok(assignment) => {
                report.assigned_machines = Some(assignment.machine_count());
                report.assigned_processors = Some(assignment.processor_count());
                self.set_healthy(components::ASSIGNMENT).await;
            }
            Err(e) => {
                error!(error = %e, "Assignment failed this cycle");
                self.metrics.inc_cycle_errors("assignment");
                self.set_degraded(components::ASSIGNMENT, e.to_string()).await;
                report.errors.push(format!("assignment: {}", e));
            }
        }

        // 2-4. Classifier, features, score
        report.features = self
            .telemetry
            .aggregate_record()
            .map(|record| FeatureSnapshot::from_record(&record))
            .unwrap_or_default();
        report.score = self.score(&report.features).await;
        let probability = report.score.probability();
        self.metrics.set_predicted_probability(probability);

        // 5. Benchmark
        if self.config.benchmark_each_cycle {
            match self.benchmark.measure_cold_start().await {
                Ok(outcome) => {
                    if matches!(outcome, ColdStartOutcome::TimedOut { .. }) {
                        self.set_degraded(components::BENCHMARK, "cold start timed out")
                            .await;
                    } else {
                        self.set_healthy(components::BENCHMARK).await;
                    }
                    report.cold_start = Some(outcome);
                }
                Err(e) => {
                    warn!(error = %e, "Cold-start benchmark failed");
                    self.metrics.inc_cycle_errors("benchmark");
                    self.set_degraded(components::BENCHMARK, e.to_string()).await;
                    report.errors.push(format!("benchmark: {}", e));
                }
            }
        }

        // 6. Decision
        report.decision =
            ScaleDecision::from_probability(probability, self.config.decision_threshold);
        let version = match &report.score {
            ScoreOutcome::Scored { version, .. } => version.as_str(),
            _ => "none",
        };
        self.logger
            .log_overload_predicted(probability, report.decision.replicas(), version);

        match report.decision {
            ScaleDecision::Provision(replicas) => match self.prewarm.provision(replicas).await {
                Ok(outcome) => report.prewarm = Some(outcome),
                Err(e) => {
                    error!(error = %e, replicas, "Prewarm provisioning failed");
                    self.metrics.inc_cycle_errors("prewarm");
                    report.errors.push(format!("prewarm: {}", e));
                }
            },
            ScaleDecision::Hold => {
                if let Err(e) = self.prewarm.release().await {
                    warn!(error = %e, "Failed to release prewarm pool");
                    report.errors.push(format!("prewarm release: {}", e));
                }
            }
        }

        if report.errors.is_empty() {
            self.set_healthy(components::AUTOSCALER).await;
        } else {
            self.set_degraded(components::AUTOSCALER, report.errors.join("; "))
                .await;
        }

        *self.last_cycle.write().await = Some(report.clone());
        report
    }

    async fn score(&self, features: &FeatureSnapshot) -> ScoreOutcome {
        let classifier = match load_classifier(&self.config.classifier_path).await {
            Ok(Some(classifier)) => classifier,
            Ok(None) => {
                info!(
                    path = %self.config.classifier_path.display(),
                    "Classifier artifact absent, skipping scale-up"
                );
                return ScoreOutcome::NoClassifier;
            }
            Err(e) => {
                let err = SchedulerError::Classifier(e);
                warn!(error = %err, "Failed to load classifier");
                self.metrics.inc_cycle_errors("classifier");
                return ScoreOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        self.metrics
            .set_classifier_version(classifier.version(), classifier.format());

        match classifier.predict_proba(features) {
            Ok(probability) => ScoreOutcome::Scored {
                probability,
                version: classifier.version().to_string(),
            },
            Err(e) => {
                let err = SchedulerError::Classifier(e);
                warn!(error = %err, "Classifier scoring failed");
                self.metrics.inc_cycle_errors("classifier");
                ScoreOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn set_healthy(&self, component: &str) {
        if let Some(health) = &self.health {
            health.report_healthy(component).await;
        }
    }

    async fn set_degraded(&self, component: &str, message: impl Into<String>) {
        if let Some(health) = &self.health {
            health.report_degraded(component, message).await;
        }
    }

    /// Run the autoscaling loop
    ///
    /// Shutdown is only observed between cycles.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.cycle_interval.as_secs(),
            threshold = self.config.decision_threshold,
            "Starting predictive autoscaler"
        );

        let mut ticker = interval(self.config.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    info!(
                        probability = report.score.probability(),
                        decision = ?report.decision,
                        errors = report.errors.len(),
                        "Autoscaler cycle complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down predictive autoscaler");
                    break;
                }
            }
        }
    }
}
