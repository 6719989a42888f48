//! Cold-start latency measurement

use super::BenchmarkLog;
use crate::error::{Result, SchedulerError};
use crate::models::{BenchmarkEvent, BenchmarkRecord};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::orchestrator::Orchestrator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Configuration for the benchmark harness
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Deployment scaled up by one for the measurement
    pub deployment: String,
    /// Selector used to spot the newly created pod
    pub pod_selector: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            deployment: "processor".to_string(),
            pod_selector: "app=processor".to_string(),
            timeout: Duration::from_secs(180),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Result of one cold-start measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ColdStartOutcome {
    Measured { pod: String, duration_ms: f64 },
    TimedOut { waited_ms: f64 },
}

impl ColdStartOutcome {
    pub fn duration_ms(&self) -> Option<f64> {
        match self {
            ColdStartOutcome::Measured { duration_ms, .. } => Some(*duration_ms),
            ColdStartOutcome::TimedOut { .. } => None,
        }
    }
}

/// Measures scale-and-wait latency and records it to the benchmark log
pub struct BenchmarkHarness {
    orchestrator: Arc<dyn Orchestrator>,
    log: Arc<BenchmarkLog>,
    config: BenchmarkConfig,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
}

impl BenchmarkHarness {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        log: Arc<BenchmarkLog>,
        config: BenchmarkConfig,
        metrics: SchedulerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            orchestrator,
            log,
            config,
            metrics,
            logger,
        }
    }

    pub fn log(&self) -> Arc<BenchmarkLog> {
        self.log.clone()
    }

    /// Scale the deployment up by one and time the new pod to Ready
    ///
    /// The replica count is restored afterwards whatever the outcome. A pod
    /// that never becomes ready is reported as `TimedOut`, not as an error.
    pub async fn measure_cold_start(&self) -> Result<ColdStartOutcome> {
        let deployment = &self.config.deployment;
        info!(deployment = %deployment, "Cold-start benchmark started");

        let original = self
            .orchestrator
            .read_replica_count(deployment)
            .await
            .map_err(SchedulerError::Orchestrator)?;

        let before: BTreeSet<String> = self
            .orchestrator
            .list_pods(&self.config.pod_selector)
            .await
            .map_err(SchedulerError::Orchestrator)?
            .into_iter()
            .map(|p| p.name)
            .collect();

        let start = Instant::now();
        self.orchestrator
            .scale_to(deployment, original + 1)
            .await
            .map_err(SchedulerError::Orchestrator)?;

        let ready_pod = self.wait_for_new_ready_pod(&before).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        if let Err(e) = self.orchestrator.scale_to(deployment, original).await {
            error!(
                deployment = %deployment,
                replicas = original,
                error = %e,
                "Failed to scale back after cold-start benchmark"
            );
        }

        let outcome = match ready_pod {
            Some(pod) => {
                self.record(elapsed_ms);
                self.metrics.observe_cold_start(elapsed_ms / 1000.0);
                self.logger.log_cold_start_measured(Some(&pod), Some(elapsed_ms));
                ColdStartOutcome::Measured {
                    pod,
                    duration_ms: elapsed_ms,
                }
            }
            None => {
                self.logger.log_cold_start_measured(None, None);
                ColdStartOutcome::TimedOut {
                    waited_ms: elapsed_ms,
                }
            }
        };

        Ok(outcome)
    }

    async fn wait_for_new_ready_pod(&self, before: &BTreeSet<String>) -> Option<String> {
        let start = Instant::now();

        while start.elapsed() < self.config.timeout {
            match self.orchestrator.list_pods(&self.config.pod_selector).await {
                Ok(pods) => {
                    let mut added: Vec<_> = pods
                        .into_iter()
                        .filter(|p| !before.contains(&p.name))
                        .collect();
                    added.sort_by(|a, b| a.name.cmp(&b.name));

                    if let Some(pod) = added.into_iter().find(|p| p.is_ready()) {
                        return Some(pod.name);
                    }
                    debug!("No new ready pod yet");
                }
                Err(e) => warn!(error = %e, "Failed to list pods during cold start"),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        None
    }

    fn record(&self, duration_ms: f64) {
        let record = BenchmarkRecord::now(BenchmarkEvent::Cold, duration_ms);
        if let Err(e) = self.log.append(&record) {
            error!(error = %e, "Failed to write benchmark log");
        }
    }
}
