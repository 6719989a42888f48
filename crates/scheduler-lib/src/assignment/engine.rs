//! Assignment engine: size the processor pool and distribute machines

use super::{partition, required_processors, Assignment};
use crate::bus::{publish_json, topics, MessageBus};
use crate::error::{Result, SchedulerError};
use crate::models::ControlCommand;
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::orchestrator::{wait_for_running_pods, Orchestrator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for the assignment engine
#[derive(Debug, Clone)]
pub struct AssignmentConfig {
    /// Deployment running the baseline processors
    pub processor_deployment: String,
    /// Container whose environment carries the assignment
    pub processor_container: String,
    pub machine_selector: String,
    pub processor_selector: String,
    pub max_machines_per_processor: usize,
    /// Running machines required before scheduling starts
    pub min_machines: usize,
    /// Running processors awaited after rescaling (capped at the required count)
    pub min_processors: usize,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    /// Pause after rescaling before looking for processors
    pub grace_period: Duration,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            processor_deployment: "processor".to_string(),
            processor_container: "processor".to_string(),
            machine_selector: "app=machine".to_string(),
            processor_selector: "app=processor,mode!=prewarm".to_string(),
            max_machines_per_processor: 2,
            min_machines: 5,
            min_processors: 2,
            wait_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(3),
            grace_period: Duration::from_secs(10),
        }
    }
}

/// Computes and applies machine assignments
pub struct AssignmentEngine {
    orchestrator: Arc<dyn Orchestrator>,
    bus: Arc<dyn MessageBus>,
    config: AssignmentConfig,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
    latest: RwLock<Option<Assignment>>,
}

impl AssignmentEngine {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        bus: Arc<dyn MessageBus>,
        config: AssignmentConfig,
        metrics: SchedulerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            orchestrator,
            bus,
            config,
            metrics,
            logger,
            latest: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &AssignmentConfig {
        &self.config
    }

    /// Most recently applied assignment
    pub async fn latest(&self) -> Option<Assignment> {
        self.latest.read().await.clone()
    }

    /// Run one full scheduling pass
    ///
    /// Platform failures and bounded-wait timeouts abort the pass; control
    /// command publish failures are logged and counted only.
    pub async fn schedule(&self) -> Result<Assignment> {
        let start = Instant::now();

        let machines = wait_for_running_pods(
            self.orchestrator.as_ref(),
            &self.config.machine_selector,
            self.config.min_machines,
            self.config.wait_timeout,
            self.config.poll_interval,
        )
        .await?;
        info!(machines = machines.len(), "Scheduling started");

        let required = required_processors(machines.len(), self.config.max_machines_per_processor);
        let rescaled = self.ensure_processor_count(required as u32).await?;

        debug!(
            grace_secs = self.config.grace_period.as_secs(),
            "Waiting for processors to settle"
        );
        tokio::time::sleep(self.config.grace_period).await;

        let processors = wait_for_running_pods(
            self.orchestrator.as_ref(),
            &self.config.processor_selector,
            self.config.min_processors.min(required),
            self.config.wait_timeout,
            self.config.poll_interval,
        )
        .await?;

        let assignment = partition(
            &machines,
            &processors,
            self.config.max_machines_per_processor,
        )?;

        self.orchestrator
            .patch_env_bindings(
                &self.config.processor_deployment,
                &self.config.processor_container,
                &assignment.env_bindings(),
            )
            .await
            .map_err(SchedulerError::Orchestrator)?;

        self.publish_commands(&assignment).await;

        self.metrics
            .observe_schedule_latency(start.elapsed().as_secs_f64());
        self.metrics
            .set_assignment(assignment.machine_count(), assignment.processor_count());
        self.logger.log_assignment_applied(
            assignment.machine_count(),
            assignment.processor_count(),
            rescaled,
        );

        *self.latest.write().await = Some(assignment.clone());
        Ok(assignment)
    }

    /// Scale the processor deployment only when its replica count differs
    async fn ensure_processor_count(&self, required: u32) -> Result<bool> {
        let deployment = &self.config.processor_deployment;
        let current = self
            .orchestrator
            .read_replica_count(deployment)
            .await
            .map_err(SchedulerError::Orchestrator)?;

        if current == required {
            info!(replicas = current, "Processor count OK");
            return Ok(false);
        }

        info!(from = current, to = required, "Scaling processors");
        self.orchestrator
            .scale_to(deployment, required)
            .await
            .map_err(SchedulerError::Orchestrator)?;
        Ok(true)
    }

    async fn publish_commands(&self, assignment: &Assignment) {
        for entry in assignment.entries() {
            let command = ControlCommand::assign(entry.machines.iter().cloned());
            let topic = topics::control(&entry.processor_id);

            if let Err(e) = publish_json(self.bus.as_ref(), &topic, &command, true).await {
                self.metrics.inc_publish_failures();
                warn!(
                    processor_id = %entry.processor_id,
                    error = %e,
                    "Failed to publish assignment command"
                );
            }
        }
    }
}
