//! Prewarm pool provisioning and lifecycle signalling

use super::{PrewarmOutcome, PrewarmPod, PrewarmPodReport};
use crate::benchmark::BenchmarkLog;
use crate::bus::{topics, MessageBus};
use crate::error::{Result, SchedulerError};
use crate::models::{BenchmarkEvent, BenchmarkRecord, PrewarmPhase};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::orchestrator::{Orchestrator, PodInfo};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Configuration for the prewarm state machine
#[derive(Debug, Clone)]
pub struct PrewarmConfig {
    /// Deployment template of the prewarm pool
    pub deployment: String,
    pub pod_selector: String,
    /// Pause after scaling before discovering pods
    pub settle_delay: Duration,
    /// Pause between hydration and activation
    pub activation_delay: Duration,
}

impl Default for PrewarmConfig {
    fn default() -> Self {
        Self {
            deployment: "processor-prewarm".to_string(),
            pod_selector: "app=processor,mode=prewarm".to_string(),
            settle_delay: Duration::from_secs(5),
            activation_delay: Duration::from_secs(3),
        }
    }
}

/// Drives prewarm pods from creation to activation
pub struct PrewarmStateMachine {
    orchestrator: Arc<dyn Orchestrator>,
    bus: Arc<dyn MessageBus>,
    log: Arc<BenchmarkLog>,
    config: PrewarmConfig,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
    /// Pods already taken to Active; they are never signalled again
    activated: Mutex<BTreeSet<String>>,
}

impl PrewarmStateMachine {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        bus: Arc<dyn MessageBus>,
        log: Arc<BenchmarkLog>,
        config: PrewarmConfig,
        metrics: SchedulerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            orchestrator,
            bus,
            log,
            config,
            metrics,
            logger,
            activated: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn config(&self) -> &PrewarmConfig {
        &self.config
    }

    fn activated(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.activated.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pods activated by earlier provisioning runs that are still running
    pub fn active_pods(&self) -> Vec<String> {
        self.activated().iter().cloned().collect()
    }

    /// Provision `replicas` prewarm pods and take each through its lifecycle
    ///
    /// A missing deployment template aborts the attempt. Publish failures
    /// leave the affected pod in its last reached phase. Pods activated by an
    /// earlier run are counted but not signalled or benchmarked again.
    pub async fn provision(&self, replicas: u32) -> Result<PrewarmOutcome> {
        let deployment = &self.config.deployment;

        let exists = self
            .orchestrator
            .deployment_exists(deployment)
            .await
            .map_err(SchedulerError::Orchestrator)?;
        if !exists {
            return Err(SchedulerError::DeploymentNotFound(deployment.clone()));
        }

        self.orchestrator
            .scale_to(deployment, replicas)
            .await
            .map_err(SchedulerError::Orchestrator)?;
        self.metrics.set_prewarm_pods(replicas as usize);
        info!(deployment = %deployment, replicas, "Prewarm pool scaled");

        tokio::time::sleep(self.config.settle_delay).await;

        let discovered = self.discover().await?;
        let already_active = {
            let mut activated = self.activated();
            activated.retain(|name| discovered.contains(name));
            activated.len()
        };
        let mut pods: Vec<PrewarmPod> = {
            let activated = self.activated();
            discovered
                .into_iter()
                .filter(|name| !activated.contains(name))
                .map(PrewarmPod::new)
                .collect()
        };
        let mut outcome = PrewarmOutcome {
            requested_replicas: replicas,
            already_active,
            ..Default::default()
        };
        if already_active > 0 {
            debug!(pods = already_active, "Skipping pods activated by an earlier run");
        }

        for pod in pods.iter_mut() {
            if self.signal(&topics::hydrate(pod.name())).await {
                pod.advance(PrewarmPhase::Hydrating)?;
            } else {
                outcome.publish_failures += 1;
            }
        }

        tokio::time::sleep(self.config.activation_delay).await;

        for pod in pods.iter_mut() {
            if pod.phase() != PrewarmPhase::Hydrating {
                continue;
            }
            pod.advance(PrewarmPhase::Hydrated)?;

            if self.signal(&topics::activate(pod.name())).await {
                pod.advance(PrewarmPhase::Active)?;
            } else {
                outcome.publish_failures += 1;
            }
        }

        outcome.pods = pods
            .iter()
            .map(|pod| {
                let activation_ms = (pod.phase() == PrewarmPhase::Active)
                    .then(|| pod.since_hydration())
                    .flatten()
                    .map(|d| d.as_secs_f64() * 1000.0);
                if let Some(ms) = activation_ms {
                    self.record_activation(pod.name(), ms);
                }
                PrewarmPodReport {
                    name: pod.name().to_string(),
                    phase: pod.phase(),
                    activation_ms,
                }
            })
            .collect();

        self.activated().extend(
            pods.iter()
                .filter(|pod| pod.phase() == PrewarmPhase::Active)
                .map(|pod| pod.name().to_string()),
        );

        Ok(outcome)
    }

    /// Scale the prewarm pool to zero; returns whether anything was running
    pub async fn release(&self) -> Result<bool> {
        let deployment = &self.config.deployment;

        let exists = self
            .orchestrator
            .deployment_exists(deployment)
            .await
            .map_err(SchedulerError::Orchestrator)?;
        if !exists {
            return Ok(false);
        }

        let current = self
            .orchestrator
            .read_replica_count(deployment)
            .await
            .map_err(SchedulerError::Orchestrator)?;
        if current == 0 {
            return Ok(false);
        }

        self.orchestrator
            .scale_to(deployment, 0)
            .await
            .map_err(SchedulerError::Orchestrator)?;
        self.metrics.set_prewarm_pods(0);
        self.activated().clear();
        info!(deployment = %deployment, released = current, "Prewarm pool released");
        Ok(true)
    }

    /// Names of running prewarm pods, sorted
    async fn discover(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .orchestrator
            .list_pods(&self.config.pod_selector)
            .await
            .map_err(SchedulerError::Orchestrator)?
            .into_iter()
            .filter(PodInfo::is_running)
            .map(|p| p.name)
            .collect();
        names.sort();

        if names.is_empty() {
            warn!(selector = %self.config.pod_selector, "No prewarm pods discovered");
        } else {
            debug!(pods = names.len(), "Discovered prewarm pods");
        }
        Ok(names)
    }

    async fn signal(&self, topic: &str) -> bool {
        match self.bus.publish(topic, topics::SENTINEL.to_vec(), false).await {
            Ok(()) => true,
            Err(e) => {
                self.metrics.inc_publish_failures();
                warn!(topic = %topic, error = %e, "Failed to publish prewarm signal");
                false
            }
        }
    }

    fn record_activation(&self, pod: &str, duration_ms: f64) {
        self.metrics.observe_prewarm_activation(duration_ms / 1000.0);
        self.logger.log_prewarm_activated(pod, duration_ms);

        let record = BenchmarkRecord::now(BenchmarkEvent::Prewarm, duration_ms);
        if let Err(e) = self.log.append(&record) {
            error!(error = %e, "Failed to write benchmark log");
        }
    }
}
