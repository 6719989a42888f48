//! Reactive load monitor
//!
//! This module provides:
//! - `RateWindow`, the per-machine arrival window
//! - `LoadRegistry`, the shared, lock-guarded monitor state
//! - `ReactiveMonitor`, which routes machines above the rate threshold to
//!   the overflow processor
//!
//! Escalation is one-directional: a machine routed to overflow stays there.

mod rate_window;
mod registry;

pub use rate_window::{RateWindow, DEFAULT_WINDOW};
pub use registry::LoadRegistry;

use crate::bus::{publish_json, topics, Message, MessageBus};
use crate::error::SchedulerError;
use crate::health::{components, HealthRegistry};
use crate::models::ControlCommand;
use crate::observability::{SchedulerMetrics, StructuredLogger};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the reactive monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between evaluations
    pub check_interval: Duration,
    pub window: Duration,
    /// Messages per window above which a machine is overloaded
    pub rate_threshold: usize,
    pub overflow_processor: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            window: DEFAULT_WINDOW,
            rate_threshold: 15,
            overflow_processor: "processor-overflow".to_string(),
        }
    }
}

/// Watches per-machine message rates and escalates overloaded machines
pub struct ReactiveMonitor {
    bus: Arc<dyn MessageBus>,
    registry: Arc<LoadRegistry>,
    config: MonitorConfig,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl ReactiveMonitor {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        config: MonitorConfig,
        metrics: SchedulerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            bus,
            registry: Arc::new(LoadRegistry::new(config.window)),
            config,
            metrics,
            logger,
            health: None,
        }
    }

    /// Report each evaluation to `health`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn registry(&self) -> Arc<LoadRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Subscribe to every machine's data topic
    pub async fn attach(&self) -> Result<()> {
        let registry = self.registry.clone();
        self.bus
            .subscribe(
                topics::ALL_DATA,
                Arc::new(move |message: &Message| {
                    registry.record_arrival(message.last_segment(), Instant::now());
                }),
            )
            .await?;

        info!(pattern = topics::ALL_DATA, "Reactive monitor attached");
        Ok(())
    }

    /// Route every machine above the threshold to the overflow processor
    ///
    /// Returns the machines newly routed in this evaluation. A failed publish
    /// leaves the machine unrecorded so the next evaluation retries it.
    pub async fn evaluate(&self, now: Instant) -> Vec<String> {
        let rates = self.registry.rates(now);
        self.metrics.set_tracked_machines(rates.len());

        let mut routed = Vec::new();
        let mut failures = 0;
        for (machine_id, rate) in rates {
            if rate <= self.config.rate_threshold {
                continue;
            }
            if self.registry.is_overflow_assigned(&machine_id) {
                debug!(machine_id = %machine_id, rate, "Already on overflow processor");
                continue;
            }

            match self.route_to_overflow(&machine_id).await {
                Ok(()) => {
                    self.registry.mark_overflow_assigned(&machine_id);
                    self.metrics.inc_overflow_reassignments();
                    self.logger.log_overflow_reassigned(
                        &machine_id,
                        &self.config.overflow_processor,
                        rate,
                    );
                    routed.push(machine_id);
                }
                Err(e) => {
                    failures += 1;
                    self.metrics.inc_publish_failures();
                    warn!(
                        machine_id = %machine_id,
                        error = %e,
                        "Failed to route machine to overflow processor"
                    );
                }
            }
        }

        if let Some(health) = &self.health {
            if failures == 0 {
                health.report_healthy(components::MONITOR).await;
            } else {
                health
                    .report_degraded(
                        components::MONITOR,
                        format!("{} overflow routes not published", failures),
                    )
                    .await;
            }
        }

        routed
    }

    /// Publish the retained overflow assignment with `machine_id` added
    ///
    /// The payload carries every machine routed so far, so a restarted
    /// overflow processor recovers the whole set from the retained message.
    async fn route_to_overflow(&self, machine_id: &str) -> Result<(), SchedulerError> {
        let mut machines = self.registry.overflow_assigned();
        machines.push(machine_id.to_string());
        machines.sort();
        machines.dedup();

        let topic = topics::control(&self.config.overflow_processor);
        publish_json(self.bus.as_ref(), &topic, &ControlCommand::assign(machines), true)
            .await
            .map_err(SchedulerError::Bus)
    }

    /// Run the monitor loop
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.check_interval.as_secs(),
            window_secs = self.config.window.as_secs(),
            threshold = self.config.rate_threshold,
            "Starting reactive monitor"
        );

        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate(Instant::now()).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reactive monitor");
                    break;
                }
            }
        }
    }
}
