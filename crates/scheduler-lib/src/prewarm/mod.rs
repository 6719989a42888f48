//! Prewarm provisioning
//!
//! This module provides:
//! - `PrewarmPod`, enforcing the linear Created → Hydrating → Hydrated → Active order
//! - `PrewarmStateMachine`, which provisions the prewarm pool and drives each
//!   pod through hydration and activation over the bus
//!
//! The scheduler only signals intent. Processors hydrate themselves from the
//! retained state snapshots already on the bus.

mod state_machine;

pub use state_machine::{PrewarmConfig, PrewarmStateMachine};

use crate::error::SchedulerError;
use crate::models::PrewarmPhase;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A processor instance provisioned ahead of demand
#[derive(Debug, Clone)]
pub struct PrewarmPod {
    name: String,
    phase: PrewarmPhase,
    hydration_requested: Option<Instant>,
}

impl PrewarmPod {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: PrewarmPhase::Created,
            hydration_requested: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> PrewarmPhase {
        self.phase
    }

    /// Move to `to`, which must be the phase directly after the current one
    pub fn advance(&mut self, to: PrewarmPhase) -> Result<(), SchedulerError> {
        if self.phase.next() != Some(to) {
            return Err(SchedulerError::InvalidTransition {
                pod: self.name.clone(),
                from: self.phase,
                to,
            });
        }
        if to == PrewarmPhase::Hydrating {
            self.hydration_requested = Some(Instant::now());
        }
        self.phase = to;
        Ok(())
    }

    /// Time since hydration was requested
    pub fn since_hydration(&self) -> Option<std::time::Duration> {
        self.hydration_requested.map(|at| at.elapsed())
    }
}

/// Final state of one pod after a provisioning run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrewarmPodReport {
    pub name: String,
    pub phase: PrewarmPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_ms: Option<f64>,
}

/// Result of one provisioning run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrewarmOutcome {
    pub requested_replicas: u32,
    /// Pods signalled in this run
    pub pods: Vec<PrewarmPodReport>,
    /// Running pods activated by an earlier run
    #[serde(default)]
    pub already_active: usize,
    /// Lifecycle signals that could not be published
    pub publish_failures: usize,
}

impl PrewarmOutcome {
    pub fn activated(&self) -> usize {
        self.pods
            .iter()
            .filter(|p| p.phase == PrewarmPhase::Active)
            .count()
    }
}
