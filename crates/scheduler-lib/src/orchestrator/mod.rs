//! Orchestration platform seam
//!
//! The control plane never talks to the platform directly; it goes through
//! the `Orchestrator` trait so that the Kubernetes implementation and the
//! in-process simulation are interchangeable.

mod kubernetes;
mod simulated;

pub use kubernetes::KubeOrchestrator;
pub use simulated::{SimulatedCluster, SimulatedDeployment};

use crate::error::SchedulerError;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Pod lifecycle phase as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Observed pod state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub phase: PodPhase,
    /// Platform-reported `Ready` condition
    pub ready: bool,
}

impl PodInfo {
    pub fn is_running(&self) -> bool {
        self.phase == PodPhase::Running
    }

    pub fn is_ready(&self) -> bool {
        self.is_running() && self.ready
    }
}

/// One environment binding written into a deployment's pod template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvBinding {
    pub name: String,
    pub value: String,
}

/// Trait for orchestration platform implementations
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Whether the deployment template exists
    async fn deployment_exists(&self, deployment: &str) -> Result<bool>;

    /// Desired replica count of a deployment
    async fn read_replica_count(&self, deployment: &str) -> Result<u32>;

    /// Set the desired replica count of a deployment
    async fn scale_to(&self, deployment: &str, replicas: u32) -> Result<()>;

    /// Pods matching a label selector (`k=v` / `k!=v` terms, comma-joined)
    async fn list_pods(&self, selector: &str) -> Result<Vec<PodInfo>>;

    /// Rewrite environment bindings on a container of the deployment template
    async fn patch_env_bindings(
        &self,
        deployment: &str,
        container: &str,
        bindings: &[EnvBinding],
    ) -> Result<()>;
}

/// Parsed label selector supporting equality and inequality terms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    terms: Vec<(String, String, bool)>,
}

impl LabelSelector {
    pub fn parse(selector: &str) -> Self {
        let terms = selector
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .filter_map(|term| {
                if let Some((key, value)) = term.split_once("!=") {
                    Some((key.trim().to_string(), value.trim().to_string(), false))
                } else {
                    term.split_once('=')
                        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string(), true))
                }
            })
            .collect();
        Self { terms }
    }

    /// A missing label never equals a value, and always differs from one
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms.iter().all(|(key, value, equal)| {
            let actual = labels.get(key);
            if *equal {
                actual == Some(value)
            } else {
                actual != Some(value)
            }
        })
    }
}

/// Poll until at least `expected` pods matching `selector` are running
///
/// Returns the sorted names of the running pods, or `ProvisioningTimeout`
/// once `timeout` has elapsed.
pub async fn wait_for_running_pods(
    orchestrator: &dyn Orchestrator,
    selector: &str,
    expected: usize,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Vec<String>, SchedulerError> {
    let start = Instant::now();

    loop {
        let pods = orchestrator
            .list_pods(selector)
            .await
            .map_err(SchedulerError::Orchestrator)?;

        let mut running: Vec<String> = pods
            .into_iter()
            .filter(PodInfo::is_running)
            .map(|p| p.name)
            .collect();
        running.sort();

        if running.len() >= expected {
            info!(
                selector = %selector,
                running = running.len(),
                "Found enough running pods"
            );
            return Ok(running);
        }

        let waited = start.elapsed();
        if waited >= timeout {
            return Err(SchedulerError::ProvisioningTimeout {
                selector: selector.to_string(),
                expected,
                found: running.len(),
                waited,
            });
        }

        debug!(
            selector = %selector,
            running = running.len(),
            expected,
            "Waiting for pods"
        );
        tokio::time::sleep(poll_interval).await;
    }
}
