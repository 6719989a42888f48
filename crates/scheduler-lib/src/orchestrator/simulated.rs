//! In-process orchestration platform
//!
//! Models deployments with label sets, replica counts and pods that become
//! Running/Ready after a configurable delay. Used by tests and by the local
//! demo mode of the scheduler binary.

use super::{EnvBinding, LabelSelector, Orchestrator, PodInfo, PodPhase};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Deployment template registered with the simulated cluster
#[derive(Debug, Clone)]
pub struct SimulatedDeployment {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub replicas: u32,
    /// Time from pod creation to Running/Ready; `None` means never ready
    pub ready_delay: Option<Duration>,
    initial_pod_names: Vec<String>,
}

impl SimulatedDeployment {
    pub fn new(name: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            labels,
            replicas: 0,
            ready_delay: Some(Duration::ZERO),
            initial_pod_names: Vec::new(),
        }
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = Some(delay);
        self
    }

    /// Pods created from now on never report Ready
    pub fn never_ready(mut self) -> Self {
        self.ready_delay = None;
        self
    }

    /// Start with already-running pods carrying these names
    pub fn with_pod_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.initial_pod_names = names.into_iter().map(Into::into).collect();
        self.replicas = self.initial_pod_names.len() as u32;
        self
    }
}

#[derive(Debug, Clone)]
struct SimulatedPod {
    name: String,
    ready_at: Option<Instant>,
}

impl SimulatedPod {
    fn info(&self, now: Instant) -> PodInfo {
        let ready = self.ready_at.map(|at| now >= at).unwrap_or(false);
        PodInfo {
            name: self.name.clone(),
            phase: if ready { PodPhase::Running } else { PodPhase::Pending },
            ready,
        }
    }
}

#[derive(Debug)]
struct DeploymentState {
    spec: SimulatedDeployment,
    pods: Vec<SimulatedPod>,
    env: BTreeMap<String, Vec<EnvBinding>>,
}

#[derive(Debug, Default)]
struct ClusterState {
    deployments: BTreeMap<String, DeploymentState>,
    pod_seq: u64,
}

impl ClusterState {
    fn reconcile(&mut self, deployment: &str) {
        let Some(state) = self.deployments.get_mut(deployment) else {
            return;
        };
        let target = state.spec.replicas as usize;

        while state.pods.len() > target {
            if let Some(pod) = state.pods.pop() {
                debug!(pod = %pod.name, "Terminating simulated pod");
            }
        }

        while state.pods.len() < target {
            self.pod_seq += 1;
            let now = Instant::now();
            let pod = SimulatedPod {
                name: format!("{}-{:04}", state.spec.name, self.pod_seq),
                ready_at: state.spec.ready_delay.map(|d| now + d),
            };
            debug!(pod = %pod.name, "Creating simulated pod");
            state.pods.push(pod);
        }
    }
}

/// Simulated orchestration platform with call counters and failure injection
#[derive(Debug, Default)]
pub struct SimulatedCluster {
    state: Mutex<ClusterState>,
    scale_calls: AtomicUsize,
    patch_calls: AtomicUsize,
    fail_scale: AtomicBool,
    unavailable: AtomicBool,
}

impl SimulatedCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deployment and create its initial pods
    pub fn add_deployment(&self, mut spec: SimulatedDeployment) {
        let mut state = self.lock();
        let now = Instant::now();
        let initial: Vec<SimulatedPod> = std::mem::take(&mut spec.initial_pod_names)
            .into_iter()
            .map(|name| SimulatedPod {
                name,
                ready_at: Some(now),
            })
            .collect();

        let name = spec.name.clone();
        state.deployments.insert(
            name.clone(),
            DeploymentState {
                spec,
                pods: initial,
                env: BTreeMap::new(),
            },
        );
        state.reconcile(&name);
    }

    /// Change how long pods created from now on take to become ready
    pub fn set_ready_delay(&self, deployment: &str, delay: Option<Duration>) {
        if let Some(state) = self.lock().deployments.get_mut(deployment) {
            state.spec.ready_delay = delay;
        }
    }

    /// Make `scale_to` calls fail
    pub fn set_fail_scale(&self, fail: bool) {
        self.fail_scale.store(fail, Ordering::SeqCst);
    }

    /// Make every platform call fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn replicas(&self, deployment: &str) -> Option<u32> {
        self.lock()
            .deployments
            .get(deployment)
            .map(|d| d.spec.replicas)
    }

    pub fn pod_names(&self, deployment: &str) -> Vec<String> {
        self.lock()
            .deployments
            .get(deployment)
            .map(|d| d.pods.iter().map(|p| p.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn env_bindings(&self, deployment: &str, container: &str) -> Vec<EnvBinding> {
        self.lock()
            .deployments
            .get(deployment)
            .and_then(|d| d.env.get(container).cloned())
            .unwrap_or_default()
    }

    pub fn scale_calls(&self) -> usize {
        self.scale_calls.load(Ordering::SeqCst)
    }

    pub fn patch_calls(&self) -> usize {
        self.patch_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("orchestration platform unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for SimulatedCluster {
    async fn deployment_exists(&self, deployment: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.lock().deployments.contains_key(deployment))
    }

    async fn read_replica_count(&self, deployment: &str) -> Result<u32> {
        self.check_available()?;
        self.replicas(deployment)
            .ok_or_else(|| anyhow::anyhow!("deployment {} not found", deployment))
    }

    async fn scale_to(&self, deployment: &str, replicas: u32) -> Result<()> {
        self.check_available()?;
        self.scale_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_scale.load(Ordering::SeqCst) {
            anyhow::bail!("scale of {} rejected", deployment);
        }

        let mut state = self.lock();
        let entry = state
            .deployments
            .get_mut(deployment)
            .ok_or_else(|| anyhow::anyhow!("deployment {} not found", deployment))?;
        entry.spec.replicas = replicas;
        state.reconcile(deployment);
        Ok(())
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<PodInfo>> {
        self.check_available()?;
        let selector = LabelSelector::parse(selector);
        let now = Instant::now();

        Ok(self
            .lock()
            .deployments
            .values()
            .filter(|d| selector.matches(&d.spec.labels))
            .flat_map(|d| d.pods.iter().map(move |p| p.info(now)))
            .collect())
    }

    async fn patch_env_bindings(
        &self,
        deployment: &str,
        container: &str,
        bindings: &[EnvBinding],
    ) -> Result<()> {
        self.check_available()?;
        self.patch_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.lock();
        let entry = state
            .deployments
            .get_mut(deployment)
            .ok_or_else(|| anyhow::anyhow!("deployment {} not found", deployment))?;

        let env = entry.env.entry(container.to_string()).or_default();
        for binding in bindings {
            match env.iter_mut().find(|b| b.name == binding.name) {
                Some(existing) => existing.value = binding.value.clone(),
                None => env.push(binding.clone()),
            }
        }
        Ok(())
    }
}
