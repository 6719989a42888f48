//! Kubernetes implementation of the orchestration seam

use super::{EnvBinding, Orchestrator, PodInfo, PodPhase};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::{debug, info};

/// Orchestrator backed by the Kubernetes API of one namespace
#[derive(Clone)]
pub struct KubeOrchestrator {
    deployments: Api<Deployment>,
    pods: Api<Pod>,
    namespace: String,
}

impl KubeOrchestrator {
    /// Connect using the in-cluster or kubeconfig environment
    pub async fn connect(namespace: &str) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        info!(namespace = %namespace, "Connected to Kubernetes API");
        Ok(Self::from_client(client, namespace))
    }

    pub fn from_client(client: Client, namespace: &str) -> Self {
        Self {
            deployments: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

fn pod_info(pod: &Pod) -> Option<PodInfo> {
    let name = pod.metadata.name.clone()?;
    let status = pod.status.as_ref();

    let phase = status
        .and_then(|s| s.phase.as_deref())
        .map(PodPhase::from)
        .unwrap_or(PodPhase::Unknown);

    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);

    Some(PodInfo { name, phase, ready })
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn deployment_exists(&self, deployment: &str) -> Result<bool> {
        let found = self
            .deployments
            .get_opt(deployment)
            .await
            .with_context(|| format!("Failed to read deployment {}", deployment))?;
        Ok(found.is_some())
    }

    async fn read_replica_count(&self, deployment: &str) -> Result<u32> {
        let scale = self
            .deployments
            .get_scale(deployment)
            .await
            .with_context(|| format!("Failed to read scale of {}", deployment))?;

        let replicas = scale.spec.and_then(|s| s.replicas).unwrap_or(0);
        Ok(replicas.max(0) as u32)
    }

    async fn scale_to(&self, deployment: &str, replicas: u32) -> Result<()> {
        let patch = json!({ "spec": { "replicas": replicas } });
        self.deployments
            .patch_scale(deployment, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("Failed to scale {} to {}", deployment, replicas))?;

        debug!(deployment = %deployment, replicas, "Scaled deployment");
        Ok(())
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<PodInfo>> {
        let pods = self
            .pods
            .list(&ListParams::default().labels(selector))
            .await
            .with_context(|| format!("Failed to list pods for {}", selector))?;

        Ok(pods.items.iter().filter_map(pod_info).collect())
    }

    async fn patch_env_bindings(
        &self,
        deployment: &str,
        container: &str,
        bindings: &[EnvBinding],
    ) -> Result<()> {
        let env: Vec<_> = bindings
            .iter()
            .map(|b| json!({ "name": b.name, "value": b.value }))
            .collect();

        let patch = json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{ "name": container, "env": env }]
                    }
                }
            }
        });

        self.deployments
            .patch(deployment, &PatchParams::default(), &Patch::Strategic(&patch))
            .await
            .with_context(|| format!("Failed to patch env of {}", deployment))?;

        debug!(
            deployment = %deployment,
            bindings = bindings.len(),
            "Patched deployment environment"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use kube::api::ObjectMeta;

    fn pod(name: &str, phase: &str, ready: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: ready.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_info_ready() {
        let info = pod_info(&pod("processor-1", "Running", "True")).unwrap();
        assert_eq!(info.phase, PodPhase::Running);
        assert!(info.is_ready());
    }

    #[test]
    fn test_pod_info_not_ready() {
        let info = pod_info(&pod("processor-1", "Running", "False")).unwrap();
        assert!(info.is_running());
        assert!(!info.is_ready());
    }

    #[test]
    fn test_pod_without_status() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("processor-2".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let info = pod_info(&pod).unwrap();
        assert_eq!(info.phase, PodPhase::Unknown);
        assert!(!info.ready);
    }
}
