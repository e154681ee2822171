//! Read-only client for the orchestrator API.
//!
//! The balancer reads two things from Kubernetes: a job's driver pod (to
//! resolve its spot-ratio annotation) and the cluster-wide set of executor
//! pods (reconciliation ground truth). Both go through the
//! [`Orchestrator`] trait so tests can substitute a fixed pod set.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};

use crate::config::Config;

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Find the driver pod carrying the given job id, if any.
    async fn find_driver_pod(&self, namespace: &str, job_id: &str) -> Result<Option<Pod>>;

    /// List all executor pods cluster-wide.
    async fn list_executor_pods(&self) -> Result<Vec<Pod>>;
}

/// Kubernetes-backed implementation.
pub struct KubeOrchestrator {
    client: Client,
    job_id_label: String,
    role_label: String,
    driver_role_value: String,
    executor_role_value: String,
}

impl KubeOrchestrator {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            job_id_label: config.job_id_label.clone(),
            role_label: config.workload_role_label.clone(),
            driver_role_value: config.driver_role_value.clone(),
            executor_role_value: config.executor_role_value.clone(),
        }
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn find_driver_pod(&self, namespace: &str, job_id: &str) -> Result<Option<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!(
            "{}={},{}={}",
            self.job_id_label, job_id, self.role_label, self.driver_role_value
        );
        let list = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .with_context(|| format!("listing driver pods for job {job_id} in {namespace}"))?;
        Ok(list.items.into_iter().next())
    }

    async fn list_executor_pods(&self) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let selector = format!("{}={}", self.role_label, self.executor_role_value);
        let list = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .context("listing executor pods")?;
        Ok(list.items)
    }
}
