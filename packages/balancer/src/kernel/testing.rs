//! Test doubles for the kernel seams.
//!
//! Hand-rolled fakes in the style of the rest of the codebase: an in-memory
//! [`StateStore`] with real TTL and lock semantics, a store that always
//! fails (for fail-open paths), and an [`Orchestrator`] serving a fixed pod
//! set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use uuid::Uuid;

use super::orchestrator::Orchestrator;
use super::store::{StateStore, StoreError, StoreResult};
use crate::config::{Config, SpotPreference};

/// Baseline configuration for tests: default labels, short timeouts.
pub fn test_config(mode: SpotPreference, default_ratio: f64) -> Config {
    Config {
        spot_preference: mode,
        default_spot_ratio: default_ratio,
        webhook_timeout: Duration::from_secs(5),
        redis_url: "redis://localhost:6379".to_string(),
        redis_default_ttl: Duration::from_secs(3600),
        capacity_type_label: "karpenter.sh/capacity-type".to_string(),
        workload_role_label: "spark-role".to_string(),
        driver_role_value: "driver".to_string(),
        executor_role_value: "executor".to_string(),
        job_id_label: "spark-app-selector".to_string(),
        spot_ratio_annotation: "spot-balancer.io/spot-ratio".to_string(),
        reconcile_enabled: true,
        reconcile_interval: Duration::from_secs(60),
        log_level: "info".to_string(),
        port: 0,
    }
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory [`StateStore`] sharing one key space for records and locks,
/// like the Redis instance it stands in for.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStore {
    /// Current live keys, sorted. Convenience for assertions.
    pub fn keys(&self) -> Vec<String> {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| !entry.is_expired());
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> StoreResult<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired() {
                return Ok(None);
            }
        }
        let token = Uuid::new_v4().to_string();
        entries.insert(
            key.to_string(),
            Entry {
                value: token.clone(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(Some(token))
    }

    async fn release_lock(&self, key: &str, token: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).is_some_and(|entry| entry.value == token) {
            entries.remove(key);
        }
        Ok(())
    }
}

/// [`StateStore`] where every call fails with a transport error. Exercises
/// the fail-open admission paths.
#[derive(Default)]
pub struct FailingStore;

impl FailingStore {
    fn outage<T>(&self) -> StoreResult<T> {
        Err(StoreError::Transport(anyhow!("injected store outage")))
    }
}

#[async_trait]
impl StateStore for FailingStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        self.outage()
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> StoreResult<()> {
        self.outage()
    }

    async fn delete(&self, _key: &str) -> StoreResult<()> {
        self.outage()
    }

    async fn scan_prefix(&self, _prefix: &str) -> StoreResult<Vec<String>> {
        self.outage()
    }

    async fn ping(&self) -> StoreResult<()> {
        self.outage()
    }

    async fn acquire_lock(&self, _key: &str, _ttl: Duration) -> StoreResult<Option<String>> {
        self.outage()
    }

    async fn release_lock(&self, _key: &str, _token: &str) -> StoreResult<()> {
        self.outage()
    }
}

/// [`Orchestrator`] serving a fixed, mutable pod set.
pub struct FakeOrchestrator {
    pods: Mutex<Vec<Pod>>,
    failing: AtomicBool,
    job_id_label: String,
    role_label: String,
    driver_role_value: String,
    executor_role_value: String,
}

impl FakeOrchestrator {
    pub fn new(config: &Config) -> Self {
        Self {
            pods: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            job_id_label: config.job_id_label.clone(),
            role_label: config.workload_role_label.clone(),
            driver_role_value: config.driver_role_value.clone(),
            executor_role_value: config.executor_role_value.clone(),
        }
    }

    pub fn push_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    pub fn set_pods(&self, pods: Vec<Pod>) {
        *self.pods.lock().unwrap() = pods;
    }

    /// Make every lookup fail with a transport-style error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn pod_label<'a>(&self, pod: &'a Pod, key: &str) -> Option<&'a str> {
        pod.metadata.labels.as_ref()?.get(key).map(String::as_str)
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn find_driver_pod(&self, namespace: &str, job_id: &str) -> Result<Option<Pod>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("injected orchestrator outage"));
        }
        let pods = self.pods.lock().unwrap();
        Ok(pods
            .iter()
            .find(|pod| {
                pod.metadata.namespace.as_deref() == Some(namespace)
                    && self.pod_label(pod, &self.job_id_label) == Some(job_id)
                    && self.pod_label(pod, &self.role_label) == Some(self.driver_role_value.as_str())
            })
            .cloned())
    }

    async fn list_executor_pods(&self) -> Result<Vec<Pod>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("injected orchestrator outage"));
        }
        let pods = self.pods.lock().unwrap();
        Ok(pods
            .iter()
            .filter(|pod| {
                self.pod_label(pod, &self.role_label) == Some(self.executor_role_value.as_str())
            })
            .cloned()
            .collect())
    }
}
