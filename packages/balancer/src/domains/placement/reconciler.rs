//! Ground-truth reconciliation of executor counters.
//!
//! The reconciler is a background service that:
//! - Lists live executor pods cluster-wide
//! - Recomputes per-job counts from their capacity-type selectors
//! - Overwrites the stored counters under the same per-key lock the
//!   admission path uses
//! - Reaps counter and ratio records of jobs whose executors and driver
//!   are gone
//!
//! Reconciliation overwrites without merging: it is the tiebreaker against
//! drift from missed admission/delete events, webhook downtime, or manual
//! pod manipulation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, error, info, warn};

use crate::common::counters::RuntimeCounters;
use crate::common::keys;
use crate::config::Config;
use crate::kernel::orchestrator::Orchestrator;
use crate::kernel::store::{with_lock, StateStore, StoreError};

use super::models::{CapacityType, ExecutorCount};
use super::tracker::PlacementTracker;

/// Per-job ground-truth counts, keyed by `(namespace, job_id)`.
type GroundTruth = BTreeMap<(String, String), ExecutorCount>;

pub struct Reconciler {
    orchestrator: Arc<dyn Orchestrator>,
    store: Arc<dyn StateStore>,
    tracker: Arc<PlacementTracker>,
    counters: Arc<RuntimeCounters>,
    job_id_label: String,
    capacity_type_label: String,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        store: Arc<dyn StateStore>,
        tracker: Arc<PlacementTracker>,
        counters: Arc<RuntimeCounters>,
        config: &Config,
    ) -> Self {
        Self {
            orchestrator,
            store,
            tracker,
            counters,
            job_id_label: config.job_id_label.clone(),
            capacity_type_label: config.capacity_type_label.clone(),
            interval: config.reconcile_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a shutdown handle for graceful shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run the reconcile loop until shutdown is requested.
    pub async fn run(self) -> Result<()> {
        info!(
            interval_s = self.interval.as_secs(),
            "reconciler starting"
        );
        loop {
            if self.is_shutdown_requested() {
                break;
            }
            if let Err(e) = self.run_once().await {
                error!(error = %e, "reconcile pass failed");
                self.counters.record_reconcile_error();
            }
            tokio::time::sleep(self.interval).await;
        }
        info!("reconciler stopped");
        Ok(())
    }

    /// Run until a shutdown signal is received.
    ///
    /// Convenience method that listens for Ctrl+C.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = self.shutdown_handle();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            shutdown.store(true, Ordering::SeqCst);
        });
        self.run().await
    }

    /// One reconcile pass: rebuild every observed job's counter, then reap
    /// records of jobs that are gone.
    pub async fn run_once(&self) -> Result<()> {
        let pods = self
            .orchestrator
            .list_executor_pods()
            .await
            .context("listing executor pods for reconciliation")?;
        let observed = group_counts(&pods, &self.job_id_label, &self.capacity_type_label);
        debug!(
            pods = pods.len(),
            jobs = observed.len(),
            "reconciling executor counters"
        );

        for ((namespace, job_id), counts) in &observed {
            if self.is_shutdown_requested() {
                // Finish cleanly between groups; the rest waits for the
                // next pass.
                return Ok(());
            }
            match self.tracker.overwrite(namespace, job_id, *counts).await {
                Ok(()) => {
                    debug!(
                        namespace = %namespace,
                        job_id = %job_id,
                        counts = %counts,
                        "counter reconciled"
                    );
                }
                Err(StoreError::LockTimeout { .. }) => {
                    warn!(
                        namespace = %namespace,
                        job_id = %job_id,
                        "counter locked; deferring job to the next pass"
                    );
                }
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        job_id = %job_id,
                        error = %e,
                        "failed to overwrite counter; skipping job"
                    );
                    self.counters.record_reconcile_error();
                }
            }
        }

        self.reap_dead_jobs(&observed).await;
        Ok(())
    }

    /// Delete counter and ratio records of jobs with no executors left and
    /// no driver pod. Anything uncertain is left for the next pass (or TTL
    /// expiry).
    async fn reap_dead_jobs(&self, observed: &GroundTruth) {
        let counter_keys = match self.store.scan_prefix(keys::COUNTER_KEY_PREFIX).await {
            Ok(counter_keys) => counter_keys,
            Err(e) => {
                warn!(error = %e, "counter key scan failed; skipping reap pass");
                return;
            }
        };

        for counter_key in counter_keys {
            if self.is_shutdown_requested() {
                return;
            }
            let Some((namespace, job_id)) = keys::parse_counter_key(&counter_key) else {
                continue;
            };
            if observed.contains_key(&(namespace.to_string(), job_id.to_string())) {
                continue;
            }
            match self.orchestrator.find_driver_pod(namespace, job_id).await {
                Ok(Some(_)) => continue, // driver still alive; keep the record
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        job_id = %job_id,
                        error = %e,
                        "driver lookup failed; keeping record"
                    );
                    continue;
                }
            }

            // Zero live executors and no driver: the job is gone.
            let ratio_key = keys::ratio_key(namespace, job_id);
            let reaped = with_lock(self.store.as_ref(), &counter_key, || async {
                self.store.delete(&counter_key).await?;
                self.store.delete(&ratio_key).await?;
                Ok(())
            })
            .await;
            match reaped {
                Ok(()) => {
                    info!(
                        namespace = %namespace,
                        job_id = %job_id,
                        "reaped records for completed job"
                    );
                }
                Err(e) => {
                    warn!(
                        namespace = %namespace,
                        job_id = %job_id,
                        error = %e,
                        "failed to reap records; leaving them for TTL expiry"
                    );
                    self.counters.record_reconcile_error();
                }
            }
        }
    }
}

/// Group live executor pods into per-job counts.
///
/// Pods in a terminal phase, without a job-id label, or without a
/// recognizable capacity-type selector do not count. A job whose pods all
/// lack the selector (best-effort placements) produces no group at all, so
/// its absent record stays absent.
fn group_counts(pods: &[Pod], job_id_label: &str, capacity_type_label: &str) -> GroundTruth {
    let mut groups = GroundTruth::new();
    for pod in pods {
        if is_terminal(pod) {
            continue;
        }
        let Some(job_id) = pod
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(job_id_label))
        else {
            continue;
        };
        let Some(capacity) = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.node_selector.as_ref())
            .and_then(|selector| selector.get(capacity_type_label))
            .and_then(|value| CapacityType::from_label_value(value))
        else {
            continue;
        };
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        groups
            .entry((namespace, job_id.clone()))
            .or_default()
            .increment(capacity);
    }
    groups
}

fn is_terminal(pod: &Pod) -> bool {
    matches!(
        pod.status
            .as_ref()
            .and_then(|status| status.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}
