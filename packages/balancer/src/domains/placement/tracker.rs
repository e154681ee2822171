//! Critical-section wrapper around the decision engine.
//!
//! One admission is one read-decide-write cycle under the per-job lock. The
//! tracker owns every counter mutation on the admission path; the
//! reconciler writes through the same lock but rebuilds counts from ground
//! truth instead of merging.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::common::keys;
use crate::config::{Config, SpotPreference};
use crate::kernel::store::{with_lock, StateStore, StoreError, StoreResult};

use super::engine;
use super::models::{CapacityType, Decision, ExecutorCount};

/// Attempts for a single store call inside a held critical section.
const STORE_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

pub struct PlacementTracker {
    store: Arc<dyn StateStore>,
    mode: SpotPreference,
    counter_ttl: Duration,
}

impl PlacementTracker {
    pub fn new(store: Arc<dyn StateStore>, config: &Config) -> Self {
        Self {
            store,
            mode: config.spot_preference,
            counter_ttl: config.redis_default_ttl,
        }
    }

    /// Admit one executor for the job: pick its capacity type and record it.
    pub async fn admit(
        &self,
        namespace: &str,
        job_id: &str,
        target_ratio: f64,
    ) -> StoreResult<Decision> {
        if self.mode == SpotPreference::BestEffort {
            // No selector, no counter: the autoscaler is free to place it.
            return Ok(Decision {
                capacity: None,
                counts: ExecutorCount::default(),
            });
        }

        let key = keys::counter_key(namespace, job_id);
        with_lock(self.store.as_ref(), &key, || async {
            let counts = self.read_counts(&key).await?;
            let Some(capacity) = engine::decide(self.mode, &counts, target_ratio) else {
                return Ok(Decision {
                    capacity: None,
                    counts,
                });
            };
            let mut updated = counts;
            updated.increment(capacity);
            self.write_counts(&key, updated).await?;
            debug!(
                namespace = %namespace,
                job_id = %job_id,
                capacity = %capacity,
                counts = %updated,
                "recorded placement"
            );
            Ok(Decision {
                capacity: Some(capacity),
                counts: updated,
            })
        })
        .await
    }

    /// Record the deletion of an executor that was placed on `capacity`.
    /// The counter clamps at zero; deletes are never blocked, so the caller
    /// only logs errors.
    pub async fn release(
        &self,
        namespace: &str,
        job_id: &str,
        capacity: CapacityType,
    ) -> StoreResult<ExecutorCount> {
        let key = keys::counter_key(namespace, job_id);
        with_lock(self.store.as_ref(), &key, || async {
            let mut counts = self.read_counts(&key).await?;
            if !counts.decrement_clamped(capacity) {
                warn!(
                    namespace = %namespace,
                    job_id = %job_id,
                    capacity = %capacity,
                    "delete for an already-zero counter; leaving it at zero"
                );
            }
            self.write_counts(&key, counts).await?;
            Ok(counts)
        })
        .await
    }

    /// Overwrite a job's counter with ground-truth counts (reconciliation).
    pub async fn overwrite(
        &self,
        namespace: &str,
        job_id: &str,
        counts: ExecutorCount,
    ) -> StoreResult<()> {
        let key = keys::counter_key(namespace, job_id);
        with_lock(self.store.as_ref(), &key, || async {
            self.write_counts(&key, counts).await
        })
        .await
    }

    async fn read_counts(&self, key: &str) -> StoreResult<ExecutorCount> {
        let raw = self.get_with_retry(key).await?;
        Ok(match raw {
            None => ExecutorCount::default(),
            Some(raw) => match ExecutorCount::decode(&raw) {
                Ok(counts) => counts,
                Err(e) => {
                    warn!(key = %key, error = %e, "malformed counter record; resetting to zero");
                    ExecutorCount::default()
                }
            },
        })
    }

    async fn write_counts(&self, key: &str, counts: ExecutorCount) -> StoreResult<()> {
        let encoded = counts.encode();
        let mut attempt = 0;
        loop {
            match self.store.set(key, &encoded, self.counter_ttl).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    attempt += 1;
                    if !matches!(err, StoreError::Transport(_)) || attempt >= STORE_ATTEMPTS {
                        return Err(err);
                    }
                    warn!(key = %key, error = %err, attempt, "counter write failed; retrying");
                    tokio::time::sleep(RETRY_BASE_DELAY * (1u32 << (attempt - 1))).await;
                }
            }
        }
    }

    async fn get_with_retry(&self, key: &str) -> StoreResult<Option<String>> {
        let mut attempt = 0;
        loop {
            match self.store.get(key).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if !matches!(err, StoreError::Transport(_)) || attempt >= STORE_ATTEMPTS {
                        return Err(err);
                    }
                    warn!(key = %key, error = %err, attempt, "counter read failed; retrying");
                    tokio::time::sleep(RETRY_BASE_DELAY * (1u32 << (attempt - 1))).await;
                }
            }
        }
    }
}
