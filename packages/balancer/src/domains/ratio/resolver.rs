//! Resolves a job's target spot ratio.
//!
//! Cache-aside over the state store: the `job-ratio` key is consulted
//! first, and on a miss the driver pod's annotation is read through the
//! orchestrator. A job's ratio is immutable while its cache entry lives;
//! annotation edits mid-job only take effect once the entry's TTL expires.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, warn};

use crate::common::keys;
use crate::config::Config;
use crate::kernel::orchestrator::Orchestrator;
use crate::kernel::store::StateStore;

pub struct RatioResolver {
    store: Arc<dyn StateStore>,
    orchestrator: Arc<dyn Orchestrator>,
    annotation: String,
    default_ratio: f64,
    cache_ttl: Duration,
}

impl RatioResolver {
    pub fn new(
        store: Arc<dyn StateStore>,
        orchestrator: Arc<dyn Orchestrator>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            orchestrator,
            annotation: config.spot_ratio_annotation.clone(),
            default_ratio: config.default_spot_ratio,
            cache_ttl: config.redis_default_ttl,
        }
    }

    /// Target spot ratio for the job, in [0, 1].
    ///
    /// Never fails: any lookup problem falls back to the configured
    /// default. Only a *successful* driver lookup is cached, so a transient
    /// orchestrator error does not pin the default for the cache TTL.
    pub async fn resolve(&self, namespace: &str, job_id: &str) -> f64 {
        let key = keys::ratio_key(namespace, job_id);
        match self.store.get(&key).await {
            Ok(Some(raw)) => {
                if let Some(ratio) = parse_ratio(&raw) {
                    return ratio;
                }
                warn!(key = %key, raw = %raw, "malformed cached ratio; re-resolving");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "ratio cache read failed; falling back to driver lookup");
            }
        }

        match self.orchestrator.find_driver_pod(namespace, job_id).await {
            Ok(driver) => {
                let ratio = match driver.as_ref().and_then(|pod| self.annotation_ratio(pod)) {
                    Some(ratio) => ratio,
                    None => {
                        debug!(
                            namespace = %namespace,
                            job_id = %job_id,
                            default = self.default_ratio,
                            "no usable spot-ratio annotation; using default"
                        );
                        self.default_ratio
                    }
                };
                if let Err(e) = self
                    .store
                    .set(&key, &encode_ratio(ratio), self.cache_ttl)
                    .await
                {
                    warn!(key = %key, error = %e, "failed to cache resolved ratio");
                }
                ratio
            }
            Err(e) => {
                warn!(
                    namespace = %namespace,
                    job_id = %job_id,
                    error = %e,
                    "driver lookup failed; using default ratio without caching"
                );
                self.default_ratio
            }
        }
    }

    fn annotation_ratio(&self, pod: &Pod) -> Option<f64> {
        let raw = pod.metadata.annotations.as_ref()?.get(&self.annotation)?;
        let parsed = parse_ratio(raw);
        if parsed.is_none() {
            warn!(
                annotation = %self.annotation,
                raw = %raw,
                "unparseable spot-ratio annotation"
            );
        }
        parsed
    }
}

/// Parse a ratio string, rejecting NaN and ±∞ and clamping into [0, 1].
pub fn parse_ratio(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 1.0))
}

/// Decimal-string form with the system's three-decimal precision; round
/// trips every ratio in [0.000, 1.000].
pub fn encode_ratio(ratio: f64) -> String {
    format!("{:.3}", ratio.clamp(0.0, 1.0))
}
