use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::store::LOCK_ACQUIRE_TIMEOUT;

/// Operating mode of the placement engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotPreference {
    /// Enforce the per-job target ratio with counters and capacity-type
    /// node selectors.
    Strict,
    /// Emit no capacity selector and keep no state; the autoscaler places
    /// executors on spot opportunistically with no guarantee.
    BestEffort,
}

impl FromStr for SpotPreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "STRICT" => Ok(SpotPreference::Strict),
            "BEST_EFFORT" => Ok(SpotPreference::BestEffort),
            other => bail!("SPOT_PREFERENCE must be STRICT or BEST_EFFORT, got {other:?}"),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// Read once at startup and frozen; handlers and background tasks only ever
/// see it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Config {
    pub spot_preference: SpotPreference,
    pub default_spot_ratio: f64,
    pub webhook_timeout: Duration,
    pub redis_url: String,
    pub redis_default_ttl: Duration,
    pub capacity_type_label: String,
    pub workload_role_label: String,
    pub driver_role_value: String,
    pub executor_role_value: String,
    pub job_id_label: String,
    pub spot_ratio_annotation: String,
    pub reconcile_enabled: bool,
    pub reconcile_interval: Duration,
    pub log_level: String,
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let spot_preference = match get("SPOT_PREFERENCE") {
            Some(raw) => raw.parse()?,
            None => SpotPreference::Strict,
        };

        let default_spot_ratio: f64 = get("DEFAULT_SPOT_RATIO")
            .unwrap_or_else(|| "0.5".to_string())
            .parse()
            .context("DEFAULT_SPOT_RATIO must be a number")?;
        if !default_spot_ratio.is_finite() {
            bail!("DEFAULT_SPOT_RATIO must be a finite number");
        }
        let default_spot_ratio = if (0.0..=1.0).contains(&default_spot_ratio) {
            default_spot_ratio
        } else {
            let clamped = default_spot_ratio.clamp(0.0, 1.0);
            tracing::warn!(
                requested = default_spot_ratio,
                clamped,
                "DEFAULT_SPOT_RATIO outside [0, 1]; clamping"
            );
            clamped
        };

        let webhook_timeout_seconds: u64 = get("WEBHOOK_TIMEOUT_SECONDS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .context("WEBHOOK_TIMEOUT_SECONDS must be a whole number of seconds")?;
        let webhook_timeout = Duration::from_secs(webhook_timeout_seconds);
        // The lock deadline must fire first so a contended admission can
        // still fail open within its own budget.
        if webhook_timeout <= LOCK_ACQUIRE_TIMEOUT {
            bail!(
                "WEBHOOK_TIMEOUT_SECONDS must be greater than the {}s lock acquisition deadline",
                LOCK_ACQUIRE_TIMEOUT.as_secs()
            );
        }

        let redis_url = get("REDIS_URL").context("REDIS_URL must be set")?;

        let redis_default_ttl_seconds: u64 = get("REDIS_DEFAULT_TTL_SECONDS")
            .unwrap_or_else(|| "86400".to_string())
            .parse()
            .context("REDIS_DEFAULT_TTL_SECONDS must be a whole number of seconds")?;
        if redis_default_ttl_seconds == 0 {
            bail!("REDIS_DEFAULT_TTL_SECONDS must be greater than zero");
        }

        let reconcile_enabled: bool = get("RECONCILE_ENABLED")
            .unwrap_or_else(|| "true".to_string())
            .parse()
            .context("RECONCILE_ENABLED must be true or false")?;

        let reconcile_interval_seconds: u64 = get("RECONCILE_INTERVAL_SECONDS")
            .unwrap_or_else(|| "60".to_string())
            .parse()
            .context("RECONCILE_INTERVAL_SECONDS must be a whole number of seconds")?;
        if reconcile_interval_seconds == 0 {
            bail!("RECONCILE_INTERVAL_SECONDS must be greater than zero");
        }

        let port: u16 = get("PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .context("PORT must be a valid port number")?;

        Ok(Self {
            spot_preference,
            default_spot_ratio,
            webhook_timeout,
            redis_url,
            redis_default_ttl: Duration::from_secs(redis_default_ttl_seconds),
            capacity_type_label: get("CAPACITY_TYPE_LABEL")
                .unwrap_or_else(|| "karpenter.sh/capacity-type".to_string()),
            workload_role_label: get("WORKLOAD_ROLE_LABEL")
                .unwrap_or_else(|| "spark-role".to_string()),
            driver_role_value: get("DRIVER_ROLE_VALUE").unwrap_or_else(|| "driver".to_string()),
            executor_role_value: get("EXECUTOR_ROLE_VALUE")
                .unwrap_or_else(|| "executor".to_string()),
            job_id_label: get("JOB_ID_LABEL").unwrap_or_else(|| "spark-app-selector".to_string()),
            spot_ratio_annotation: get("SPOT_RATIO_ANNOTATION")
                .unwrap_or_else(|| "spot-balancer.io/spot-ratio".to_string()),
            reconcile_enabled,
            reconcile_interval: Duration::from_secs(reconcile_interval_seconds),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            port,
        })
    }
}
