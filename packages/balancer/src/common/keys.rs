//! Key schema for records in the shared state store.
//!
//! Two key families hold persistent state: `exec-count:<ns>:<job>` for the
//! per-job executor counters and `job-ratio:<ns>:<job>` for cached target
//! ratios. Locks live beside the record they guard under a `lock:` prefix,
//! never on the record key itself.

/// Prefix of all executor counter keys; the reconciler scans it.
pub const COUNTER_KEY_PREFIX: &str = "exec-count:";

/// Key of the executor counter record for a job.
pub fn counter_key(namespace: &str, job_id: &str) -> String {
    format!("{COUNTER_KEY_PREFIX}{namespace}:{job_id}")
}

/// Key of the cached target ratio for a job.
pub fn ratio_key(namespace: &str, job_id: &str) -> String {
    format!("job-ratio:{namespace}:{job_id}")
}

/// Key of the lock guarding `data_key`.
pub fn lock_key(data_key: &str) -> String {
    format!("lock:{data_key}")
}

/// Split a counter key back into `(namespace, job_id)`.
///
/// Returns `None` for keys outside the counter family. Namespaces and label
/// values cannot contain `:`, so a single split is unambiguous.
pub fn parse_counter_key(key: &str) -> Option<(&str, &str)> {
    key.strip_prefix(COUNTER_KEY_PREFIX)?.split_once(':')
}
