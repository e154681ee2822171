//! Process-wide counters surfaced by the health endpoint.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Error and fail-open counters, shared between the admission handlers and
/// the reconciler. Cheap to bump from any task; read only by `/healthz`.
#[derive(Debug, Default)]
pub struct RuntimeCounters {
    admission_errors: AtomicU64,
    fail_open_allows: AtomicU64,
    reconcile_errors: AtomicU64,
}

/// Point-in-time view of the counters for the health response body.
#[derive(Debug, Serialize)]
pub struct CounterSnapshot {
    pub admission_errors: u64,
    pub fail_open_allows: u64,
    pub reconcile_errors: u64,
}

impl RuntimeCounters {
    pub fn record_admission_error(&self) {
        self.admission_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fail_open(&self) {
        self.fail_open_allows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconcile_error(&self) {
        self.reconcile_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            admission_errors: self.admission_errors.load(Ordering::Relaxed),
            fail_open_allows: self.fail_open_allows.load(Ordering::Relaxed),
            reconcile_errors: self.reconcile_errors.load(Ordering::Relaxed),
        }
    }
}
