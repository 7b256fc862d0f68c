use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Cloneable counter handle supplied by the host for thread-count
/// observability. All clones share one value.
#[derive(Debug, Clone, Default)]
pub struct Gauge {
    value: Arc<AtomicUsize>,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn value(&self) -> usize {
        self.value.load(Ordering::Relaxed)
    }
}

/// Point-in-time snapshot of loader state, for dashboards and tests.
#[derive(Debug, Clone, Serialize)]
pub struct LoaderStats {
    /// Jobs known to the scheduler and not yet terminal.
    pub scheduled_jobs: usize,
    /// Jobs whose dependencies have all succeeded, awaiting dispatch.
    pub ready_jobs: usize,
    /// Jobs currently running a user function.
    pub executing_jobs: usize,
    /// Worker threads alive (parked or busy).
    pub workers: usize,
    /// Upper bound on concurrently executing jobs.
    pub max_threads: usize,
}
