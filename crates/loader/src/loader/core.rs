use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use gantry_core::LoaderConfig;

use crate::job::{JobId, LoadJob};
use crate::metrics::{Gauge, LoaderStats};
use crate::ready_queue::ReadyQueue;

/// Worker pool lifecycle. `Stopping` covers the window where `stop` has
/// signaled workers but not yet joined them all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolState {
    Stopped,
    Running,
    Stopping,
}

/// Scheduler-side record of one pending job.
pub(crate) struct JobInfo {
    pub(crate) job: Arc<LoadJob>,
    /// Dependencies that have not yet succeeded.
    pub(crate) unresolved: usize,
    /// Pending jobs that depend on this one.
    pub(crate) dependents: Vec<Arc<LoadJob>>,
    /// Effective priority: requested, only ever raised by inherited boosts.
    pub(crate) priority: i64,
    /// Position in the ready queue, if queued.
    pub(crate) ready_seq: Option<u64>,
}

impl JobInfo {
    /// Dispatched to a worker: dependencies resolved but no longer queued.
    pub(crate) fn is_executing(&self) -> bool {
        self.unresolved == 0 && self.ready_seq.is_none()
    }
}

/// State behind the scheduler lock.
pub(crate) struct LoaderState {
    pub(crate) scheduled: HashMap<JobId, JobInfo>,
    pub(crate) ready: ReadyQueue,
    pub(crate) pool: PoolState,
    /// Worker threads alive (parked or busy).
    pub(crate) workers: usize,
    /// Worker threads currently executing a job function.
    pub(crate) busy: usize,
    pub(crate) handles: Vec<JoinHandle<()>>,
}

/// Loader internals shared between the public handle, task handles, and
/// worker threads.
pub(crate) struct LoaderShared {
    pub(crate) state: Mutex<LoaderState>,
    /// Wakes parked workers when the ready queue grows or the pool stops.
    pub(crate) job_ready: Condvar,
    /// Wakes `AsyncLoader::wait` when the pending set drains.
    pub(crate) drained: Condvar,
    pub(crate) max_threads: usize,
    pub(crate) threads_total: Gauge,
    pub(crate) threads_active: Gauge,
}

/// Executes a growing DAG of [`LoadJob`]s over a bounded worker pool,
/// honoring dependencies, priorities, and group cancellation.
pub struct AsyncLoader {
    shared: Arc<LoaderShared>,
}

impl AsyncLoader {
    /// Create a stopped loader. `threads_total` and `threads_active` are
    /// host-supplied gauges tracking worker thread counts.
    pub fn new(threads_total: Gauge, threads_active: Gauge, max_threads: usize) -> Self {
        assert!(max_threads >= 1, "loader needs at least one worker thread");
        Self {
            shared: Arc::new(LoaderShared {
                state: Mutex::new(LoaderState {
                    scheduled: HashMap::new(),
                    ready: ReadyQueue::default(),
                    pool: PoolState::Stopped,
                    workers: 0,
                    busy: 0,
                    handles: Vec::new(),
                }),
                job_ready: Condvar::new(),
                drained: Condvar::new(),
                max_threads,
                threads_total,
                threads_active,
            }),
        }
    }

    /// Create a loader from configuration, with fresh gauges.
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(Gauge::new(), Gauge::new(), config.resolved_max_threads())
    }

    /// Upper bound on concurrently executing jobs.
    pub fn max_threads(&self) -> usize {
        self.shared.max_threads
    }

    /// Number of scheduled jobs that are not yet terminal.
    pub fn scheduled_jobs_count(&self) -> usize {
        self.shared.state.lock().unwrap().scheduled.len()
    }

    /// Snapshot of scheduler and pool state.
    pub fn stats(&self) -> LoaderStats {
        let state = self.shared.state.lock().unwrap();
        let executing = state
            .scheduled
            .values()
            .filter(|info| info.is_executing())
            .count();
        LoaderStats {
            scheduled_jobs: state.scheduled.len(),
            ready_jobs: state.ready.len(),
            executing_jobs: executing,
            workers: state.workers,
            max_threads: self.shared.max_threads,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<LoaderShared> {
        &self.shared
    }
}

impl Drop for AsyncLoader {
    fn drop(&mut self) {
        self.stop();
    }
}
