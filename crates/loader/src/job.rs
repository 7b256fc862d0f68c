use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, RwLock, Weak};

use tracing::debug;

use gantry_core::LoadError;

use crate::loader::LoaderShared;

/// Observable state of a load job. Terminal states are never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadStatus {
    /// Not yet terminal; may be waiting on dependencies, queued, or executing.
    Pending = 0,
    /// The job function returned successfully.
    Success = 1,
    /// Canceled, failed, or poisoned by a dependency; see the stored error.
    Failed = 2,
}

impl LoadStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LoadStatus::Pending,
            1 => LoadStatus::Success,
            _ => LoadStatus::Failed,
        }
    }
}

/// User-supplied work, consumed the first time the job is dispatched.
pub type JobFn = Box<dyn FnOnce(&LoadJob) -> Result<(), LoadError> + Send>;

/// Wait-side state guarded by the job mutex, paired with the `finished`
/// condvar.
#[derive(Default)]
struct WaitState {
    error: Option<LoadError>,
    waiters: usize,
}

/// Identity key of a job: its allocation address. Stable for as long as any
/// `Arc` to the job is alive, which the scheduler guarantees for every
/// pending job.
pub(crate) type JobId = usize;

pub(crate) fn job_id(job: &LoadJob) -> JobId {
    job as *const LoadJob as usize
}

/// A single unit of deferred work with dependencies, priority, and status.
///
/// Jobs are shared through `Arc` and identified by address; a given job
/// value is scheduled at most once. The dependency set is fixed at
/// construction and never mutated by the loader.
pub struct LoadJob {
    name: String,
    dependencies: RwLock<Vec<Arc<LoadJob>>>,
    func: Mutex<Option<JobFn>>,
    /// Requested priority, set when the job is scheduled.
    priority: AtomicI64,
    status: AtomicU8,
    wait_state: Mutex<WaitState>,
    finished: Condvar,
    /// Back-reference to the loader this job was scheduled on, for
    /// priority inheritance from waiters.
    loader: OnceLock<Weak<LoaderShared>>,
}

/// Construct a pending job over the given dependency set. Duplicate
/// dependencies are collapsed; the dependencies themselves are untouched
/// (reverse edges are installed at schedule time).
pub fn make_load_job<F>(
    dependencies: Vec<Arc<LoadJob>>,
    name: impl Into<String>,
    func: F,
) -> Arc<LoadJob>
where
    F: FnOnce(&LoadJob) -> Result<(), LoadError> + Send + 'static,
{
    let mut deps: Vec<Arc<LoadJob>> = Vec::with_capacity(dependencies.len());
    for dep in dependencies {
        if !deps.iter().any(|d| Arc::ptr_eq(d, &dep)) {
            deps.push(dep);
        }
    }
    Arc::new(LoadJob {
        name: name.into(),
        dependencies: RwLock::new(deps),
        func: Mutex::new(Some(Box::new(func))),
        priority: AtomicI64::new(0),
        status: AtomicU8::new(LoadStatus::Pending as u8),
        wait_state: Mutex::new(WaitState::default()),
        finished: Condvar::new(),
        loader: OnceLock::new(),
    })
}

impl LoadJob {
    /// Job name, used in diagnostics and error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct dependencies of this job.
    pub fn dependencies(&self) -> Vec<Arc<LoadJob>> {
        self.dependencies.read().unwrap().clone()
    }

    pub fn status(&self) -> LoadStatus {
        LoadStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Requested priority (larger is higher). 0 until scheduled.
    pub fn priority(&self) -> i64 {
        self.priority.load(Ordering::Relaxed)
    }

    /// Number of threads currently blocked in [`wait`](Self::wait) on this
    /// job.
    pub fn waiters_count(&self) -> usize {
        self.wait_state.lock().unwrap().waiters
    }

    /// Block until the job is terminal. Returns the stored error if the job
    /// failed; idempotent once terminal.
    ///
    /// When called from a worker thread mid-execution, the waited job (and
    /// its pending transitive dependencies) inherit the executing job's
    /// effective priority before this thread parks.
    pub fn wait(&self) -> Result<(), LoadError> {
        if self.status() == LoadStatus::Pending {
            if let Some(ambient) = crate::loader::current_worker_priority() {
                if let Some(loader) = self.loader.get().and_then(Weak::upgrade) {
                    loader.boost(self, ambient);
                }
            }
            self.block_until_finished();
        }
        if self.status() == LoadStatus::Failed {
            let state = self.wait_state.lock().unwrap();
            return Err(state.error.clone().unwrap_or_else(|| {
                LoadError::Failed(format!("job '{}' failed with no recorded error", self.name))
            }));
        }
        Ok(())
    }

    /// Block until terminal, ignoring the outcome. Used by `Task::remove`
    /// to wait out owned jobs that are already executing.
    pub(crate) fn wait_no_throw(&self) {
        if self.status() == LoadStatus::Pending {
            self.block_until_finished();
        }
    }

    fn block_until_finished(&self) {
        let mut state = self.wait_state.lock().unwrap();
        if self.status() != LoadStatus::Pending {
            return;
        }
        state.waiters += 1;
        while self.status() == LoadStatus::Pending {
            state = self.finished.wait(state).unwrap();
        }
        state.waiters -= 1;
    }

    /// Terminal transition. Called by the scheduler exactly once per job;
    /// releases every waiter.
    pub(crate) fn finish(&self, status: LoadStatus, error: Option<LoadError>) {
        let mut state = self.wait_state.lock().unwrap();
        debug_assert_eq!(self.status(), LoadStatus::Pending);
        state.error = error;
        self.status.store(status as u8, Ordering::Release);
        drop(state);
        debug!("job '{}' finished: {:?}", self.name, status);
        self.finished.notify_all();
    }

    /// Run the user function, converting panics into job failures. The
    /// caller must not hold any loader lock.
    pub(crate) fn execute(&self) -> Result<(), LoadError> {
        let func = self.func.lock().unwrap().take();
        let Some(func) = func else {
            return Err(LoadError::Failed(format!(
                "job '{}' was dispatched twice",
                self.name
            )));
        };
        match panic::catch_unwind(AssertUnwindSafe(|| func(self))) {
            Ok(result) => result,
            Err(payload) => Err(LoadError::Failed(format!(
                "job '{}' panicked: {}",
                self.name,
                panic_message(payload.as_ref())
            ))),
        }
    }

    pub(crate) fn attach(&self, loader: &Arc<LoaderShared>) {
        let _ = self.loader.set(Arc::downgrade(loader));
    }

    pub(crate) fn set_priority(&self, priority: i64) {
        self.priority.store(priority, Ordering::Relaxed);
    }
}

impl fmt::Debug for LoadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadJob")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("priority", &self.priority())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
impl LoadJob {
    /// Force a dependency edge after construction, bypassing the frozen
    /// set. Only cycle-detection tests need this; a cycle cannot be built
    /// through the public constructor.
    pub(crate) fn inject_dependency(&self, dep: Arc<LoadJob>) {
        self.dependencies.write().unwrap().push(dep);
    }

    /// Drop all dependency edges, breaking `Arc` cycles a test injected.
    pub(crate) fn clear_dependencies(&self) {
        self.dependencies.write().unwrap().clear();
    }
}
