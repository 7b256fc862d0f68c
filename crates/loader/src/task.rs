use std::mem;
use std::sync::Arc;

use tracing::debug;

use crate::job::LoadJob;
use crate::loader::LoaderShared;

/// Owning handle for the batch of jobs admitted by one `schedule` call.
///
/// Dropping a non-empty handle cancels its still-pending jobs exactly as
/// [`remove`](Self::remove) would; call [`detach`](Self::detach) to leave
/// the jobs running unowned.
pub struct Task {
    shared: Arc<LoaderShared>,
    jobs: Vec<Arc<LoadJob>>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("jobs", &self.jobs.len()).finish()
    }
}

impl Task {
    pub(crate) fn new(shared: Arc<LoaderShared>, jobs: Vec<Arc<LoadJob>>) -> Self {
        Self { shared, jobs }
    }

    /// Number of jobs owned by this handle.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Absorb another handle's jobs. Both handles must come from the same
    /// loader; `other` is left empty and will not cancel anything on drop.
    pub fn merge(&mut self, mut other: Task) {
        assert!(
            Arc::ptr_eq(&self.shared, &other.shared),
            "cannot merge tasks from different loaders"
        );
        self.jobs.append(&mut other.jobs);
    }

    /// Cancel every owned job that is still pending, then wait out owned
    /// jobs that are already executing (they keep whatever status their
    /// function produces). All owned jobs are terminal once this returns;
    /// the handle is left empty.
    pub fn remove(&mut self) {
        if self.jobs.is_empty() {
            return;
        }
        let jobs = mem::take(&mut self.jobs);
        LoaderShared::remove(&self.shared, &jobs);
    }

    /// Give up ownership without canceling. The jobs keep running and the
    /// handle becomes empty.
    pub fn detach(&mut self) {
        let detached = mem::take(&mut self.jobs);
        if !detached.is_empty() {
            debug!("detached {} jobs from task handle", detached.len());
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.remove();
    }
}
