use std::cell::Cell;
use std::mem;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use gantry_core::LoadError;

use crate::job::{job_id, JobId, LoadJob, LoadStatus};

use super::core::{AsyncLoader, LoaderShared, LoaderState, PoolState};

thread_local! {
    /// Effective priority of the job this worker thread is currently
    /// executing; `None` on non-worker threads.
    static AMBIENT_PRIORITY: Cell<Option<i64>> = Cell::new(None);
}

/// Priority the current thread lends to jobs it waits on, if it is a
/// worker mid-execution.
pub(crate) fn current_worker_priority() -> Option<i64> {
    AMBIENT_PRIORITY.with(|cell| cell.get())
}

impl AsyncLoader {
    /// Begin executing ready jobs. Idempotent while running. Workers are
    /// spawned lazily as ready jobs appear, up to `max_threads`.
    pub fn start(&self) {
        let shared = self.shared();
        let mut state = shared.state.lock().unwrap();
        match state.pool {
            PoolState::Running => return,
            PoolState::Stopping => {
                warn!("start() ignored while stop() is still joining workers");
                return;
            }
            PoolState::Stopped => {}
        }
        state.pool = PoolState::Running;
        info!(
            "loader started ({} max threads, {} jobs ready)",
            shared.max_threads,
            state.ready.len()
        );
        LoaderShared::ensure_capacity(shared, &mut state);
    }

    /// Signal workers to exit after their current job and join them. Ready
    /// and blocked jobs stay queued for a later `start`.
    pub fn stop(&self) {
        let shared = self.shared();
        let handles = {
            let mut state = shared.state.lock().unwrap();
            if state.pool != PoolState::Running {
                return;
            }
            state.pool = PoolState::Stopping;
            mem::take(&mut state.handles)
        };
        shared.job_ready.notify_all();
        for handle in handles {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
        let mut state = shared.state.lock().unwrap();
        state.pool = PoolState::Stopped;
        info!("loader stopped ({} jobs still pending)", state.scheduled.len());
    }

    /// Block until every scheduled job is terminal. Does not stop the pool.
    pub fn wait(&self) {
        let shared = self.shared();
        let mut state = shared.state.lock().unwrap();
        while !state.scheduled.is_empty() {
            state = shared.drained.wait(state).unwrap();
        }
    }
}

impl LoaderShared {
    /// Queue a job whose dependencies have all succeeded, then make sure a
    /// worker can pick it up.
    pub(crate) fn enqueue(this: &Arc<Self>, state: &mut LoaderState, id: JobId) {
        let LoaderState {
            scheduled, ready, ..
        } = &mut *state;
        let Some(info) = scheduled.get_mut(&id) else {
            return;
        };
        let seq = ready.push(Arc::clone(&info.job), info.priority);
        info.ready_seq = Some(seq);
        Self::ensure_capacity(this, state);
    }

    /// Spawn workers until every ready job has a thread able to pick it up,
    /// bounded by `max_threads`, and wake the parked ones.
    pub(crate) fn ensure_capacity(this: &Arc<Self>, state: &mut LoaderState) {
        if state.pool != PoolState::Running {
            return;
        }
        while state.workers < this.max_threads && state.workers - state.busy < state.ready.len()
        {
            Self::spawn_worker(this, state);
        }
        this.job_ready.notify_all();
    }

    fn spawn_worker(this: &Arc<Self>, state: &mut LoaderState) {
        state.workers += 1;
        this.threads_total.inc();
        let shared = Arc::clone(this);
        let handle = thread::Builder::new()
            .name("gantry-worker".into())
            .spawn(move || shared.worker_loop())
            .expect("failed to spawn loader worker thread");
        state.handles.push(handle);
        debug!("spawned worker ({} alive)", state.workers);
    }

    /// Pull ready jobs in priority order until the pool stops. Parks on
    /// the ready-queue condvar while there is nothing to do.
    fn worker_loop(self: Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.pool != PoolState::Running {
                break;
            }
            let Some(job) = state.ready.pop() else {
                state = self.job_ready.wait(state).unwrap();
                continue;
            };
            let id = job_id(&job);
            let Some(info) = state.scheduled.get_mut(&id) else {
                warn!("ready queue yielded unknown job '{}'", job.name());
                continue;
            };
            info.ready_seq = None;
            let priority = info.priority;
            state.busy += 1;
            drop(state);

            // The user function runs with no loader lock held. Every
            // dependency succeeded before this job entered the ready queue.
            self.threads_active.inc();
            AMBIENT_PRIORITY.with(|cell| cell.set(Some(priority)));
            let result = job.execute();
            AMBIENT_PRIORITY.with(|cell| cell.set(None));
            self.threads_active.dec();

            state = self.state.lock().unwrap();
            state.busy -= 1;
            match result {
                Ok(()) => Self::finish_job(&self, &mut state, &job, LoadStatus::Success, None),
                Err(error) => {
                    warn!("job '{}' failed: {}", job.name(), error);
                    Self::finish_job(&self, &mut state, &job, LoadStatus::Failed, Some(error));
                }
            }
        }
        state.workers -= 1;
        drop(state);
        self.threads_total.dec();
    }

    /// Terminal transition for a scheduled job: release its waiters,
    /// resolve or poison its dependents, and drop the scheduler's
    /// reference. A failure poisons pending dependents transitively.
    pub(crate) fn finish_job(
        this: &Arc<Self>,
        state: &mut LoaderState,
        job: &Arc<LoadJob>,
        status: LoadStatus,
        error: Option<LoadError>,
    ) {
        let mut work: Vec<(Arc<LoadJob>, LoadStatus, Option<LoadError>)> =
            vec![(Arc::clone(job), status, error)];

        while let Some((job, status, error)) = work.pop() {
            let id = job_id(&job);
            let Some(info) = state.scheduled.remove(&id) else {
                continue;
            };
            if let Some(seq) = info.ready_seq {
                state.ready.remove(info.priority, seq);
            }
            if status == LoadStatus::Success {
                for dependent in &info.dependents {
                    let dep_id = job_id(dependent);
                    let becomes_ready = match state.scheduled.get_mut(&dep_id) {
                        Some(dep_info) => {
                            dep_info.unresolved -= 1;
                            dep_info.unresolved == 0
                        }
                        None => false,
                    };
                    if becomes_ready {
                        Self::enqueue(this, state, dep_id);
                    }
                }
            } else {
                // Unlink from still-pending dependencies, then poison
                // pending dependents.
                for dep in job.dependencies() {
                    if let Some(dep_info) = state.scheduled.get_mut(&job_id(&dep)) {
                        dep_info.dependents.retain(|d| !Arc::ptr_eq(d, &job));
                    }
                }
                for dependent in &info.dependents {
                    if state.scheduled.contains_key(&job_id(dependent)) {
                        let cause = LoadError::DependencyFailed(format!(
                            "job '{}' depends on failed job '{}'",
                            dependent.name(),
                            job.name()
                        ));
                        work.push((Arc::clone(dependent), LoadStatus::Failed, Some(cause)));
                    }
                }
            }
            job.finish(status, error);
        }

        if state.scheduled.is_empty() {
            this.drained.notify_all();
        }
    }
}
