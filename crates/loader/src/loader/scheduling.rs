use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use gantry_core::LoadError;

use crate::job::{job_id, JobId, LoadJob, LoadStatus};
use crate::task::Task;

use super::core::{AsyncLoader, JobInfo, LoaderShared, LoaderState};

impl AsyncLoader {
    /// Schedule a batch of jobs at the default priority.
    pub fn schedule(
        &self,
        jobs: impl IntoIterator<Item = Arc<LoadJob>>,
    ) -> Result<Task, LoadError> {
        self.schedule_with_priority(jobs, 0)
    }

    /// Atomically admit a batch of jobs at the given requested priority.
    ///
    /// The whole batch is rejected with `ScheduleFailed` (scheduler state
    /// untouched) if the dependency closure over pending and submitted jobs
    /// contains a cycle; the error message names exactly the jobs on the
    /// cycle. Returns a [`Task`] owning the admitted jobs.
    pub fn schedule_with_priority(
        &self,
        jobs: impl IntoIterator<Item = Arc<LoadJob>>,
        priority: i64,
    ) -> Result<Task, LoadError> {
        let shared = self.shared();
        let mut batch: Vec<Arc<LoadJob>> = Vec::new();
        for job in jobs {
            if !batch.iter().any(|j| Arc::ptr_eq(j, &job)) {
                batch.push(job);
            }
        }

        let mut state = shared.state.lock().unwrap();

        batch.retain(|job| {
            if state.scheduled.contains_key(&job_id(job)) {
                warn!("ignoring job '{}': already scheduled", job.name());
                return false;
            }
            if job.status() != LoadStatus::Pending {
                warn!("ignoring job '{}': already terminal", job.name());
                return false;
            }
            true
        });

        check_cycle(&batch)?;

        // Admission: nothing below can fail, so state stays consistent.
        for job in &batch {
            job.set_priority(priority);
            job.attach(shared);
            state.scheduled.insert(
                job_id(job),
                JobInfo {
                    job: Arc::clone(job),
                    unresolved: 0,
                    dependents: Vec::new(),
                    priority,
                    ready_seq: None,
                },
            );
        }

        // Install reverse edges and count unresolved dependencies. A
        // dependency that is terminal-failed, or pending but unknown to
        // this scheduler, dooms the job immediately.
        let mut doomed: Vec<(Arc<LoadJob>, LoadError)> = Vec::new();
        for job in &batch {
            let mut unresolved = 0;
            for dep in job.dependencies() {
                if let Some(dep_info) = state.scheduled.get_mut(&job_id(&dep)) {
                    dep_info.dependents.push(Arc::clone(job));
                    unresolved += 1;
                    continue;
                }
                match dep.status() {
                    LoadStatus::Success => {}
                    LoadStatus::Failed => doomed.push((
                        Arc::clone(job),
                        LoadError::DependencyFailed(format!(
                            "job '{}' depends on failed job '{}'",
                            job.name(),
                            dep.name()
                        )),
                    )),
                    LoadStatus::Pending => doomed.push((
                        Arc::clone(job),
                        LoadError::DependencyFailed(format!(
                            "job '{}' depends on job '{}', which is not scheduled",
                            job.name(),
                            dep.name()
                        )),
                    )),
                }
            }
            if let Some(info) = state.scheduled.get_mut(&job_id(job)) {
                info.unresolved = unresolved;
            }
        }

        // Doomed jobs fail now, poisoning their in-batch dependents before
        // anything is dispatched.
        for (job, error) in doomed {
            if state.scheduled.contains_key(&job_id(&job)) {
                LoaderShared::finish_job(shared, &mut state, &job, LoadStatus::Failed, Some(error));
            }
        }

        // Everything left with no unresolved dependencies is dispatchable.
        for job in &batch {
            let id = job_id(job);
            let ready = matches!(
                state.scheduled.get(&id),
                Some(info) if info.unresolved == 0 && info.ready_seq.is_none()
            );
            if ready {
                LoaderShared::enqueue(shared, &mut state, id);
            }
        }

        debug!("scheduled {} jobs at priority {}", batch.len(), priority);
        Ok(Task::new(Arc::clone(shared), batch))
    }

    /// Raise the effective priority of a pending job, and transitively of
    /// its pending dependencies, to at least `priority`. Boosts are
    /// monotone; lower values are ignored. No-op for terminal or
    /// unscheduled jobs.
    pub fn prioritize(&self, job: &LoadJob, priority: i64) {
        self.shared().boost(job, priority);
    }
}

impl LoaderShared {
    /// Cancel the still-pending jobs in `jobs`, then wait out the executing
    /// ones. Every listed job is terminal on return.
    pub(crate) fn remove(this: &Arc<Self>, jobs: &[Arc<LoadJob>]) {
        let mut executing: Vec<Arc<LoadJob>> = Vec::new();
        {
            let mut state = this.state.lock().unwrap();
            for job in jobs {
                match state.scheduled.get(&job_id(job)) {
                    Some(info) if info.is_executing() => executing.push(Arc::clone(job)),
                    Some(_) => {
                        let error =
                            LoadError::Canceled(format!("job '{}' canceled", job.name()));
                        LoaderShared::finish_job(this, &mut state, job, LoadStatus::Failed, Some(error));
                    }
                    None => {}
                }
            }
        }
        // Executing jobs are never interrupted; they finish on their own
        // terms and keep the status their function produced.
        for job in executing {
            job.wait_no_throw();
        }
    }

    /// Monotone priority boost for `job` and its pending dependency
    /// closure.
    pub(crate) fn boost(&self, job: &LoadJob, priority: i64) {
        let mut state = self.state.lock().unwrap();
        boost_locked(&mut state, job, priority);
    }
}

/// Graph relaxation re-establishing `effective >= inherited` over the
/// pending dependency closure. Worklist, not recursion; the graph was
/// verified acyclic at schedule time.
fn boost_locked(state: &mut LoaderState, job: &LoadJob, priority: i64) {
    let start = match state.scheduled.get(&job_id(job)) {
        Some(info) if info.priority < priority => Arc::clone(&info.job),
        _ => return,
    };
    let mut work: Vec<Arc<LoadJob>> = vec![start];
    while let Some(job) = work.pop() {
        let LoaderState {
            scheduled, ready, ..
        } = &mut *state;
        let Some(info) = scheduled.get_mut(&job_id(&job)) else {
            continue;
        };
        if info.priority >= priority {
            continue;
        }
        let old = info.priority;
        info.priority = priority;
        if let Some(seq) = info.ready_seq {
            ready.rekey(old, priority, seq);
        }
        for dep in job.dependencies() {
            work.push(dep);
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    InProgress,
    Done,
}

struct CyclePath {
    origin: JobId,
    names: Vec<String>,
    closed: bool,
}

/// Depth-first search for a dependency cycle over the submitted jobs and
/// everything still pending that is reachable from them. Runs under the
/// scheduler lock so statuses cannot flip mid-walk. The returned error
/// names only the jobs on the cycle.
fn check_cycle(batch: &[Arc<LoadJob>]) -> Result<(), LoadError> {
    let mut marks: HashMap<JobId, Mark> = HashMap::new();
    for job in batch {
        if let Some(cycle) = dfs(job, &mut marks) {
            let mut names = cycle.names;
            let first = names.first().cloned().unwrap_or_default();
            names.push(first);
            return Err(LoadError::ScheduleFailed(format!(
                "dependency cycle detected: {}",
                names.join(" -> ")
            )));
        }
    }
    Ok(())
}

fn dfs(job: &Arc<LoadJob>, marks: &mut HashMap<JobId, Mark>) -> Option<CyclePath> {
    let id = job_id(job);
    match marks.get(&id) {
        Some(Mark::Done) => return None,
        Some(Mark::InProgress) => {
            return Some(CyclePath {
                origin: id,
                names: vec![job.name().to_string()],
                closed: false,
            });
        }
        None => {}
    }
    marks.insert(id, Mark::InProgress);
    for dep in job.dependencies() {
        // Terminal jobs cannot sit on a cycle.
        if dep.status() != LoadStatus::Pending {
            continue;
        }
        if let Some(mut cycle) = dfs(&dep, marks) {
            if !cycle.closed {
                if cycle.origin == id {
                    cycle.closed = true;
                } else {
                    cycle.names.push(job.name().to_string());
                }
            }
            return Some(cycle);
        }
    }
    marks.insert(id, Mark::Done);
    None
}
