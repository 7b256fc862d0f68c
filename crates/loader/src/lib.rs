//! Asynchronous job loader.
//!
//! A [`LoadJob`] is a unit of deferred work with dependencies on other jobs.
//! The [`AsyncLoader`] executes a dynamically growing DAG of such jobs over
//! a bounded worker pool, dispatching in priority order, inheriting priority
//! through waiters, and supporting cancellation of individual jobs or whole
//! [`Task`] batches.

pub mod job;
pub mod loader;
pub mod metrics;
mod ready_queue;
pub mod task;

pub use gantry_core::{LoadError, LoaderConfig};
pub use job::{make_load_job, JobFn, LoadJob, LoadStatus};
pub use loader::AsyncLoader;
pub use metrics::{Gauge, LoaderStats};
pub use task::Task;
