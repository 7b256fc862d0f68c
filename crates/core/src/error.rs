use thiserror::Error;

/// Terminal failure of a load job.
///
/// Errors are cloneable so that every thread blocked in `wait` on the same
/// failed job observes the same kind and message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The batch was rejected at schedule time (dependency cycle).
    #[error("job schedule failed: {0}")]
    ScheduleFailed(String),

    /// The job's own function returned an error or panicked.
    #[error("job failed: {0}")]
    Failed(String),

    /// The job was canceled while still pending.
    #[error("job canceled: {0}")]
    Canceled(String),

    /// A transitive dependency ended in a non-success status.
    #[error("job dependency failed: {0}")]
    DependencyFailed(String),
}

impl LoadError {
    /// Message carried by the error, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            LoadError::ScheduleFailed(m)
            | LoadError::Failed(m)
            | LoadError::Canceled(m)
            | LoadError::DependencyFailed(m) => m,
        }
    }
}
