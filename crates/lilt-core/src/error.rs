//! Scheduler error types.

/// Failures observable when awaiting a task, a gathered set of tasks, or a
/// worker-pool submission.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// A callable submitted to the worker pool panicked or could not run
    #[error("worker callable failed: {message}")]
    Worker {
        /// Message extracted from the panic payload (or a pool diagnostic)
        message: String,
    },

    /// At least one gathered task failed
    #[error("gathered task failed: {0}")]
    Gather(Box<TaskError>),

    /// The task was cancelled before it completed
    #[error("task cancelled")]
    Cancelled,
}

impl TaskError {
    /// Build a worker failure from a message.
    pub fn worker(message: impl Into<String>) -> Self {
        TaskError::Worker {
            message: message.into(),
        }
    }
}
