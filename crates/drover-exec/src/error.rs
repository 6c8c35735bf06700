//! Error types for the scheduling domain.

use drover_core::TaskId;

use crate::failure::FailureCause;

/// The result type used throughout drover-exec.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing or running a scheduler.
///
/// The enum is `Clone` so a terminal error can be delivered through the
/// job event stream and also returned from `run()`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The job contained no tasks.
    #[error("a job must provide at least one task to execute")]
    EmptyJob,

    /// Two tasks shared the same ID.
    #[error("duplicate task ID: {task_id}")]
    DuplicateTaskId {
        /// The ID that appeared more than once.
        task_id: TaskId,
    },

    /// A task named a dependency that is not part of the job.
    #[error("task {task_id} depends on unknown task {dependency}")]
    UnknownDependency {
        /// The task declaring the dependency.
        task_id: TaskId,
        /// The dependency ID that was not found in the job.
        dependency: TaskId,
    },

    /// A failure report named a task that is not part of the job.
    #[error("dependency failure reported for unknown task {task_id}")]
    UnknownTaskInReport {
        /// The unknown task ID carried by the report.
        task_id: TaskId,
    },

    /// No task was executable after classification: every task has
    /// unfinished dependencies, which means the DAG has no entry points.
    #[error("no tasks executable (all tasks have unfinished dependencies)")]
    NoEntryPoints,

    /// No worker could accept work after classification.
    #[error("no workers available (all workers are forbidden by all tasks)")]
    NoUsableWorkers,

    /// One task forbids every registered worker.
    #[error("task {task_id} cannot be executed on any available worker")]
    TaskUnplaceable {
        /// The task that no worker may execute.
        task_id: TaskId,
    },

    /// Every worker was declared dead during the run.
    #[error("unable to complete job: all workers failed")]
    AllWorkersFailed,

    /// A task kept failing until its attempt bound was reached.
    #[error("task {task_id} failed after {attempts} attempts: {cause}")]
    AttemptsExhausted {
        /// The task whose retries were exhausted.
        task_id: TaskId,
        /// The configured attempt bound.
        attempts: usize,
        /// The final failure cause observed.
        cause: FailureCause,
    },

    /// The run was aborted without a recorded cause.
    #[error("job aborted")]
    Aborted,

    /// The job configuration was invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the invalid setting.
        message: String,
    },

    /// An internal invariant was violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },

    /// An error from drover-core.
    #[error("core error: {0}")]
    Core(#[from] drover_core::Error),
}

impl Error {
    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
