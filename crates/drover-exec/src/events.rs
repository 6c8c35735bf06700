//! Job events delivered to the caller.
//!
//! The scheduler reports progress through a single callback:
//!
//! - one [`JobEvent::TaskCompleted`] per task completion event (a
//!   successful execution or a terminal failure). A task that is
//!   re-executed after a cascading dependency failure completes more
//!   than once, so the callback must be idempotent per task;
//! - exactly one [`JobEvent::JobFinished`] after the driver exits,
//!   carrying `None` on success or the fatal error.
//!
//! Events are delivered from the thread running
//! [`crate::scheduler::Scheduler::run`], outside the scheduler's state
//! lock, so a callback may safely call back into the scheduler (for
//! example to abort).

use std::sync::Arc;

use crate::error::Error;
use crate::task::Task;

/// A progress event for a running job.
pub enum JobEvent {
    /// A task completed: either a successful execution or a terminal
    /// failure. Inspect [`Task::failed`] to distinguish.
    TaskCompleted(Arc<dyn Task>),

    /// The job ended. `None` means every task executed successfully;
    /// otherwise the fatal error that stopped the run.
    JobFinished(Option<Error>),
}

impl JobEvent {
    /// The completed task's ID, when this is a task event.
    #[must_use]
    pub fn task_id(&self) -> Option<drover_core::TaskId> {
        match self {
            Self::TaskCompleted(task) => Some(task.id()),
            Self::JobFinished(_) => None,
        }
    }

    /// True for the terminal event.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::JobFinished(_))
    }
}

impl std::fmt::Debug for JobEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TaskCompleted(task) => f
                .debug_struct("TaskCompleted")
                .field("task_id", &task.id())
                .field("failed", &task.failed())
                .finish(),
            Self::JobFinished(err) => {
                f.debug_tuple("JobFinished").field(err).finish()
            }
        }
    }
}

/// The caller-provided event callback.
///
/// Must be thread safe; the scheduler owns it for the life of the job.
pub type EventCallback = Box<dyn Fn(JobEvent) + Send + Sync>;
