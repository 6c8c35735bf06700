//! The task contract consumed by the scheduler.
//!
//! Tasks are opaque units of deferred work built by the surrounding
//! system. The scheduler never looks inside a task; it reads the
//! declared DAG shape (id, priority, dependency ids), drives the task's
//! failure state, and dispatches it to workers through
//! [`Task::execute`].

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use drover_core::{TaskId, WorkerName};

use crate::failure::FailureCause;
use crate::worker::{DispatchResult, ExecutionHandle, Worker};

/// A unit of deferred work in a job's DAG.
///
/// ## Contract
///
/// - `id` and `priority` are stable for the lifetime of the job.
/// - [`Task::execute`] must not block on network I/O: it queues the work
///   on the transport layer and returns an [`ExecutionHandle`]
///   immediately. The task records the target worker as its latest
///   attempt before returning.
/// - The execution layer must record failure state (via the task's own
///   bookkeeping or [`Task::mark_failed`]) *before* completing the
///   handle; the scheduler reads [`Task::failed`] when the completion
///   arrives.
/// - A re-execution clears the failure state of the previous attempt.
pub trait Task: Send + Sync {
    /// Stable unique identifier of this task.
    fn id(&self) -> TaskId;

    /// Scheduling priority; lower sorts earlier.
    fn priority(&self) -> i32;

    /// IDs of the tasks this task requires.
    fn dependencies(&self) -> BTreeSet<TaskId>;

    /// The worker on which this task's output is already materialized,
    /// if any. A materialized task is not executed again.
    fn stopped_on(&self) -> Option<WorkerName>;

    /// The worker of the most recent execution attempt.
    fn executed_on_last(&self) -> Option<WorkerName>;

    /// All execution attempts, oldest first (for diagnostics).
    fn executed_on(&self) -> Vec<WorkerName>;

    /// True when the most recent execution failed.
    fn failed(&self) -> bool;

    /// The failure cause of the most recent execution, if it failed.
    fn exception(&self) -> Option<FailureCause>;

    /// Marks the task failed after the fact with the given cause.
    ///
    /// The scheduler uses this to inject the synthetic
    /// [`FailureCause::FailedDependency`] marker when a dependent task
    /// reports this task's output lost.
    fn mark_failed(&self, cause: FailureCause);

    /// Best-effort cancellation of an outstanding execution.
    fn cancel(&self);

    /// Dispatches the task to the given worker.
    ///
    /// # Errors
    ///
    /// Returns [`crate::worker::DispatchError::Cancelled`] when the task
    /// was cancelled before dispatch, or
    /// [`crate::worker::DispatchError::Failed`] when the transport
    /// rejected the dispatch synchronously.
    fn execute(&self, worker: &Arc<dyn Worker>) -> DispatchResult<ExecutionHandle>;

    /// Advisory per-worker affinity scores.
    ///
    /// A score `< 0` forbids the worker, `> 0` prefers it (higher is
    /// stronger), `0` is indifferent and may be omitted. The default
    /// declares no affinity at all.
    fn locality(&self, workers: &[Arc<dyn Worker>]) -> Vec<(WorkerName, i32)> {
        let _ = workers;
        Vec::new()
    }
}

/// Observable status of a task during a run.
///
/// Every task is in exactly one status at any quiescent point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on unfinished dependencies.
    Blocked,
    /// Eligible to be dispatched now.
    Executable,
    /// Dispatched to a worker, completion pending.
    Executing,
    /// Completed successfully.
    Executed,
    /// Failed terminally (retries exhausted or run aborted mid-recovery).
    Failed,
}

impl TaskStatus {
    /// Returns true for statuses that end a task's lifecycle.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed)
    }

    /// Returns true when the task still has work ahead of it.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Blocked | Self::Executable | Self::Executing)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Blocked => "blocked",
            Self::Executable => "executable",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_terminal_classification() {
        assert!(TaskStatus::Executed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Executing.is_terminal());
        assert!(TaskStatus::Blocked.is_live());
        assert!(!TaskStatus::Executed.is_live());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Executable).unwrap();
        assert_eq!(json, "\"executable\"");
    }
}
