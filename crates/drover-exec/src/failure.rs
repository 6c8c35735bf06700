//! Task failure taxonomy.
//!
//! A failed execution carries a [`FailureCause`] describing *why* it
//! failed; the scheduler's failure resolver dispatches on the cause to
//! decide retry vs worker-loss vs cascade handling:
//!
//! | Cause | Retry counts? | Worker marked failed? |
//! |---|---|---|
//! | [`FailureCause::Other`] | yes | no |
//! | [`FailureCause::NotConnected`] | no | yes (last executor) |
//! | [`FailureCause::DependenciesFailed`] | no | transitively, per report |
//! | [`FailureCause::FailedDependency`] | no | yes (last executor) |
//!
//! Causes cross the wire (workers report them back to the driver), so
//! they serialize.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use drover_core::{TaskId, WorkerName};

/// One entry of a [`FailureCause::DependenciesFailed`] report: a set of
/// dependency tasks whose materialized output was missing, attributed to
/// the executor believed to have held it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyFailure {
    /// The worker that held the lost output, or `None` when the reporting
    /// task could not attribute the loss to a specific worker.
    pub executor: Option<WorkerName>,
    /// The dependency tasks whose output was lost.
    pub tasks: BTreeSet<TaskId>,
}

impl DependencyFailure {
    /// Creates a report entry attributed to a specific worker.
    #[must_use]
    pub fn on_worker(executor: WorkerName, tasks: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            executor: Some(executor),
            tasks: tasks.into_iter().collect(),
        }
    }

    /// Creates an unattributed report entry.
    #[must_use]
    pub fn unattributed(tasks: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            executor: None,
            tasks: tasks.into_iter().collect(),
        }
    }
}

/// Why a task execution failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// The task could not read one or more dependency outputs. The
    /// scheduler re-executes the named dependencies and reschedules the
    /// reporting task once they complete.
    #[error("dependencies failed on their executors ({} report entries)", failures.len())]
    DependenciesFailed {
        /// Lost dependencies, grouped by the executor that held them.
        failures: Vec<DependencyFailure>,
    },

    /// Synthetic cascade marker: the task was marked failed after the
    /// fact because a dependent task reported its output lost.
    #[error("marked failed by a dependent task: {message}")]
    FailedDependency {
        /// Human-readable description of which task reported the loss.
        message: String,
    },

    /// The transport connection to the executing worker was lost.
    #[error("connection to the executing worker was lost")]
    NotConnected,

    /// Any other execution failure; subject to the retry counter.
    #[error("task execution failed: {message}")]
    Other {
        /// Description of the failure.
        message: String,
    },
}

impl FailureCause {
    /// Creates a generic failure cause.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Creates a cascade marker naming the reporting task.
    #[must_use]
    pub fn failed_dependency(reporter: TaskId) -> Self {
        Self::FailedDependency {
            message: format!("output reported lost by task {reporter}"),
        }
    }

    /// Short label for the cause, used in logs and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DependenciesFailed { .. } => "dependencies_failed",
            Self::FailedDependency { .. } => "failed_dependency",
            Self::NotConnected => "not_connected",
            Self::Other { .. } => "other",
        }
    }
}
