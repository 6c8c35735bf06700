//! Observability metrics for the scheduler.
//!
//! Thin facade over the `metrics` crate. Exported series:
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `drover_dispatches_total` | Counter | - | Tasks dispatched to workers |
//! | `drover_completions_total` | Counter | `outcome` | Task completions by outcome |
//! | `drover_retries_total` | Counter | `cause` | Task reschedules by failure cause |
//! | `drover_workers_failed_total` | Counter | - | Workers declared dead |
//! | `drover_executable_depth` | Gauge | - | Tasks currently eligible to run |
//! | `drover_executing_depth` | Gauge | - | Tasks currently dispatched |

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: tasks dispatched to workers.
    pub const DISPATCHES_TOTAL: &str = "drover_dispatches_total";
    /// Counter: task completions, labelled by outcome.
    pub const COMPLETIONS_TOTAL: &str = "drover_completions_total";
    /// Counter: task reschedules, labelled by failure cause.
    pub const RETRIES_TOTAL: &str = "drover_retries_total";
    /// Counter: workers declared dead.
    pub const WORKERS_FAILED_TOTAL: &str = "drover_workers_failed_total";
    /// Gauge: tasks currently eligible to run.
    pub const EXECUTABLE_DEPTH: &str = "drover_executable_depth";
    /// Gauge: tasks currently dispatched.
    pub const EXECUTING_DEPTH: &str = "drover_executing_depth";
}

/// Label keys used across metrics.
pub mod labels {
    /// Completion outcome (`success` or `failure`).
    pub const OUTCOME: &str = "outcome";
    /// Failure cause kind driving a reschedule.
    pub const CAUSE: &str = "cause";
}

/// Recording facade for scheduler metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    /// Creates the facade.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a task dispatch.
    pub fn record_dispatch(&self) {
        counter!(names::DISPATCHES_TOTAL).increment(1);
    }

    /// Records a task completion with the given outcome label.
    pub fn record_completion(&self, outcome: &'static str) {
        counter!(names::COMPLETIONS_TOTAL, labels::OUTCOME => outcome).increment(1);
    }

    /// Records a task reschedule caused by the given failure kind.
    pub fn record_retry(&self, cause: &'static str) {
        counter!(names::RETRIES_TOTAL, labels::CAUSE => cause).increment(1);
    }

    /// Records a worker being declared dead.
    pub fn record_worker_failed(&self) {
        counter!(names::WORKERS_FAILED_TOTAL).increment(1);
    }

    /// Updates the executable-depth gauge.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_executable_depth(&self, depth: usize) {
        gauge!(names::EXECUTABLE_DEPTH).set(depth as f64);
    }

    /// Updates the executing-depth gauge.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_executing_depth(&self, depth: usize) {
        gauge!(names::EXECUTING_DEPTH).set(depth as f64);
    }
}
