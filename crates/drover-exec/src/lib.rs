//! # drover-exec
//!
//! The drover scheduler core: drives a fixed, pre-computed DAG of tasks
//! to completion across a pool of remote workers.
//!
//! The scheduler maintains, simultaneously:
//!
//! - **DAG readiness**: tasks unblock as their dependencies complete and
//!   are demoted again when a cascading failure invalidates an upstream
//!   output
//! - **Locality-aware assignment**: per-task worker preferences and
//!   forbidden sets, with bounded per-worker concurrency
//! - **Failure recovery**: four distinguishable failure kinds with
//!   distinct retry, cascade, and worker-health policies
//!
//! ## Core concepts
//!
//! - **Task**: an opaque unit of deferred work with a stable id,
//!   priority, and declared dependencies ([`task::Task`])
//! - **Worker**: an opaque remote execution endpoint with a unique name
//!   ([`worker::Worker`])
//! - **Job**: one run of a task DAG, driven by a [`scheduler::Scheduler`]
//!   and reported through [`events::JobEvent`]s
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use drover_core::TaskId;
//! use drover_exec::context::ExecContext;
//! use drover_exec::events::JobEvent;
//! use drover_exec::scheduler::Scheduler;
//! use drover_exec::testkit::{workers, ScriptedTask};
//!
//! # fn main() -> drover_exec::error::Result<()> {
//! let upstream = TaskId::generate();
//! let downstream = TaskId::generate();
//! let tasks = vec![
//!     ScriptedTask::builder(upstream, 1).build() as Arc<dyn drover_exec::task::Task>,
//!     ScriptedTask::builder(downstream, 2)
//!         .depends_on([upstream])
//!         .build(),
//! ];
//!
//! let ctx = ExecContext::new(workers(&["w1"]));
//! let scheduler = Scheduler::new(
//!     &ctx,
//!     tasks,
//!     Box::new(|event| {
//!         if let JobEvent::TaskCompleted(task) = event {
//!             println!("completed {}", task.id());
//!         }
//!     }),
//! )?;
//! scheduler.run()?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod events;
pub mod failure;
pub mod metrics;
pub mod scheduler;
pub mod task;
pub mod testkit;
pub mod worker;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::context::{ExecContext, JobConfig, JobOptions};
    pub use crate::error::{Error, Result};
    pub use crate::events::{EventCallback, JobEvent};
    pub use crate::failure::{DependencyFailure, FailureCause};
    pub use crate::metrics::SchedulerMetrics;
    pub use crate::scheduler::{Scheduler, SchedulerHandle, SchedulerSnapshot};
    pub use crate::task::{Task, TaskStatus};
    pub use crate::worker::{
        Completion, DispatchError, DispatchResult, ExecutionHandle, Registration, Worker,
    };
}
