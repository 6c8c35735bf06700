//! In-memory tasks and workers for exercising the scheduler.
//!
//! The kit mirrors the role of the no-op and failing runners elsewhere
//! in this workspace: real implementations of the external contracts,
//! deterministic enough to script whole scenarios.
//!
//! - [`StaticWorker`]: a worker that is nothing but a name.
//! - [`ScriptedTask`]: a task whose per-attempt outcomes are scripted
//!   up front; unscripted attempts succeed. Completions fire from a
//!   spawned thread by default, or inline before dispatch returns when
//!   configured synchronous.
//! - [`EventLog`]: captures the job event stream for assertions.

use std::collections::BTreeSet;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use drover_core::{TaskId, WorkerName};

use crate::error::Error;
use crate::events::{EventCallback, JobEvent};
use crate::failure::FailureCause;
use crate::task::Task;
use crate::worker::{DispatchError, DispatchResult, ExecutionHandle, Worker};

/// A worker handle carrying only its name.
#[derive(Debug)]
pub struct StaticWorker {
    name: WorkerName,
}

impl StaticWorker {
    /// Creates a worker with the given name.
    ///
    /// # Panics
    ///
    /// Panics if the name is invalid (test convenience).
    #[must_use]
    pub fn new(name: &str) -> Arc<dyn Worker> {
        Arc::new(Self {
            name: WorkerName::new(name).expect("valid worker name"),
        })
    }
}

impl Worker for StaticWorker {
    fn name(&self) -> &WorkerName {
        &self.name
    }
}

/// Builds a worker set from names.
#[must_use]
pub fn workers(names: &[&str]) -> Vec<Arc<dyn Worker>> {
    names.iter().map(|name| StaticWorker::new(name)).collect()
}

/// Scripted outcome for one execution attempt.
#[derive(Debug, Clone)]
enum ScriptedOutcome {
    /// Complete successfully.
    Succeed,
    /// Complete with the given failure recorded.
    Fail(FailureCause),
    /// Reject the dispatch synchronously.
    RejectDispatch(FailureCause),
    /// Never complete; the execution hangs until cancelled externally.
    Hang,
}

#[derive(Debug, Default)]
struct ExecState {
    failed: bool,
    cause: Option<FailureCause>,
    executed_on: Vec<WorkerName>,
    cancelled: bool,
}

/// A task whose execution attempts follow a script.
///
/// Attempt `n` takes the `n`-th scripted outcome; attempts past the end
/// of the script succeed. Each new attempt clears the failure state of
/// the previous one, like a real re-dispatch creating a fresh future.
#[derive(Debug)]
pub struct ScriptedTask {
    id: TaskId,
    priority: i32,
    dependencies: BTreeSet<TaskId>,
    stopped_on: Option<WorkerName>,
    locality: Vec<(WorkerName, i32)>,
    synchronous: bool,
    dispatched: Option<Sender<TaskId>>,
    script: Mutex<Vec<ScriptedOutcome>>,
    state: Arc<Mutex<ExecState>>,
}

/// Builder for [`ScriptedTask`].
#[derive(Debug)]
pub struct ScriptedTaskBuilder {
    id: TaskId,
    priority: i32,
    dependencies: BTreeSet<TaskId>,
    stopped_on: Option<WorkerName>,
    locality: Vec<(WorkerName, i32)>,
    synchronous: bool,
    dispatched: Option<Sender<TaskId>>,
    script: Vec<ScriptedOutcome>,
}

impl ScriptedTask {
    /// Starts building a task with the given id and priority.
    #[must_use]
    pub fn builder(id: TaskId, priority: i32) -> ScriptedTaskBuilder {
        ScriptedTaskBuilder {
            id,
            priority,
            dependencies: BTreeSet::new(),
            stopped_on: None,
            locality: Vec::new(),
            synchronous: false,
            dispatched: None,
            script: Vec::new(),
        }
    }

    /// True when `cancel()` was called on this task.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        lock(&self.state).cancelled
    }

    /// Number of execution attempts so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        lock(&self.state).executed_on.len()
    }
}

impl ScriptedTaskBuilder {
    /// Declares dependencies on the given tasks.
    #[must_use]
    pub fn depends_on(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    /// Marks the task as already materialized on the given worker.
    #[must_use]
    pub fn stopped_on(mut self, worker: &str) -> Self {
        self.stopped_on = Some(WorkerName::new(worker).expect("valid worker name"));
        self
    }

    /// Declares a locality score for a worker (negative = forbidden).
    #[must_use]
    pub fn locality(mut self, worker: &str, score: i32) -> Self {
        self.locality
            .push((WorkerName::new(worker).expect("valid worker name"), score));
        self
    }

    /// Scripts the next attempt to fail with the given cause.
    #[must_use]
    pub fn then_fail(mut self, cause: FailureCause) -> Self {
        self.script.push(ScriptedOutcome::Fail(cause));
        self
    }

    /// Scripts the next attempt to be rejected at dispatch time.
    #[must_use]
    pub fn then_reject_dispatch(mut self, cause: FailureCause) -> Self {
        self.script.push(ScriptedOutcome::RejectDispatch(cause));
        self
    }

    /// Scripts the next attempt to succeed explicitly.
    #[must_use]
    pub fn then_succeed(mut self) -> Self {
        self.script.push(ScriptedOutcome::Succeed);
        self
    }

    /// Scripts the next attempt to hang forever (for abort tests).
    #[must_use]
    pub fn then_hang(mut self) -> Self {
        self.script.push(ScriptedOutcome::Hang);
        self
    }

    /// Completes executions inline, before dispatch returns the handle.
    /// Exercises the already-completed registration path.
    #[must_use]
    pub const fn synchronous(mut self) -> Self {
        self.synchronous = true;
        self
    }

    /// Sends the task id on the channel each time the task is dispatched.
    #[must_use]
    pub fn notify_dispatch(mut self, sender: Sender<TaskId>) -> Self {
        self.dispatched = Some(sender);
        self
    }

    /// Builds the task.
    #[must_use]
    pub fn build(self) -> Arc<ScriptedTask> {
        Arc::new(ScriptedTask {
            id: self.id,
            priority: self.priority,
            dependencies: self.dependencies,
            stopped_on: self.stopped_on,
            locality: self.locality,
            synchronous: self.synchronous,
            dispatched: self.dispatched,
            script: Mutex::new(self.script),
            state: Arc::new(Mutex::new(ExecState::default())),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn apply_outcome(state: &Mutex<ExecState>, outcome: &ScriptedOutcome) {
    let mut st = lock(state);
    match outcome {
        ScriptedOutcome::Succeed => {}
        ScriptedOutcome::Fail(cause) => {
            st.failed = true;
            st.cause = Some(cause.clone());
        }
        ScriptedOutcome::RejectDispatch(_) | ScriptedOutcome::Hang => {
            unreachable!("outcome handled before completion")
        }
    }
}

impl Task for ScriptedTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn dependencies(&self) -> BTreeSet<TaskId> {
        self.dependencies.clone()
    }

    fn stopped_on(&self) -> Option<WorkerName> {
        self.stopped_on.clone()
    }

    fn executed_on_last(&self) -> Option<WorkerName> {
        lock(&self.state).executed_on.last().cloned()
    }

    fn executed_on(&self) -> Vec<WorkerName> {
        lock(&self.state).executed_on.clone()
    }

    fn failed(&self) -> bool {
        lock(&self.state).failed
    }

    fn exception(&self) -> Option<FailureCause> {
        lock(&self.state).cause.clone()
    }

    fn mark_failed(&self, cause: FailureCause) {
        let mut st = lock(&self.state);
        st.failed = true;
        st.cause = Some(cause);
    }

    fn cancel(&self) {
        lock(&self.state).cancelled = true;
    }

    fn execute(&self, worker: &Arc<dyn Worker>) -> DispatchResult<ExecutionHandle> {
        let attempt = {
            let mut st = lock(&self.state);
            st.executed_on.push(worker.name().clone());
            st.failed = false;
            st.cause = None;
            st.executed_on.len()
        };

        let outcome = {
            let script = lock(&self.script);
            script
                .get(attempt - 1)
                .cloned()
                .unwrap_or(ScriptedOutcome::Succeed)
        };

        if let Some(sender) = &self.dispatched {
            let _ = sender.send(self.id);
        }

        if let ScriptedOutcome::RejectDispatch(cause) = outcome {
            return Err(DispatchError::Failed { cause });
        }

        let (handle, completion) = ExecutionHandle::channel();
        if matches!(outcome, ScriptedOutcome::Hang) {
            drop(completion);
            return Ok(handle);
        }
        if self.synchronous {
            apply_outcome(&self.state, &outcome);
            completion.complete();
        } else {
            let state = Arc::clone(&self.state);
            std::thread::spawn(move || {
                apply_outcome(&state, &outcome);
                completion.complete();
            });
        }
        Ok(handle)
    }

    fn locality(&self, _workers: &[Arc<dyn Worker>]) -> Vec<(WorkerName, i32)> {
        self.locality.clone()
    }
}

/// A recorded job event, reduced to comparable data.
#[derive(Debug, Clone)]
pub enum RecordedEvent {
    /// A task completion event.
    Task {
        /// The completed task's id.
        id: TaskId,
        /// Whether the completion observed a failed task.
        failed: bool,
    },
    /// The terminal event, with the fatal error if any.
    Finished(Option<Error>),
}

/// Collects the event stream of a run for assertions.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<RecordedEvent>>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a callback that appends every event to this log.
    #[must_use]
    pub fn callback(self: &Arc<Self>) -> EventCallback {
        let log = Arc::clone(self);
        Box::new(move |event| {
            let recorded = match &event {
                JobEvent::TaskCompleted(task) => RecordedEvent::Task {
                    id: task.id(),
                    failed: task.failed(),
                },
                JobEvent::JobFinished(err) => RecordedEvent::Finished(err.clone()),
            };
            lock(&log.events).push(recorded);
        })
    }

    /// All recorded events in delivery order.
    #[must_use]
    pub fn recorded(&self) -> Vec<RecordedEvent> {
        lock(&self.events).clone()
    }

    /// The task-completion events only, in delivery order.
    #[must_use]
    pub fn task_events(&self) -> Vec<(TaskId, bool)> {
        self.recorded()
            .into_iter()
            .filter_map(|event| match event {
                RecordedEvent::Task { id, failed } => Some((id, failed)),
                RecordedEvent::Finished(_) => None,
            })
            .collect()
    }

    /// The terminal outcomes recorded (exactly one after a full run).
    #[must_use]
    pub fn terminals(&self) -> Vec<Option<Error>> {
        self.recorded()
            .into_iter()
            .filter_map(|event| match event {
                RecordedEvent::Finished(err) => Some(err),
                RecordedEvent::Task { .. } => None,
            })
            .collect()
    }
}
