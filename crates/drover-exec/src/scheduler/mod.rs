//! The scheduling driver.
//!
//! A [`Scheduler`] owns a fixed DAG of tasks and drives it to completion
//! across a pool of remote workers:
//!
//! - **Readiness**: tasks become executable when their last unfinished
//!   dependency completes, and are demoted back to blocked when a
//!   cascading failure invalidates a dependency's output.
//! - **Assignment**: free worker slots are handed tasks preferring
//!   declared locality, respecting forbidden-worker sets, in priority
//!   order.
//! - **Recovery**: failures are classified four ways (dependency
//!   cascade, marked-failed-by-peer, transport loss, generic) with
//!   distinct retry and worker-health policies.
//!
//! ## Threading
//!
//! One thread calls [`Scheduler::run`] and blocks until the job ends.
//! Completion callbacks fire on threads owned by the execution layer and
//! only enqueue a completion record; [`Scheduler::abort`] may be called
//! from any thread. All state lives under a single mutex with one
//! condition variable signalling `slot available ∨ completion pending ∨
//! abort`.

mod state;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use drover_core::observability::{job_span, task_span};
use drover_core::{JobId, TaskId, WorkerName};

use crate::context::{ExecContext, JobOptions};
use crate::error::{Error, Result};
use crate::events::{EventCallback, JobEvent};
use crate::metrics::SchedulerMetrics;
use crate::task::{Task, TaskStatus};
use crate::worker::{DispatchError, Registration, Worker};

use state::{State, TaskRecord};

struct Shared {
    job_id: JobId,
    state: Mutex<State>,
    cond: Condvar,
    done: EventCallback,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Schedules a job's tasks over a set of workers and reports progress
/// through the caller's event callback.
pub struct Scheduler {
    shared: Arc<Shared>,
}

/// A cloneable control handle for a scheduler, usable from any thread.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

/// A point-in-time view of scheduler state, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct SchedulerSnapshot {
    /// Observable status per task.
    pub statuses: BTreeMap<TaskId, TaskStatus>,
    /// Generic-failure retry counters (absent means zero).
    pub failures: BTreeMap<TaskId, usize>,
    /// Workers declared dead so far.
    pub workers_failed: BTreeSet<WorkerName>,
}

impl Scheduler {
    /// Creates a scheduler over the context's workers and defaults.
    ///
    /// `done` is invoked once per task completion event (success or
    /// terminal failure; possibly again when a task is re-executed after
    /// a cascade) and exactly once more when the job ends. See
    /// [`JobEvent`].
    ///
    /// # Errors
    ///
    /// Returns an error for an empty task set, duplicate task IDs,
    /// dependencies on unknown tasks, or invalid tuning bounds.
    pub fn new(
        ctx: &ExecContext,
        tasks: Vec<Arc<dyn Task>>,
        done: EventCallback,
    ) -> Result<Self> {
        Self::with_options(ctx, tasks, done, JobOptions::new())
    }

    /// Creates a scheduler with per-job overrides.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Scheduler::new`].
    pub fn with_options(
        ctx: &ExecContext,
        tasks: Vec<Arc<dyn Task>>,
        done: EventCallback,
        options: JobOptions,
    ) -> Result<Self> {
        let config = options.resolve(ctx)?;
        let worker_handles = options
            .workers
            .unwrap_or_else(|| ctx.workers().to_vec());

        if tasks.is_empty() {
            return Err(Error::EmptyJob);
        }

        let mut sorted = tasks;
        sorted.sort_by_key(|task| (task.priority(), task.id()));

        let mut records: HashMap<TaskId, TaskRecord> = HashMap::with_capacity(sorted.len());
        let mut order: Vec<TaskId> = Vec::with_capacity(sorted.len());
        for task in sorted {
            let task_id = task.id();
            let record = TaskRecord {
                priority: task.priority(),
                dependencies: task.dependencies(),
                dependents: BTreeSet::new(),
                task,
            };
            if records.insert(task_id, record).is_some() {
                return Err(Error::DuplicateTaskId { task_id });
            }
            order.push(task_id);
        }

        // Derive the inverse adjacency; reject edges to unknown tasks.
        let mut dependents: HashMap<TaskId, BTreeSet<TaskId>> = HashMap::new();
        for (&task_id, record) in &records {
            for &dependency in &record.dependencies {
                if !records.contains_key(&dependency) {
                    return Err(Error::UnknownDependency {
                        task_id,
                        dependency,
                    });
                }
                dependents.entry(dependency).or_default().insert(task_id);
            }
        }
        for (task_id, deps) in dependents {
            if let Some(record) = records.get_mut(&task_id) {
                record.dependents = deps;
            }
        }

        let mut workers: BTreeMap<WorkerName, Arc<dyn Worker>> = BTreeMap::new();
        for worker in worker_handles {
            workers.insert(worker.name().clone(), worker);
        }

        let state = State::new(
            records,
            order,
            workers,
            config.concurrency,
            config.attempts,
            SchedulerMetrics::new(),
        );

        Ok(Self {
            shared: Arc::new(Shared {
                job_id: JobId::generate(),
                state: Mutex::new(state),
                cond: Condvar::new(),
                done,
            }),
        })
    }

    /// The generated identifier of this job.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.shared.job_id
    }

    /// Returns a cloneable control handle for this scheduler.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Drives the job to completion or abort. Blocking.
    ///
    /// Emits the terminal [`JobEvent::JobFinished`] exactly once, with
    /// `None` on success or the fatal error otherwise, and returns the
    /// same outcome.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the run: a classification
    /// failure, retry exhaustion, loss of every worker, an internal
    /// invariant violation, or a generic abort.
    pub fn run(&self) -> Result<()> {
        let span = job_span("run", self.shared.job_id);
        let _guard = span.enter();

        {
            let mut st = self.shared.lock_state();
            if st.started {
                return Err(Error::internal("scheduler already run"));
            }
            st.started = true;
            info!(tasks = st.records.len(), "executing job");
        }

        let outcome = self.drive();
        match &outcome {
            Ok(()) => info!("job finished"),
            Err(err) => warn!(error = %err, "job ended with error"),
        }
        (self.shared.done)(JobEvent::JobFinished(outcome.clone().err()));
        outcome
    }

    /// Requests an asynchronous abort, optionally recording the cause.
    ///
    /// In-flight tasks receive a best-effort `cancel()`; the driver
    /// exits after the next wakeup.
    pub fn abort(&self, error: Option<Error>) {
        self.handle().abort(error);
    }

    /// A point-in-time view of the scheduler's task and worker state.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.handle().snapshot()
    }

    // ------------------------------------------------------------------
    // Driver loop
    // ------------------------------------------------------------------

    fn drive(&self) -> Result<()> {
        // Classification happens once, under the lock; per-task events
        // for already-materialized tasks are delivered right after.
        let trivially_complete = {
            let mut st = self.shared.lock_state();
            let classified = st.classify();
            let pending = st.take_events();
            drop(st);
            self.emit_all(pending);
            classified?
        };
        if trivially_complete {
            return Ok(());
        }

        loop {
            let mut st = self.wait_for_work();

            if st.abort {
                return self.finish_aborted(st);
            }

            while let Some((task_id, worker)) = st.completions.pop_front() {
                if st.abort {
                    // Completions arriving alongside an abort are moot.
                    break;
                }
                if let Err(err) = st.handle_completion(task_id, worker) {
                    error!(error = %err, "unable to handle task completion");
                    st.record_abort(Some(err));
                    break;
                }
            }
            if st.abort {
                return self.finish_aborted(st);
            }

            let Some(worker) = st.workers_ready.pop_front() else {
                self.release_and_emit(st);
                continue;
            };

            if st.workers_failed.contains(&worker) {
                // The slot came back from a completion on a worker that
                // has since been declared dead; swallow it.
                self.release_and_emit(st);
                continue;
            }

            if st.executable.is_empty() && st.executing.is_empty() {
                info!(executed = st.executed.len(), "completed all tasks");
                self.release_and_emit(st);
                return Ok(());
            }

            let selected = match st.select_task(&worker) {
                Ok(selected) => selected,
                Err(err) => {
                    // Invariant violation inside selection is fatal for
                    // the run.
                    self.release_and_emit(st);
                    return Err(err);
                }
            };

            match selected {
                Some(task_id) => self.dispatch(&mut st, task_id, worker),
                None => {
                    debug!(worker = %worker, "no candidate task; parking worker idle");
                    st.workers_idle.insert(worker);
                }
            }

            self.release_and_emit(st);
        }
    }

    fn dispatch(&self, st: &mut State, task_id: TaskId, worker: WorkerName) {
        let task = match st.take_for_dispatch(task_id, &worker) {
            Ok(task) => task,
            Err(err) => {
                st.record_abort(Some(err));
                return;
            }
        };
        let Some(worker_handle) = st.workers.get(&worker).map(Arc::clone) else {
            st.record_abort(Some(Error::internal(format!(
                "ready slot for unregistered worker {worker}"
            ))));
            return;
        };

        let span = task_span("dispatch", self.shared.job_id, task_id);
        let _guard = span.enter();
        debug!(worker = %worker, "dispatching task");
        match task.execute(&worker_handle) {
            Ok(handle) => {
                let shared = Arc::clone(&self.shared);
                let callback_worker = worker.clone();
                let callback: Box<dyn FnOnce() + Send> = Box::new(move || {
                    let mut st = shared.lock_state();
                    st.completions.push_back((task_id, callback_worker));
                    shared.cond.notify_all();
                });
                if handle.on_complete(callback) == Registration::AlreadyCompleted {
                    // The execution raced registration; process the
                    // completion inline on the driver thread.
                    if let Err(err) = st.handle_completion(task_id, worker) {
                        st.record_abort(Some(err));
                    }
                }
            }
            Err(DispatchError::Cancelled) => {
                // The task stays in `executing`; its completion arrives
                // through the handle of the cancelled future.
                debug!(task = %task_id, "dispatch raised cancellation; absorbed");
            }
            Err(DispatchError::Failed { cause }) => {
                warn!(task = %task_id, worker = %worker, cause = cause.kind(),
                      "dispatch failed synchronously");
                task.mark_failed(cause);
                if let Err(err) = st.handle_completion(task_id, worker) {
                    st.record_abort(Some(err));
                }
            }
        }
    }

    fn wait_for_work(&self) -> MutexGuard<'_, State> {
        let guard = self.shared.lock_state();
        self.shared
            .cond
            .wait_while(guard, |st| {
                !st.abort && st.completions.is_empty() && st.workers_ready.is_empty()
            })
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_aborted(&self, mut st: MutexGuard<'_, State>) -> Result<()> {
        let cancelling: Vec<Arc<dyn Task>> = st
            .executing
            .iter()
            .filter_map(|task_id| st.records.get(task_id).map(|r| Arc::clone(&r.task)))
            .collect();
        let fatal = st.fatal.take();
        let pending = st.take_events();
        drop(st);

        info!(cancelling = cancelling.len(), "aborting job");
        for task in cancelling {
            task.cancel();
        }
        self.emit_all(pending);
        Err(fatal.unwrap_or(Error::Aborted))
    }

    fn release_and_emit(&self, mut st: MutexGuard<'_, State>) {
        let pending = st.take_events();
        drop(st);
        self.emit_all(pending);
    }

    fn emit_all(&self, events: Vec<JobEvent>) {
        for event in events {
            (self.shared.done)(event);
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("job_id", &self.shared.job_id)
            .finish_non_exhaustive()
    }
}

impl SchedulerHandle {
    /// The generated identifier of the job this handle controls.
    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.shared.job_id
    }

    /// Requests an asynchronous abort, optionally recording the cause.
    pub fn abort(&self, error: Option<Error>) {
        let mut st = self.shared.lock_state();
        st.record_abort(error);
        self.shared.cond.notify_all();
    }

    /// A point-in-time view of the scheduler's task and worker state.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let st = self.shared.lock_state();
        let statuses = st
            .order
            .iter()
            .map(|&task_id| (task_id, st.status_of(task_id)))
            .collect();
        SchedulerSnapshot {
            statuses,
            failures: st.failures.iter().map(|(&id, &n)| (id, n)).collect(),
            workers_failed: st.workers_failed.clone(),
        }
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("job_id", &self.shared.job_id)
            .finish_non_exhaustive()
    }
}
