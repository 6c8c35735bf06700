//! Guarded scheduler state: task containers, worker-slot accounting, the
//! readiness tracker, the assignment engine, and the failure resolver.
//!
//! Everything in this module runs on the driver thread under the
//! scheduler's single mutex; completion callbacks only append to
//! [`State::completions`] and wake the condition variable. That keeps
//! every mutation serialized without a reentrant lock, and lets the
//! failure resolver recurse on `&mut State` directly.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use drover_core::{TaskId, WorkerName};

use crate::error::{Error, Result};
use crate::events::JobEvent;
use crate::failure::FailureCause;
use crate::metrics::SchedulerMetrics;
use crate::task::{Task, TaskStatus};
use crate::worker::Worker;

/// Sort key for the executable queue: ascending priority, task id as the
/// stable tie-break.
pub(crate) type PriorityKey = (i32, TaskId);

/// Sort key for a worker's affinity queue: descending locality score,
/// then ascending priority, then task id.
pub(crate) type AffinityKey = (Reverse<i32>, i32, TaskId);

/// Immutable per-task record: the task handle plus its id-level DAG
/// adjacency, fixed at construction.
pub(crate) struct TaskRecord {
    pub(crate) task: Arc<dyn Task>,
    pub(crate) priority: i32,
    pub(crate) dependencies: BTreeSet<TaskId>,
    pub(crate) dependents: BTreeSet<TaskId>,
}

/// A completion record pushed by an execution callback, drained by the
/// driver.
pub(crate) type CompletionRecord = (TaskId, WorkerName);

/// The scheduler's mutable state, guarded by the scheduler mutex.
pub(crate) struct State {
    /// Task records keyed by id; fixed after construction.
    pub(crate) records: HashMap<TaskId, TaskRecord>,
    /// Task ids in ascending `(priority, id)` order.
    pub(crate) order: Vec<TaskId>,

    /// Tasks eligible to run now, in priority order.
    pub(crate) executable: BTreeSet<PriorityKey>,
    /// Still-unfinished dependencies per task. A task is blocked iff its
    /// entry is non-empty.
    pub(crate) blocked: HashMap<TaskId, BTreeSet<TaskId>>,
    /// Tasks currently dispatched.
    pub(crate) executing: BTreeSet<TaskId>,
    /// Tasks successfully completed.
    pub(crate) executed: BTreeSet<TaskId>,
    /// Generic-failure retry counters.
    pub(crate) failures: HashMap<TaskId, usize>,

    /// Positive locality scores: worker -> task -> score.
    pub(crate) locality: HashMap<WorkerName, HashMap<TaskId, i32>>,
    /// Workers each task must not execute on.
    pub(crate) forbidden: HashMap<TaskId, BTreeSet<WorkerName>>,
    /// Per-worker queues of executable tasks with declared locality.
    pub(crate) executable_on: HashMap<WorkerName, BTreeSet<AffinityKey>>,

    /// Registered workers by name.
    pub(crate) workers: BTreeMap<WorkerName, Arc<dyn Worker>>,
    /// FIFO of dispatch slots; each worker contributes `concurrency`
    /// slots while it has candidate work.
    pub(crate) workers_ready: VecDeque<WorkerName>,
    /// Workers parked because no candidate task applied to them.
    pub(crate) workers_idle: BTreeSet<WorkerName>,
    /// Workers declared dead; monotonic for the run.
    pub(crate) workers_failed: BTreeSet<WorkerName>,

    /// Completions awaiting the driver.
    pub(crate) completions: VecDeque<CompletionRecord>,
    /// Abort requested.
    pub(crate) abort: bool,
    /// First fatal error recorded, if any.
    pub(crate) fatal: Option<Error>,
    /// `run()` was entered.
    pub(crate) started: bool,

    /// User events staged under the lock, delivered by the driver after
    /// releasing it.
    events: Vec<JobEvent>,

    pub(crate) concurrency: usize,
    pub(crate) attempts: usize,
    pub(crate) metrics: SchedulerMetrics,
}

impl State {
    pub(crate) fn new(
        records: HashMap<TaskId, TaskRecord>,
        order: Vec<TaskId>,
        workers: BTreeMap<WorkerName, Arc<dyn Worker>>,
        concurrency: usize,
        attempts: usize,
        metrics: SchedulerMetrics,
    ) -> Self {
        let workers_idle = workers.keys().cloned().collect();
        let executable_on = workers
            .keys()
            .map(|name| (name.clone(), BTreeSet::new()))
            .collect();
        Self {
            records,
            order,
            executable: BTreeSet::new(),
            blocked: HashMap::new(),
            executing: BTreeSet::new(),
            executed: BTreeSet::new(),
            failures: HashMap::new(),
            locality: HashMap::new(),
            forbidden: HashMap::new(),
            executable_on,
            workers,
            workers_ready: VecDeque::new(),
            workers_idle,
            workers_failed: BTreeSet::new(),
            completions: VecDeque::new(),
            abort: false,
            fatal: None,
            started: false,
            events: Vec::new(),
            concurrency,
            attempts,
            metrics,
        }
    }

    fn record(&self, task_id: TaskId) -> Result<&TaskRecord> {
        self.records.get(&task_id).ok_or_else(|| {
            Error::internal(format!("no record for task {task_id}"))
        })
    }

    fn priority_key(&self, task_id: TaskId) -> Result<PriorityKey> {
        Ok((self.record(task_id)?.priority, task_id))
    }

    fn is_blocked(&self, task_id: TaskId) -> bool {
        self.blocked
            .get(&task_id)
            .is_some_and(|deps| !deps.is_empty())
    }

    /// Stages a user event for delivery once the lock is released.
    pub(crate) fn stage_event(&mut self, event: JobEvent) {
        self.events.push(event);
    }

    /// Takes the staged user events.
    pub(crate) fn take_events(&mut self) -> Vec<JobEvent> {
        std::mem::take(&mut self.events)
    }

    /// Records an abort request, keeping the first fatal error.
    pub(crate) fn record_abort(&mut self, error: Option<Error>) {
        if let Some(error) = error {
            if self.fatal.is_none() {
                self.fatal = Some(error);
            }
        }
        self.abort = true;
    }

    /// The observable status of a task.
    pub(crate) fn status_of(&self, task_id: TaskId) -> TaskStatus {
        if self.executing.contains(&task_id) {
            TaskStatus::Executing
        } else if self.executed.contains(&task_id) {
            TaskStatus::Executed
        } else if self
            .records
            .get(&task_id)
            .is_some_and(|r| self.executable.contains(&(r.priority, task_id)))
        {
            TaskStatus::Executable
        } else if self.is_blocked(task_id) {
            TaskStatus::Blocked
        } else {
            TaskStatus::Failed
        }
    }

    // ------------------------------------------------------------------
    // Classification
    // ------------------------------------------------------------------

    /// One-time classification pass over every registered task: records
    /// locality and forbidden sets, marks materialized tasks executed,
    /// and partitions the rest into blocked and executable.
    ///
    /// Returns `true` when every task was already materialized and the
    /// job is trivially complete.
    pub(crate) fn classify(&mut self) -> Result<bool> {
        debug!("calculating which tasks are executable, which are blocked and locality");

        let worker_handles: Vec<Arc<dyn Worker>> = self.workers.values().cloned().collect();
        let order = self.order.clone();

        for task_id in order {
            let task = Arc::clone(&self.record(task_id)?.task);

            for (name, score) in task.locality(&worker_handles) {
                if !self.workers.contains_key(&name) {
                    debug!(task = %task_id, worker = %name, "ignoring locality for unknown worker");
                    continue;
                }
                if score < 0 {
                    self.forbidden.entry(task_id).or_default().insert(name);
                } else if score > 0 {
                    self.locality
                        .entry(name)
                        .or_default()
                        .insert(task_id, score);
                }
            }

            if let Some(worker) = task.stopped_on() {
                debug!(task = %task_id, worker = %worker, "task already materialized");
                self.executed.insert(task_id);
                self.stage_event(JobEvent::TaskCompleted(task));
            } else {
                let unfinished: BTreeSet<TaskId> = self
                    .record(task_id)?
                    .dependencies
                    .iter()
                    .filter(|dep| {
                        self.records
                            .get(*dep)
                            .is_some_and(|r| r.task.stopped_on().is_none())
                    })
                    .copied()
                    .collect();
                if unfinished.is_empty() {
                    self.set_executable(task_id)?;
                } else {
                    self.blocked.insert(task_id, unfinished);
                }
            }
        }

        if self.executable.is_empty() {
            if self.executed.len() == self.records.len() {
                info!("every task is already materialized; job trivially complete");
                return Ok(true);
            }
            return Err(Error::NoEntryPoints);
        }
        if self.workers_ready.is_empty() {
            return Err(Error::NoUsableWorkers);
        }

        info!(
            executable = self.executable.len(),
            blocked = self.blocked.values().filter(|b| !b.is_empty()).count(),
            ready_slots = self.workers_ready.len(),
            "classified tasks"
        );
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Readiness tracker
    // ------------------------------------------------------------------

    /// Promotes a task into the executable queue and refreshes worker
    /// availability for it.
    ///
    /// Idempotent: no-ops when the task is already executable, executing
    /// or executed.
    pub(crate) fn set_executable(&mut self, task_id: TaskId) -> Result<()> {
        let key = self.priority_key(task_id)?;
        if self.executable.contains(&key)
            || self.executing.contains(&task_id)
            || self.executed.contains(&task_id)
        {
            return Ok(());
        }

        // Stale membership cleared when a previously-executed task is
        // demoted and re-promoted by the failure resolver.
        self.executed.remove(&task_id);

        let names: Vec<WorkerName> = self.workers.keys().cloned().collect();
        for name in names {
            if self.workers_failed.contains(&name) {
                continue;
            }
            if self
                .forbidden
                .get(&task_id)
                .is_some_and(|set| set.contains(&name))
            {
                continue;
            }
            let score = self
                .locality
                .get(&name)
                .and_then(|scores| scores.get(&task_id))
                .copied()
                .unwrap_or(0);

            // The worker now has a candidate task; give it back its
            // dispatch slots if it was parked.
            if self.workers_idle.remove(&name) {
                for _ in 0..self.concurrency {
                    self.workers_ready.push_back(name.clone());
                }
            }

            if score > 0 {
                if let Some(queue) = self.executable_on.get_mut(&name) {
                    queue.insert((Reverse(score), key.0, task_id));
                }
            }
        }

        if self
            .forbidden
            .get(&task_id)
            .map_or(0, BTreeSet::len)
            == self.workers.len()
        {
            return Err(Error::TaskUnplaceable { task_id });
        }

        self.executable.insert(key);
        self.metrics.set_executable_depth(self.executable.len());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Assignment engine
    // ------------------------------------------------------------------

    /// Chooses a task for the given worker, preferring declared locality
    /// and falling back to the first permitted task in priority order.
    pub(crate) fn select_task(&mut self, worker: &WorkerName) -> Result<Option<TaskId>> {
        if self.executable.is_empty() {
            return Ok(None);
        }

        let candidates: Vec<AffinityKey> = self
            .executable_on
            .get(worker)
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default();

        for key in candidates {
            let (_, priority, task_id) = key;
            if self.executing.contains(&task_id) || self.executed.contains(&task_id) {
                // Serviced elsewhere; drop the stale preference entry.
                if let Some(queue) = self.executable_on.get_mut(worker) {
                    queue.remove(&key);
                }
            } else if self.executable.contains(&(priority, task_id)) {
                return Ok(Some(task_id));
            } else if self.is_blocked(task_id) {
                // May become executable again later; leave it in place.
            } else {
                return Err(Error::internal(format!(
                    "task {task_id} in no tracked set during selection for {worker}"
                )));
            }
        }

        for &(_, task_id) in &self.executable {
            let allowed = !self
                .forbidden
                .get(&task_id)
                .is_some_and(|set| set.contains(worker));
            if allowed {
                return Ok(Some(task_id));
            }
        }

        Ok(None)
    }

    /// Removes a task from the executable queue and the worker's
    /// affinity queue on dispatch.
    pub(crate) fn take_for_dispatch(
        &mut self,
        task_id: TaskId,
        worker: &WorkerName,
    ) -> Result<Arc<dyn Task>> {
        let key = self.priority_key(task_id)?;
        self.executable.remove(&key);
        if let Some(score) = self
            .locality
            .get(worker)
            .and_then(|scores| scores.get(&task_id))
            .copied()
        {
            if let Some(queue) = self.executable_on.get_mut(worker) {
                queue.remove(&(Reverse(score), key.0, task_id));
            }
        }
        self.executing.insert(task_id);
        self.metrics.set_executable_depth(self.executable.len());
        self.metrics.set_executing_depth(self.executing.len());
        self.metrics.record_dispatch();
        Ok(Arc::clone(&self.record(task_id)?.task))
    }

    // ------------------------------------------------------------------
    // Completion handling
    // ------------------------------------------------------------------

    /// Processes one task completion: settles readiness, delegates
    /// failures to the resolver, and returns the worker slot to the FIFO.
    pub(crate) fn handle_completion(
        &mut self,
        task_id: TaskId,
        worker: WorkerName,
    ) -> Result<()> {
        self.executing.remove(&task_id);
        self.metrics.set_executing_depth(self.executing.len());

        let task = Arc::clone(&self.record(task_id)?.task);
        if task.failed() {
            self.metrics.record_completion("failure");
            self.task_failed(task_id)?;
        } else {
            debug!(task = %task_id, worker = %worker, "task completed");
            self.metrics.record_completion("success");
            self.executed.insert(task_id);
            self.stage_event(JobEvent::TaskCompleted(task));

            let dependents = self.record(task_id)?.dependents.clone();
            for dependent in dependents {
                let blocked_by = self.blocked.entry(dependent).or_default();
                blocked_by.remove(&task_id);
                if blocked_by.is_empty() {
                    self.set_executable(dependent)?;
                }
            }
        }

        self.workers_ready.push_back(worker);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Failure resolver
    // ------------------------------------------------------------------

    /// Classifies a task failure and mutates readiness and worker health
    /// accordingly.
    ///
    /// Recurses for dependency cascades; the depth is bounded by the DAG
    /// depth touched by one failure report, and the synthetic
    /// [`FailureCause::FailedDependency`] marker terminates recursion.
    pub(crate) fn task_failed(&mut self, task_id: TaskId) -> Result<()> {
        let key = self.priority_key(task_id)?;
        if self.executable.contains(&key)
            || self.executing.contains(&task_id)
            || self.is_blocked(task_id)
        {
            debug!(task = %task_id, "failure already handled; task rescheduled");
            return Ok(());
        }

        self.executed.remove(&task_id);

        let task = Arc::clone(&self.record(task_id)?.task);
        let dependents = self.record(task_id)?.dependents.clone();
        for dependent in dependents {
            self.blocked.entry(dependent).or_default().insert(task_id);
        }

        let cause = task
            .exception()
            .unwrap_or_else(|| FailureCause::other("task failed without a recorded cause"));
        let cause_kind = cause.kind();
        info!(
            task = %task_id,
            worker = task.executed_on_last().as_ref().map(WorkerName::as_str),
            cause = cause_kind,
            "task failed"
        );

        match &cause {
            FailureCause::DependenciesFailed { failures } => {
                for report in failures {
                    for &dep_id in &report.tasks {
                        let Some(dep_record) = self.records.get(&dep_id) else {
                            error!(task = %dep_id, "dependency failure reported for unknown task");
                            self.record_abort(Some(Error::UnknownTaskInReport {
                                task_id: dep_id,
                            }));
                            return Ok(());
                        };
                        let dep_task = Arc::clone(&dep_record.task);
                        let last = dep_task.executed_on_last();

                        let attributable = match &report.executor {
                            None => true,
                            Some(executor) => last.as_ref() == Some(executor),
                        };
                        if attributable {
                            info!(
                                dependency = %dep_id,
                                executor = report.executor.as_ref().map(WorkerName::as_str),
                                "cascading failure to dependency"
                            );
                            dep_task.mark_failed(FailureCause::failed_dependency(task_id));
                            self.task_failed(dep_id)?;
                        } else {
                            // The dependency was re-executed elsewhere
                            // since the reporter observed the loss.
                            info!(
                                dependency = %dep_id,
                                reported = report.executor.as_ref().map(WorkerName::as_str),
                                last_executed = last.as_ref().map(WorkerName::as_str),
                                "stale dependency-failure report; ignoring"
                            );
                        }
                    }
                }
            }

            FailureCause::FailedDependency { .. } => {
                if let Some(worker) = task.executed_on_last() {
                    self.mark_worker_failed(&worker);
                    self.workers_idle.remove(&worker);
                }
            }

            FailureCause::NotConnected => {
                if let Some(worker) = task.executed_on_last() {
                    self.mark_worker_failed(&worker);
                }
            }

            FailureCause::Other { .. } => {
                let count = self.failures.entry(task_id).or_insert(0);
                *count += 1;
                let count = *count;
                if count >= self.attempts {
                    warn!(
                        task = %task_id,
                        failures = count,
                        executions = task.executed_on().len(),
                        last_worker = task.executed_on_last().as_ref().map(WorkerName::as_str),
                        "task failed too often; aborting"
                    );
                    self.stage_event(JobEvent::TaskCompleted(Arc::clone(&task)));
                    self.record_abort(Some(Error::AttemptsExhausted {
                        task_id,
                        attempts: self.attempts,
                        cause: cause.clone(),
                    }));
                    return Ok(());
                }
            }
        }

        if self.workers_failed.len() == self.workers.len() {
            self.record_abort(Some(Error::AllWorkersFailed));
            return Ok(());
        }

        if !self.executable.contains(&key)
            && !self.executing.contains(&task_id)
            && !self.is_blocked(task_id)
        {
            info!(task = %task_id, "rescheduling failed task");
            self.metrics.record_retry(cause_kind);
            self.set_executable(task_id)?;
        }
        Ok(())
    }

    fn mark_worker_failed(&mut self, worker: &WorkerName) {
        if self.workers_failed.insert(worker.clone()) {
            info!(worker = %worker, "marking worker as failed");
            self.metrics.record_worker_failed();
        }
    }
}
