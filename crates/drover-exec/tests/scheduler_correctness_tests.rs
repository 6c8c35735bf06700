//! End-to-end correctness scenarios for the scheduling driver: happy
//! paths, locality, forbidden workers, retries, dependency cascades,
//! worker loss, and abort.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use drover_core::{TaskId, WorkerName};
use drover_exec::context::{ExecContext, JobConfig, JobOptions};
use drover_exec::error::Error;
use drover_exec::failure::{DependencyFailure, FailureCause};
use drover_exec::scheduler::Scheduler;
use drover_exec::task::{Task, TaskStatus};
use drover_exec::testkit::{workers, EventLog, ScriptedTask};

fn worker_name(name: &str) -> WorkerName {
    WorkerName::new(name).unwrap()
}

#[test]
fn linear_chain_completes_in_dependency_order() {
    let (a, b, c) = (TaskId::generate(), TaskId::generate(), TaskId::generate());
    let ta = ScriptedTask::builder(a, 1).build();
    let tb = ScriptedTask::builder(b, 2).depends_on([a]).build();
    let tc = ScriptedTask::builder(c, 3).depends_on([b]).build();

    let ctx = ExecContext::new(workers(&["w1"]))
        .with_config(JobConfig::new(1, 3).unwrap());
    let log = EventLog::new();
    let tasks: Vec<Arc<dyn Task>> = vec![ta, tb, tc.clone()];
    let scheduler = Scheduler::new(&ctx, tasks, log.callback()).unwrap();

    scheduler.run().unwrap();

    assert_eq!(
        log.task_events(),
        vec![(a, false), (b, false), (c, false)]
    );
    assert_eq!(log.terminals().len(), 1);
    assert!(log.terminals()[0].is_none());

    let snapshot = scheduler.snapshot();
    for id in [a, b, c] {
        assert_eq!(snapshot.statuses[&id], TaskStatus::Executed);
    }
    assert_eq!(tc.executed_on(), vec![worker_name("w1")]);
}

#[test]
fn task_runs_on_its_preferred_worker_when_it_pops_first() {
    let (a, b) = (TaskId::generate(), TaskId::generate());
    let ta = ScriptedTask::builder(a, 1).locality("w1", 1).build();
    let tb = ScriptedTask::builder(b, 2).build();

    let ctx = ExecContext::new(workers(&["w1", "w2"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta.clone() as Arc<dyn Task>, tb.clone()],
        log.callback(),
    )
    .unwrap();

    scheduler.run().unwrap();

    // The slot FIFO is seeded in worker-name order, so w1 pops first
    // and takes its preferred task; w2 takes the remaining one.
    assert_eq!(ta.executed_on(), vec![worker_name("w1")]);
    assert_eq!(tb.executed_on(), vec![worker_name("w2")]);
}

#[test]
fn locality_preference_beats_priority_order() {
    let (a, b) = (TaskId::generate(), TaskId::generate());
    let ta = ScriptedTask::builder(a, 1).build();
    let tb = ScriptedTask::builder(b, 2).locality("w1", 2).build();

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta as Arc<dyn Task>, tb],
        log.callback(),
    )
    .unwrap();

    scheduler.run().unwrap();

    // b has worse priority but declared locality for the only worker,
    // so it is picked first from the affinity queue.
    assert_eq!(log.task_events(), vec![(b, false), (a, false)]);
}

#[test]
fn forbidden_worker_is_avoided() {
    let a = TaskId::generate();
    let ta = ScriptedTask::builder(a, 1).locality("w1", -1).build();

    let ctx = ExecContext::new(workers(&["w1", "w2"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta.clone() as Arc<dyn Task>],
        log.callback(),
    )
    .unwrap();

    scheduler.run().unwrap();
    assert_eq!(ta.executed_on(), vec![worker_name("w2")]);
}

#[test]
fn task_forbidding_every_worker_fails_the_run() {
    let a = TaskId::generate();
    let ta = ScriptedTask::builder(a, 1).locality("w1", -1).build();

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta as Arc<dyn Task>],
        log.callback(),
    )
    .unwrap();

    let result = scheduler.run();
    assert!(matches!(result, Err(Error::TaskUnplaceable { task_id }) if task_id == a));
    assert!(matches!(
        log.terminals().as_slice(),
        [Some(Error::TaskUnplaceable { .. })]
    ));
}

#[test]
fn generic_failures_retry_until_success() {
    let a = TaskId::generate();
    let ta = ScriptedTask::builder(a, 1)
        .then_fail(FailureCause::other("flaky io"))
        .then_fail(FailureCause::other("flaky io"))
        .build();

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::with_options(
        &ctx,
        vec![ta.clone() as Arc<dyn Task>],
        log.callback(),
        JobOptions::new().with_attempts(3),
    )
    .unwrap();

    scheduler.run().unwrap();

    // Two failed attempts bump the retry counter to 2, the third
    // succeeds; only the success produces a completion event.
    assert_eq!(ta.attempts(), 3);
    assert_eq!(scheduler.snapshot().failures[&a], 2);
    assert_eq!(log.task_events(), vec![(a, false)]);
    assert_eq!(log.terminals().len(), 1);
    assert!(log.terminals()[0].is_none());
}

#[test]
fn retry_exhaustion_aborts_with_task_event_then_terminal() {
    let a = TaskId::generate();
    let ta = ScriptedTask::builder(a, 1)
        .then_fail(FailureCause::other("disk full"))
        .then_fail(FailureCause::other("disk full"))
        .build();

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::with_options(
        &ctx,
        vec![ta.clone() as Arc<dyn Task>],
        log.callback(),
        JobOptions::new().with_attempts(2),
    )
    .unwrap();

    let result = scheduler.run();
    assert!(matches!(
        result,
        Err(Error::AttemptsExhausted { task_id, attempts: 2, .. }) if task_id == a
    ));

    // The terminally-failed task is surfaced as a task event (observing
    // the failure) and the terminal event repeats the error.
    assert_eq!(log.task_events(), vec![(a, true)]);
    assert!(matches!(
        log.terminals().as_slice(),
        [Some(Error::AttemptsExhausted { .. })]
    ));
    assert_eq!(ta.attempts(), 2);
}

#[test]
fn dependency_cascade_reexecutes_upstream_and_blocks_reporter() {
    let (a, b) = (TaskId::generate(), TaskId::generate());
    let ta = ScriptedTask::builder(a, 1).build();
    // b's first attempt reports a's output lost on w1.
    let tb = ScriptedTask::builder(b, 2)
        .depends_on([a])
        .then_fail(FailureCause::DependenciesFailed {
            failures: vec![DependencyFailure::on_worker(worker_name("w1"), [a])],
        })
        .build();

    let ctx = ExecContext::new(workers(&["w1", "w2"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta.clone() as Arc<dyn Task>, tb.clone()],
        log.callback(),
    )
    .unwrap();

    scheduler.run().unwrap();

    // a first runs on w1 (first slot in the FIFO). After the cascade,
    // w1 is declared dead and both tasks re-execute on w2.
    assert_eq!(
        log.task_events(),
        vec![(a, false), (a, false), (b, false)]
    );
    assert_eq!(ta.executed_on(), vec![worker_name("w1"), worker_name("w2")]);

    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.workers_failed.len(), 1);
    assert!(snapshot.workers_failed.contains(&worker_name("w1")));
    // Cascade failures never touch the generic retry counters.
    assert!(snapshot.failures.is_empty());
    assert_eq!(snapshot.statuses[&a], TaskStatus::Executed);
    assert_eq!(snapshot.statuses[&b], TaskStatus::Executed);
}

#[test]
fn stale_dependency_report_is_ignored() {
    let (a, b) = (TaskId::generate(), TaskId::generate());
    let ta = ScriptedTask::builder(a, 1).build();
    // The report names a worker that never executed a, so it is stale.
    let tb = ScriptedTask::builder(b, 2)
        .depends_on([a])
        .then_fail(FailureCause::DependenciesFailed {
            failures: vec![DependencyFailure::on_worker(worker_name("w9"), [a])],
        })
        .build();

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta.clone() as Arc<dyn Task>, tb.clone()],
        log.callback(),
    )
    .unwrap();

    scheduler.run().unwrap();

    // a is not re-executed; b is simply rescheduled and succeeds.
    assert_eq!(ta.attempts(), 1);
    assert_eq!(tb.attempts(), 2);
    assert_eq!(log.task_events(), vec![(a, false), (b, false)]);
    assert!(scheduler.snapshot().workers_failed.is_empty());
}

#[test]
fn unknown_task_in_dependency_report_aborts() {
    let (a, b) = (TaskId::generate(), TaskId::generate());
    let stranger = TaskId::generate();
    let ta = ScriptedTask::builder(a, 1).build();
    let tb = ScriptedTask::builder(b, 2)
        .depends_on([a])
        .then_fail(FailureCause::DependenciesFailed {
            failures: vec![DependencyFailure::unattributed([stranger])],
        })
        .build();

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta as Arc<dyn Task>, tb],
        log.callback(),
    )
    .unwrap();

    let result = scheduler.run();
    assert!(matches!(
        result,
        Err(Error::UnknownTaskInReport { task_id }) if task_id == stranger
    ));
}

#[test]
fn worker_loss_reschedules_without_charging_retries() {
    let a = TaskId::generate();
    let ta = ScriptedTask::builder(a, 1)
        .then_fail(FailureCause::NotConnected)
        .build();

    let ctx = ExecContext::new(workers(&["w1", "w2"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta.clone() as Arc<dyn Task>],
        log.callback(),
    )
    .unwrap();

    scheduler.run().unwrap();

    assert_eq!(ta.executed_on(), vec![worker_name("w1"), worker_name("w2")]);
    let snapshot = scheduler.snapshot();
    assert!(snapshot.workers_failed.contains(&worker_name("w1")));
    assert!(snapshot.failures.is_empty());
    assert_eq!(log.task_events(), vec![(a, false)]);
}

#[test]
fn losing_every_worker_aborts_the_job() {
    let a = TaskId::generate();
    let ta = ScriptedTask::builder(a, 1)
        .then_fail(FailureCause::NotConnected)
        .build();

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta as Arc<dyn Task>],
        log.callback(),
    )
    .unwrap();

    let result = scheduler.run();
    assert!(matches!(result, Err(Error::AllWorkersFailed)));
    assert!(matches!(
        log.terminals().as_slice(),
        [Some(Error::AllWorkersFailed)]
    ));
}

#[test]
fn synchronous_dispatch_rejection_is_retried() {
    let a = TaskId::generate();
    let ta = ScriptedTask::builder(a, 1)
        .then_reject_dispatch(FailureCause::other("transport queue full"))
        .build();

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::with_options(
        &ctx,
        vec![ta.clone() as Arc<dyn Task>],
        log.callback(),
        JobOptions::new().with_attempts(2),
    )
    .unwrap();

    scheduler.run().unwrap();

    assert_eq!(ta.attempts(), 2);
    assert_eq!(scheduler.snapshot().failures[&a], 1);
    assert_eq!(log.task_events(), vec![(a, false)]);
}

#[test]
fn completions_racing_registration_are_processed_inline() {
    let (a, b) = (TaskId::generate(), TaskId::generate());
    // Synchronous tasks complete before the handle is returned, forcing
    // the already-completed registration path for every dispatch.
    let ta = ScriptedTask::builder(a, 1).synchronous().build();
    let tb = ScriptedTask::builder(b, 2)
        .depends_on([a])
        .synchronous()
        .build();

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta as Arc<dyn Task>, tb],
        log.callback(),
    )
    .unwrap();

    scheduler.run().unwrap();
    assert_eq!(log.task_events(), vec![(a, false), (b, false)]);
}

#[test]
fn materialized_tasks_are_skipped() {
    let (a, b) = (TaskId::generate(), TaskId::generate());
    let ta = ScriptedTask::builder(a, 1).stopped_on("w1").build();
    let tb = ScriptedTask::builder(b, 2).depends_on([a]).build();

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta.clone() as Arc<dyn Task>, tb.clone()],
        log.callback(),
    )
    .unwrap();

    scheduler.run().unwrap();

    // a is reported done without executing; b runs normally.
    assert_eq!(ta.attempts(), 0);
    assert_eq!(tb.attempts(), 1);
    assert_eq!(log.task_events(), vec![(a, false), (b, false)]);
}

#[test]
fn fully_materialized_job_completes_trivially() {
    let (a, b) = (TaskId::generate(), TaskId::generate());
    let tasks: Vec<Arc<dyn Task>> = vec![
        ScriptedTask::builder(a, 1).stopped_on("w1").build(),
        ScriptedTask::builder(b, 2).stopped_on("w1").build(),
    ];

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(&ctx, tasks, log.callback()).unwrap();

    scheduler.run().unwrap();
    assert_eq!(log.task_events(), vec![(a, false), (b, false)]);
    assert_eq!(log.terminals().len(), 1);
    assert!(log.terminals()[0].is_none());
}

#[test]
fn cyclic_input_has_no_entry_points() {
    let (a, b) = (TaskId::generate(), TaskId::generate());
    let tasks: Vec<Arc<dyn Task>> = vec![
        ScriptedTask::builder(a, 1).depends_on([b]).build(),
        ScriptedTask::builder(b, 2).depends_on([a]).build(),
    ];

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(&ctx, tasks, log.callback()).unwrap();

    let result = scheduler.run();
    assert!(matches!(result, Err(Error::NoEntryPoints)));
    assert!(matches!(
        log.terminals().as_slice(),
        [Some(Error::NoEntryPoints)]
    ));
}

#[test]
fn abort_cancels_in_flight_tasks() {
    let a = TaskId::generate();
    let (dispatched_tx, dispatched_rx) = mpsc::channel();
    let ta = ScriptedTask::builder(a, 1)
        .then_hang()
        .notify_dispatch(dispatched_tx)
        .build();

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta.clone() as Arc<dyn Task>],
        log.callback(),
    )
    .unwrap();

    let handle = scheduler.handle();
    let driver = thread::spawn(move || scheduler.run());

    // Wait until the hanging task is actually in flight, then abort.
    dispatched_rx.recv().unwrap();
    handle.abort(None);

    let result = driver.join().unwrap();
    assert!(matches!(result, Err(Error::Aborted)));
    assert!(ta.was_cancelled());
    assert!(matches!(
        log.terminals().as_slice(),
        [Some(Error::Aborted)]
    ));
}

#[test]
fn abort_with_cause_reports_that_cause() {
    let a = TaskId::generate();
    let (dispatched_tx, dispatched_rx) = mpsc::channel();
    let ta = ScriptedTask::builder(a, 1)
        .then_hang()
        .notify_dispatch(dispatched_tx)
        .build();

    let ctx = ExecContext::new(workers(&["w1"]));
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta as Arc<dyn Task>],
        log.callback(),
    )
    .unwrap();

    let handle = scheduler.handle();
    let driver = thread::spawn(move || scheduler.run());

    dispatched_rx.recv().unwrap();
    handle.abort(Some(Error::internal("operator requested shutdown")));

    let result = driver.join().unwrap();
    assert!(matches!(result, Err(Error::Internal { .. })));
}

#[test]
fn per_worker_concurrency_allows_parallel_dispatch() {
    // Two independent tasks, one worker with two slots: both must be
    // dispatched without waiting on each other's completion.
    let (a, b) = (TaskId::generate(), TaskId::generate());
    let (tx, rx) = mpsc::channel();
    let ta = ScriptedTask::builder(a, 1)
        .notify_dispatch(tx.clone())
        .then_hang()
        .build();
    let tb = ScriptedTask::builder(b, 2)
        .notify_dispatch(tx)
        .then_hang()
        .build();

    let ctx = ExecContext::new(workers(&["w1"]))
        .with_config(JobConfig::new(2, 1).unwrap());
    let log = EventLog::new();
    let scheduler = Scheduler::new(
        &ctx,
        vec![ta as Arc<dyn Task>, tb],
        log.callback(),
    )
    .unwrap();

    let handle = scheduler.handle();
    let driver = thread::spawn(move || scheduler.run());

    // Both tasks get dispatched while neither has completed.
    let first = dispatched(&rx);
    let second = dispatched(&rx);
    assert_eq!(
        {
            let mut pair = vec![first, second];
            pair.sort();
            pair
        },
        {
            let mut pair = vec![a, b];
            pair.sort();
            pair
        }
    );

    handle.abort(None);
    let _ = driver.join().unwrap();
}

fn dispatched(rx: &mpsc::Receiver<TaskId>) -> TaskId {
    rx.recv_timeout(std::time::Duration::from_secs(10))
        .expect("task was not dispatched in time")
}
