//! Contract tests for registration, futures and conflict reporting
//!
//! These tests pin the error surface: every misuse is reported to the
//! caller with no task state changed, and a shared task can only ever
//! be active in one bind at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use taxis::prelude::*;
use taxis::{FutureError, SchedError};

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    check()
}

#[test]
fn reg_rejects_duplicate_ids() {
    let sched = Scheduler::new(Arc::new(Pool::new(1)));
    let a = Task::new("same", || ());
    let b = Task::new("same", || ());

    sched.reg(&a).unwrap();
    assert!(matches!(
        sched.reg(&b).unwrap_err(),
        SchedError::AlreadyRegistered { .. }
    ));
    // The impostor is not registered; only the original can unregister.
    assert!(matches!(
        sched.unreg(&b).unwrap_err(),
        SchedError::NotRegistered { .. }
    ));
    sched.unreg(&a).unwrap();
}

#[test]
fn reg_then_unreg_leaves_the_graph_unchanged() {
    let sched = Scheduler::new(Arc::new(Pool::new(1)));
    let task = Task::new("fleeting", || ());
    let id = task.id();

    assert!(!sched.registered(&id));
    sched.reg(&task).unwrap();
    assert!(sched.registered(&id));
    sched.unreg(&task).unwrap();
    assert!(!sched.registered(&id));

    // And the task is configurable again.
    task.deps().unwrap().add_id("anything").unwrap();
    task.set_id("renamed").unwrap();
}

#[test]
fn enqueue_of_unregistered_task_fails() {
    let sched = Scheduler::new(Arc::new(Pool::new(1)));
    let task = Task::new("stranger", || ());
    assert!(matches!(
        sched.enqueue(&task).unwrap_err(),
        SchedError::NotRegistered { .. }
    ));
    assert_eq!(task.state(), TaskState::Idle);
}

#[test]
fn structural_mutation_requires_unregistered() {
    let sched = Scheduler::new(Arc::new(Pool::new(1)));
    let task = Task::new("frozen", || ());
    sched.reg(&task).unwrap();

    assert!(matches!(
        task.deps().unwrap_err(),
        SchedError::Registered { .. }
    ));
    assert!(matches!(
        task.set_id("other").unwrap_err(),
        SchedError::Registered { .. }
    ));

    sched.unreg(&task).unwrap();
    task.deps().unwrap().add_id("upstream").unwrap();
}

#[test]
fn self_dependency_is_rejected_at_declaration() {
    let task = Task::new("narcissus", || ());
    assert!(matches!(
        task.deps().unwrap().add_id("narcissus").unwrap_err(),
        SchedError::SelfDependency { .. }
    ));
}

#[test]
fn future_is_retrievable_once_per_execution() {
    let sched = Scheduler::new(Arc::new(Pool::new(1)));
    let task = Task::new("once", || 1);
    sched.reg(&task).unwrap();

    let future = task.future().unwrap();
    assert_eq!(task.future().unwrap_err(), FutureError::AlreadyRetrieved);

    sched.enqueue(&task).unwrap();
    assert_eq!(future.get().unwrap(), 1);

    // A fresh execution arms a fresh future.
    let second = task.future().unwrap();
    sched.enqueue(&task).unwrap();
    assert_eq!(second.get().unwrap(), 1);
}

#[test]
fn interrupt_before_execution_is_a_no_op() {
    let sched = Scheduler::new(Arc::new(Pool::new(1)));
    let task = Task::new("calm", || 42);
    sched.reg(&task).unwrap();

    // Idle: nothing to interrupt, nothing remembered.
    task.interrupt("too early");
    assert!(!task.interrupt_requested());

    let future = task.future().unwrap();
    sched.enqueue(&task).unwrap();
    assert_eq!(future.get().unwrap(), 42);
}

#[test]
fn priority_is_stored_and_observable() {
    let task: Arc<Task<()>> = Task::new("nice", || ());
    assert_eq!(task.priority(), Priority::NORMAL);
    task.set_priority(Priority::new(7));
    assert_eq!(task.priority(), Priority::new(7));
    task.set_priority(Priority::NORMAL);
}

/// Holds a task in `Executing` until released, so tests can observe
/// conflict errors deterministically.
struct Gate {
    started: Arc<AtomicBool>,
    release: Arc<AtomicBool>,
}

impl Gate {
    fn new() -> Self {
        Self {
            started: Arc::new(AtomicBool::new(false)),
            release: Arc::new(AtomicBool::new(false)),
        }
    }

    fn functor(&self) -> impl FnMut() + Send + 'static {
        let started = self.started.clone();
        let release = self.release.clone();
        move || {
            started.store(true, Ordering::SeqCst);
            while !release.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    fn wait_started(&self) {
        assert!(wait_until(Duration::from_secs(5), || {
            self.started.load(Ordering::SeqCst)
        }));
    }

    fn open(&self) {
        self.release.store(true, Ordering::SeqCst);
    }
}

#[test]
fn active_tasks_conflict_across_binds_and_schedulers() {
    let pool = Arc::new(Pool::new(4));
    let first = Scheduler::new(pool.clone());
    let second = Scheduler::new(pool);

    let gate = Gate::new();
    let shared = Task::new("shared", gate.functor());
    let first_root = Task::new("first-root", || ());
    let second_root = Task::new("second-root", || ());
    first_root.deps().unwrap().add(&*shared).unwrap();
    second_root.deps().unwrap().add(&*shared).unwrap();

    first.reg(&shared).unwrap();
    first.reg(&first_root).unwrap();
    second.reg(&shared).unwrap();
    second.reg(&second_root).unwrap();

    let future = first_root.future().unwrap();
    first.enqueue(&first_root).unwrap();
    gate.wait_started();

    // The shared task is executing in the first scheduler's bind.
    assert!(matches!(
        second.enqueue(&second_root).unwrap_err(),
        SchedError::ForeignSchedulerConflict { .. }
    ));
    assert!(matches!(
        second.enqueue(&shared).unwrap_err(),
        SchedError::TaskActive { .. }
    ));
    assert!(matches!(
        first.enqueue(&first_root).unwrap_err(),
        SchedError::TaskActive { .. }
    ));
    assert!(matches!(
        first.unreg(&shared).unwrap_err(),
        SchedError::TaskActive { .. }
    ));
    assert_eq!(second_root.state(), TaskState::Idle);

    gate.open();
    future.get().unwrap();

    // Once idle, the same subgraph binds fine in the other scheduler.
    let future = second_root.future().unwrap();
    second.enqueue(&second_root).unwrap();
    future.get().unwrap();
}

#[test]
fn a_task_can_run_in_two_schedulers_sequentially() {
    let pool = Arc::new(Pool::new(2));
    let first = Scheduler::new(pool.clone());
    let second = Scheduler::new(pool);

    let task = Task::new("traveler", || ());
    first.reg(&task).unwrap();
    second.reg(&task).unwrap();

    let future = task.future().unwrap();
    first.enqueue(&task).unwrap();
    future.get().unwrap();

    let future = task.future().unwrap();
    second.enqueue(&task).unwrap();
    future.get().unwrap();
}
