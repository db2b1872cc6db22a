//! Tasks and their execution state machine
//!
//! A [`Task`] is an addressable, re-armable unit of work: a functor, an
//! id, a set of declared upstream dependencies, and the bookkeeping the
//! scheduler stamps onto it when a subgraph is bound. Tasks are
//! shared-owned by their users (`Arc`); a registered task is also held
//! by the scheduler's graph, and everything the task points back at
//! (scheduler, root) is weak, so no ownership cycles form.
//!
//! # State machine
//!
//! ```text
//! Idle --bind--> WaitUpstream --dep_up==0--> Queued --worker--> Executing
//!      --functor done--> WaitDownstream --dep_down==0--> Idle
//! ```
//!
//! Each transition is a single atomic compare-exchange with
//! acquire/release ordering and emits a trace record when tracing is
//! enabled. A transition from an unexpected state is a bug in the
//! scheduler, not in user code, and panics.
//!
//! # Completion protocol
//!
//! On entering `WaitDownstream` a task decrements each bound upstream
//! neighbor's `dep_down`; the decrement that reaches zero finalizes
//! that neighbor (its result publishes, it returns to `Idle`). It then
//! decrements each bound downstream neighbor's `dep_up`; the decrement
//! that reaches zero submits that neighbor to the pool. The root
//! carries one extra `dep_down` count for itself, so it finalizes last:
//! an observer that sees the root's future resolved may conclude the
//! whole bound subgraph is idle.

use crate::future::{FutureError, PackagedCall, TaskFailure, TaskFuture};
use crate::graph::{FxIndexSet, TaskId};
use crate::pool::{current_worker, PoolTask, Priority, WorkerHandle};
use crate::trace;

use super::error::{SchedError, SchedResult};
use super::scheduler::SchedShared;

use parking_lot::{Mutex, MutexGuard};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Execution state of a task, observable from any thread.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not part of any active bind
    Idle = 0,
    /// Ready, waiting for a worker
    Queued = 1,
    /// Bound, waiting for upstream prerequisites
    WaitUpstream = 2,
    /// Functor running on a worker
    Executing = 3,
    /// Functor done, waiting for downstream dependents
    WaitDownstream = 4,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Queued,
            2 => Self::WaitUpstream,
            3 => Self::Executing,
            4 => Self::WaitDownstream,
            _ => unreachable!("corrupt task state value {value}"),
        }
    }
}

/// Per-bind bookkeeping stamped onto every task of a bound subgraph.
///
/// The neighbor snapshots let the completion protocol run without the
/// scheduler lock; the weak references cannot dangle while the tasks
/// stay registered (the graph holds them), and a dropped neighbor is
/// simply skipped.
#[derive(Clone)]
pub(crate) struct Binding {
    pub(crate) bind_id: u64,
    pub(crate) sched: Weak<SchedShared>,
    pub(crate) root: Weak<dyn ScheduledTask>,
    pub(crate) upstream: Vec<Weak<dyn ScheduledTask>>,
    pub(crate) downstream: Vec<Weak<dyn ScheduledTask>>,
}

/// Mutable task state guarded by the task's own lock.
pub(crate) struct CoreMut {
    pub(crate) deps: FxIndexSet<TaskId>,
    pub(crate) reg_count: u32,
    pub(crate) binding: Option<Binding>,
    pub(crate) dep_up_init: usize,
    pub(crate) dep_down_init: usize,
    pub(crate) bind_dirty: bool,
    pub(crate) poison: Option<TaskFailure>,
    thread: Option<WorkerHandle>,
    priority: Priority,
}

/// Result-type-independent task state: id, state machine, counters and
/// the erased self-handles the scheduler and pool work with.
///
/// Exposed only through `#[doc(hidden)]` trait plumbing; there is no
/// public API on this type.
pub struct TaskCore {
    id: Mutex<TaskId>,
    state: AtomicU8,
    pub(crate) dep_up: AtomicUsize,
    pub(crate) dep_down: AtomicUsize,
    pub(crate) lock: Mutex<CoreMut>,
    self_sched: Weak<dyn ScheduledTask>,
    self_pool: Weak<dyn PoolTask>,
}

impl TaskCore {
    fn new(id: TaskId, self_sched: Weak<dyn ScheduledTask>, self_pool: Weak<dyn PoolTask>) -> Self {
        Self {
            id: Mutex::new(id),
            state: AtomicU8::new(TaskState::Idle as u8),
            dep_up: AtomicUsize::new(0),
            dep_down: AtomicUsize::new(0),
            lock: Mutex::new(CoreMut {
                deps: FxIndexSet::default(),
                reg_count: 0,
                binding: None,
                dep_up_init: 0,
                dep_down_init: 0,
                bind_dirty: true,
                poison: None,
                thread: None,
                priority: Priority::NORMAL,
            }),
            self_sched,
            self_pool,
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id.lock().clone()
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Erased strong handle to the owning task. The task is alive
    /// whenever this is reachable, so the upgrade cannot fail.
    pub(crate) fn self_handle(&self) -> Arc<dyn ScheduledTask> {
        self.self_sched
            .upgrade()
            .expect("task dropped while its core was in use")
    }

    pub(crate) fn pool_handle(&self) -> Arc<dyn PoolTask> {
        self.self_pool
            .upgrade()
            .expect("task dropped while its core was in use")
    }

    /// Attempts one state-machine step; emits a trace record on
    /// success.
    pub(crate) fn try_transition(&self, from: TaskState, to: TaskState) -> bool {
        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            trace::transition(&self.id(), from, to);
        }
        swapped
    }

    /// One state-machine step that must succeed; anything else is a
    /// scheduler bug.
    pub(crate) fn transition(&self, from: TaskState, to: TaskState) {
        if !self.try_transition(from, to) {
            panic!(
                "invalid task state transition {from:?} -> {to:?} for '{}': found {:?}",
                self.id(),
                self.state()
            );
        }
    }
}

/// Object-safe surface of a task, independent of its result type.
///
/// The scheduler, the graph and [`current_task`] all handle tasks as
/// `Arc<dyn ScheduledTask>`. User code normally holds the concrete
/// [`Task<R>`] and reaches these methods through it.
pub trait ScheduledTask: Send + Sync {
    /// The task's id.
    fn id(&self) -> TaskId;

    /// Current execution state.
    fn state(&self) -> TaskState;

    /// True while the task is part of an active bind (not `Idle`).
    fn active(&self) -> bool {
        self.state() != TaskState::Idle
    }

    /// Requests a cooperative interrupt of the executing functor.
    ///
    /// A no-op unless the task is currently `Executing`; the functor
    /// observes the interrupt at its next interruption point and the
    /// task completes with [`TaskFailure::Interrupted`].
    fn interrupt(&self, reason: &str);

    /// True if an interrupt has been requested for the executing
    /// functor's worker.
    fn interrupt_requested(&self) -> bool;

    /// Sets the task's scheduling priority; forwarded to the worker's
    /// OS thread immediately if the task is executing, otherwise on
    /// pickup.
    fn set_priority(&self, priority: Priority);

    /// The task's scheduling priority.
    fn priority(&self) -> Priority;

    #[doc(hidden)]
    fn core(&self) -> &TaskCore;

    #[doc(hidden)]
    fn rearm_for_next(&self);

    #[doc(hidden)]
    fn publish_retired(&self);
}

// Tasks are handled through Arc everywhere, so let the handle speak
// for the task it points at.
impl<T: ScheduledTask + ?Sized> ScheduledTask for Arc<T> {
    fn id(&self) -> TaskId {
        (**self).id()
    }

    fn state(&self) -> TaskState {
        (**self).state()
    }

    fn active(&self) -> bool {
        (**self).active()
    }

    fn interrupt(&self, reason: &str) {
        (**self).interrupt(reason);
    }

    fn interrupt_requested(&self) -> bool {
        (**self).interrupt_requested()
    }

    fn set_priority(&self, priority: Priority) {
        (**self).set_priority(priority);
    }

    fn priority(&self) -> Priority {
        (**self).priority()
    }

    fn core(&self) -> &TaskCore {
        (**self).core()
    }

    fn rearm_for_next(&self) {
        (**self).rearm_for_next();
    }

    fn publish_retired(&self) {
        (**self).publish_retired();
    }
}

thread_local! {
    static TASK_STACK: RefCell<Vec<Arc<dyn ScheduledTask>>> = const { RefCell::new(Vec::new()) };
}

/// The task executing on the calling thread, if any.
///
/// Inside a functor this returns the surrounding task, which may
/// inspect its own id, check for interrupts, or adjust its priority.
/// Returns `None` outside a pool worker.
pub fn current_task() -> Option<Arc<dyn ScheduledTask>> {
    TASK_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Keeps the per-worker current-task stack balanced even if the
/// functor invocation path unwinds.
struct CurrentTaskGuard;

impl CurrentTaskGuard {
    fn push(task: Arc<dyn ScheduledTask>) -> Self {
        TASK_STACK.with(|stack| stack.borrow_mut().push(task));
        Self
    }
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        TASK_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Mutation guard for a task's declared upstream dependencies.
///
/// Obtained through [`Task::deps`]; holds the task's lock, so the
/// registration check it was created under stays valid for its
/// lifetime.
pub struct DepsMut<'a> {
    id: TaskId,
    guard: MutexGuard<'a, CoreMut>,
}

impl std::fmt::Debug for DepsMut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepsMut").field("id", &self.id).finish()
    }
}

impl DepsMut<'_> {
    /// Declares `upstream` as a prerequisite of this task.
    pub fn add<T>(&mut self, upstream: &T) -> SchedResult<()>
    where
        T: ScheduledTask + ?Sized,
    {
        self.add_id(upstream.id())
    }

    /// Declares the task with `id` as a prerequisite of this task.
    ///
    /// The edge may point at a task that is not registered yet; it
    /// becomes live once both ends are registered with a scheduler.
    pub fn add_id(&mut self, id: impl Into<TaskId>) -> SchedResult<()> {
        let id = id.into();
        if id == self.id {
            return Err(SchedError::SelfDependency { id });
        }
        self.guard.deps.insert(id);
        self.guard.bind_dirty = true;
        Ok(())
    }

    /// Removes a declared prerequisite. Returns true if it was present.
    pub fn remove<T>(&mut self, upstream: &T) -> bool
    where
        T: ScheduledTask + ?Sized,
    {
        self.remove_id(&upstream.id())
    }

    /// Removes a declared prerequisite by id.
    pub fn remove_id(&mut self, id: &TaskId) -> bool {
        let removed = self.guard.deps.shift_remove(id);
        if removed {
            self.guard.bind_dirty = true;
        }
        removed
    }

    /// Drops every declared prerequisite.
    pub fn clear(&mut self) {
        self.guard.deps.clear();
        self.guard.bind_dirty = true;
    }

    /// Iterates the declared prerequisites.
    pub fn upstream(&self) -> impl Iterator<Item = &TaskId> {
        self.guard.deps.iter()
    }
}

/// A named, re-armable unit of work.
///
/// Holds a functor producing `R` and the dependency information the
/// scheduler binds on. Construction yields an `Arc`, since tasks are
/// shared between the caller and every scheduler they register with.
///
/// A task may be enqueued again once it has returned to `Idle`; each
/// execution gets a fresh [`TaskFuture`]. Dropping the last `Arc` while
/// idle and unregistered destroys the task.
///
/// # Example
///
/// ```
/// use taxis::{Pool, Scheduler, Task};
/// use std::sync::Arc;
///
/// let pool = Arc::new(Pool::new(2));
/// let sched = Scheduler::new(pool);
///
/// let hello = Task::new("hello", || "hello world".len());
/// sched.reg(&hello).unwrap();
/// let future = hello.future().unwrap();
/// sched.enqueue(&hello).unwrap();
/// assert_eq!(future.get().unwrap(), 11);
/// ```
pub struct Task<R> {
    core: TaskCore,
    cell: Mutex<PackagedCall<R>>,
}

impl<R: Send + 'static> Task<R> {
    /// Creates a task from an id and a functor.
    pub fn new<F>(id: impl Into<TaskId>, functor: F) -> Arc<Self>
    where
        F: FnMut() -> R + Send + 'static,
    {
        let id = id.into();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let self_sched: Weak<dyn ScheduledTask> = weak.clone();
            let self_pool: Weak<dyn PoolTask> = weak.clone();
            Self {
                core: TaskCore::new(id, self_sched, self_pool),
                cell: Mutex::new(PackagedCall::new(functor)),
            }
        })
    }

    /// Future for the result of the task's next (or current)
    /// execution.
    ///
    /// Fails with [`FutureError::AlreadyRetrieved`] if called more than
    /// once per execution. The future resolves only after the entire
    /// bound subgraph of the task's root has completed.
    ///
    /// Retrieve the future *before* enqueueing: completion re-arms the
    /// cell, so once the task has returned to idle this hands out a
    /// future for the following execution instead.
    pub fn future(&self) -> Result<TaskFuture<R>, FutureError> {
        self.cell.lock().future()
    }

    /// Mutation guard for the task's declared upstream dependencies.
    ///
    /// Dependencies are configuration: they can only change while the
    /// task is not registered with any scheduler
    /// ([`SchedError::Registered`] otherwise).
    pub fn deps(&self) -> SchedResult<DepsMut<'_>> {
        let guard = self.core.lock.lock();
        if guard.reg_count > 0 {
            return Err(SchedError::Registered { id: self.core.id() });
        }
        Ok(DepsMut {
            id: self.core.id(),
            guard,
        })
    }

    /// Renames the task. Like [`deps`](Self::deps), legal only while
    /// unregistered.
    pub fn set_id(&self, id: impl Into<TaskId>) -> SchedResult<()> {
        let guard = self.core.lock.lock();
        if guard.reg_count > 0 {
            return Err(SchedError::Registered { id: self.core.id() });
        }
        *self.core.id.lock() = id.into();
        drop(guard);
        Ok(())
    }

    /// Runs the functor (or adopts an upstream failure) and leaves the
    /// result pending in the cell. Returns the failure, if any, for
    /// downstream propagation.
    fn invoke_functor(&self) -> Option<TaskFailure> {
        let poison = self.core.lock.lock().poison.take();
        let mut cell = self.cell.lock();
        match poison {
            Some(failure) => {
                cell.store_failure(failure.clone());
                Some(failure)
            }
            None => {
                cell.invoke_delayed_ready()
                    .expect("result cell already satisfied for this arming");
                cell.pending_failure()
            }
        }
    }
}

impl<R: Send + 'static> ScheduledTask for Task<R> {
    fn id(&self) -> TaskId {
        self.core.id()
    }

    fn state(&self) -> TaskState {
        self.core.state()
    }

    fn interrupt(&self, reason: &str) {
        let guard = self.core.lock.lock();
        if let Some(worker) = &guard.thread {
            worker.interrupt(reason);
        }
    }

    fn interrupt_requested(&self) -> bool {
        let guard = self.core.lock.lock();
        guard
            .thread
            .as_ref()
            .is_some_and(WorkerHandle::interrupt_requested)
    }

    fn set_priority(&self, priority: Priority) {
        let mut guard = self.core.lock.lock();
        guard.priority = priority;
        if let Some(worker) = &guard.thread {
            worker.apply_priority(priority);
        }
    }

    fn priority(&self) -> Priority {
        self.core.lock.lock().priority
    }

    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn rearm_for_next(&self) {
        self.cell.lock().begin_rearm();
    }

    fn publish_retired(&self) {
        self.cell.lock().publish_retired();
    }
}

impl<R: Send + 'static> PoolTask for Task<R> {
    /// Worker-side execution: runs the functor and drives the
    /// completion protocol of the bound subgraph.
    fn run(self: Arc<Self>) {
        let core = &self.core;
        core.transition(TaskState::Queued, TaskState::Executing);

        let worker = current_worker().expect("task executed outside a pool worker");
        {
            let mut guard = core.lock.lock();
            guard.thread = Some(worker.clone());
            if guard.priority != Priority::NORMAL {
                worker.apply_priority(guard.priority);
            }
        }

        let erased = core.self_handle();
        let failure = {
            let _current = CurrentTaskGuard::push(Arc::clone(&erased));
            self.invoke_functor()
        };

        {
            let mut guard = core.lock.lock();
            // Priority and interrupts are task-local: restore the
            // worker before it moves on.
            if guard.priority != Priority::NORMAL {
                worker.apply_priority(Priority::NORMAL);
            }
            guard.thread = None;
        }
        worker.clear_interrupt();

        let binding = core
            .lock
            .lock()
            .binding
            .clone()
            .expect("executing task has no binding");

        core.transition(TaskState::Executing, TaskState::WaitDownstream);

        // Completion barrier: release our upstream neighbors; the last
        // dependent to finish finalizes them.
        for upstream in &binding.upstream {
            let Some(up) = upstream.upgrade() else { continue };
            if up.core().dep_down.fetch_sub(1, Ordering::AcqRel) == 1 {
                finalize(&*up);
            }
        }

        // Forward progress: enable downstream neighbors of this bind,
        // poisoning them first if we failed.
        let sched = binding.sched.upgrade();
        for downstream in &binding.downstream {
            let Some(down) = downstream.upgrade() else { continue };
            {
                let mut guard = down.core().lock.lock();
                let Some(down_binding) = guard.binding.as_ref() else {
                    continue;
                };
                if down_binding.bind_id != binding.bind_id
                    || !Weak::ptr_eq(&down_binding.sched, &binding.sched)
                {
                    continue;
                }
                if let Some(failure) = &failure {
                    guard.poison.get_or_insert_with(|| failure.clone());
                }
            }
            if down.core().dep_up.fetch_sub(1, Ordering::AcqRel) == 1 {
                down.core()
                    .transition(TaskState::WaitUpstream, TaskState::Queued);
                match &sched {
                    Some(sched) => sched.pool.submit(down.core().pool_handle()),
                    None => tracing::warn!(
                        task = %down.id(),
                        "scheduler dropped while its task graph was active"
                    ),
                }
            }
        }

        // The root holds one extra dep_down count for itself and so
        // finalizes only after every direct upstream neighbor has.
        let is_root = binding
            .root
            .upgrade()
            .is_some_and(|root| std::ptr::eq(root.core(), core as *const TaskCore));
        if is_root && core.dep_down.fetch_sub(1, Ordering::AcqRel) == 1 {
            finalize(&*erased);
        }
    }
}

impl<R> std::fmt::Debug for Task<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.core.lock.lock();
        f.debug_struct("Task")
            .field("id", &self.core.id())
            .field("state", &self.core.state())
            .field("reg_count", &guard.reg_count)
            .field("bind_dirty", &guard.bind_dirty)
            .finish_non_exhaustive()
    }
}

/// Returns a completed task to `Idle` and publishes its result.
///
/// Runs on whichever worker performed the final `dep_down` decrement.
/// The cell is re-armed *before* the task becomes observably idle and
/// published *after*, so a caller that saw the future resolve can
/// immediately re-enqueue, and a caller that saw `Idle` cannot race a
/// stale cell.
pub(crate) fn finalize(task: &dyn ScheduledTask) {
    let core = task.core();
    debug_assert_eq!(core.dep_down.load(Ordering::Acquire), 0);
    {
        let mut guard = core.lock.lock();
        core.dep_up.store(guard.dep_up_init, Ordering::Relaxed);
        core.dep_down.store(guard.dep_down_init, Ordering::Relaxed);
        guard.binding = None;
        guard.poison = None;
    }
    task.rearm_for_next();
    core.transition(TaskState::WaitDownstream, TaskState::Idle);
    task.publish_retired();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_idle_and_unregistered() {
        let task = Task::new("fresh", || ());
        assert_eq!(task.state(), TaskState::Idle);
        assert!(!task.active());
        assert_eq!(task.id(), TaskId::new("fresh"));
        assert_eq!(task.priority(), Priority::NORMAL);
    }

    #[test]
    fn test_deps_declaration_round_trip() {
        let task = Task::new("consumer", || ());
        let upstream = Task::new("producer", || ());

        {
            let mut deps = task.deps().unwrap();
            deps.add(&upstream).unwrap();
            deps.add_id("extern-input").unwrap();
            assert_eq!(deps.upstream().count(), 2);

            assert!(deps.remove(&upstream));
            assert!(!deps.remove(&upstream));
            assert_eq!(deps.upstream().count(), 1);

            deps.clear();
            assert_eq!(deps.upstream().count(), 0);
        }
    }

    #[test]
    fn test_deps_reject_self_edges() {
        let task: std::sync::Arc<Task<()>> = Task::new("selfish", || ());
        let err = task.deps().unwrap().add_id("selfish").unwrap_err();
        assert!(matches!(err, SchedError::SelfDependency { .. }));
    }

    #[test]
    fn test_set_id_renames_while_unregistered() {
        let task = Task::new("before", || ());
        task.set_id("after").unwrap();
        assert_eq!(task.id(), TaskId::new("after"));
    }

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            TaskState::Idle,
            TaskState::Queued,
            TaskState::WaitUpstream,
            TaskState::Executing,
            TaskState::WaitDownstream,
        ] {
            assert_eq!(TaskState::from_u8(state as u8), state);
        }
    }
}
