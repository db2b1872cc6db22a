//! Scheduler - registration, binding and enqueueing
//!
//! The scheduler owns a dependency graph of registered tasks and a
//! handle to the worker pool. Enqueueing a root performs a *bind*: the
//! transitive upstream closure of the root is discovered, stamped with
//! a fresh bind id, wait counters are initialized from the subgraph's
//! in/out degrees, and the leaves (no upstream remaining) are handed to
//! the pool. Completion then propagates through the counters without
//! ever taking the scheduler lock again.
//!
//! # Atomic rejection
//!
//! The bind pass computes all bookkeeping into a scratch map first and
//! commits only after the whole subgraph has validated (registered,
//! idle, acyclic). Any failure leaves every task untouched. The commit
//! itself claims each task with a compare-exchange `Idle ->
//! WaitUpstream`, so two schedulers racing over a shared task cannot
//! both bind it; the loser rolls its partial commit back and reports a
//! conflict.

use crate::graph::{DepGraph, FxIndexMap, GraphError, TaskId};
use crate::pool::Pool;

use super::error::{SchedError, SchedResult};
use super::task::{Binding, ScheduledTask, TaskState};

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

pub(crate) struct SchedShared {
    pub(crate) pool: Arc<Pool>,
    state: Mutex<SchedState>,
}

struct SchedState {
    graph: DepGraph<Arc<dyn ScheduledTask>>,
    /// Monotonic stamp; identifies the most recent bind pass that
    /// touched a task.
    bind_seq: u64,
}

/// Per-task bookkeeping of one bind pass, committed only after the
/// whole subgraph validates.
struct BindScratch {
    task: Arc<dyn ScheduledTask>,
    dep_up_init: usize,
    dep_down_init: usize,
    upstream: Vec<Weak<dyn ScheduledTask>>,
    downstream: Vec<Weak<dyn ScheduledTask>>,
}

/// Serializes and parallelizes task execution over a dependency graph
/// and a pool of worker threads.
///
/// To run a task, register it and its prerequisites with
/// [`reg`](Scheduler::reg), then call [`enqueue`](Scheduler::enqueue)
/// on the root. The root's future resolves once the entire bound
/// subgraph has completed.
///
/// The scheduler is a cheap-clone handle and callable from any thread;
/// all structural operations serialize on an internal lock. Tasks may
/// be registered with several schedulers, but can only be active in
/// one bind at a time.
///
/// # Example
///
/// ```
/// use taxis::{Pool, Scheduler, Task};
/// use std::sync::Arc;
///
/// let pool = Arc::new(Pool::new(4));
/// let sched = Scheduler::new(pool);
///
/// let fetch = Task::new("fetch", || 21);
/// let double = Task::new("double", || 2);
/// double.deps().unwrap().add(&*fetch).unwrap();
///
/// sched.reg(&fetch).unwrap();
/// sched.reg(&double).unwrap();
///
/// let future = double.future().unwrap();
/// sched.enqueue(&double).unwrap();
/// future.get().unwrap();
/// ```
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<SchedShared>,
}

impl Scheduler {
    /// Creates a scheduler submitting to the given pool.
    ///
    /// The pool must outlive the scheduler and every subgraph it ever
    /// binds.
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            shared: Arc::new(SchedShared {
                pool,
                state: Mutex::new(SchedState {
                    graph: DepGraph::new(),
                    bind_seq: 0,
                }),
            }),
        }
    }

    /// The pool this scheduler submits to.
    pub fn pool(&self) -> &Arc<Pool> {
        &self.shared.pool
    }

    /// Registers a task, inserting it as a vertex in this scheduler's
    /// dependency graph.
    ///
    /// While registered, the task's id and declared dependencies are
    /// frozen. Fails with [`SchedError::AlreadyRegistered`] if the id
    /// is already present.
    pub fn reg<T>(&self, task: &T) -> SchedResult<()>
    where
        T: ScheduledTask + ?Sized,
    {
        let mut state = self.shared.state.lock();
        let mut guard = task.core().lock.lock();
        let id = task.core().id();
        if state.graph.contains(&id) {
            return Err(SchedError::AlreadyRegistered { id });
        }
        let declared: Vec<TaskId> = guard.deps.iter().cloned().collect();
        match state
            .graph
            .insert(id.clone(), declared, task.core().self_handle())
        {
            Ok(()) => {
                guard.reg_count += 1;
                Ok(())
            }
            Err(GraphError::SelfDependency { .. }) => Err(SchedError::SelfDependency { id }),
            Err(_) => Err(SchedError::AlreadyRegistered { id }),
        }
    }

    /// Unregisters an idle task, removing its vertex and incident
    /// edges.
    ///
    /// Fails with [`SchedError::TaskActive`] while the task
    /// participates in a bind, and with [`SchedError::NotRegistered`]
    /// if this scheduler does not know the task.
    pub fn unreg<T>(&self, task: &T) -> SchedResult<()>
    where
        T: ScheduledTask + ?Sized,
    {
        let mut state = self.shared.state.lock();
        let mut guard = task.core().lock.lock();
        let id = task.core().id();
        match state.graph.vertex(&id) {
            Some(vertex) if std::ptr::eq(vertex.data().core(), task.core()) => {}
            _ => return Err(SchedError::NotRegistered { id }),
        }
        if task.core().state() != TaskState::Idle {
            return Err(SchedError::TaskActive { id });
        }
        state
            .graph
            .remove(&id)
            .map_err(|_| SchedError::NotRegistered { id })?;
        guard.reg_count = guard.reg_count.saturating_sub(1);
        Ok(())
    }

    /// Returns true if a task with this id is registered here.
    pub fn registered(&self, id: &TaskId) -> bool {
        self.shared.state.lock().graph.contains(id)
    }

    /// Binds the subgraph upstream of `root` and submits its leaves.
    ///
    /// The enqueued task becomes the *root* of the bind: every
    /// registered task reachable over upstream edges is stamped as
    /// belonging to it, wait counters are initialized, and tasks with
    /// no upstream remaining go to the pool. The root's future resolves
    /// only after the whole subgraph has returned to idle.
    ///
    /// Fails, changing no state at all, when:
    /// - `root` is not registered here ([`SchedError::NotRegistered`])
    /// - `root` is already active ([`SchedError::TaskActive`])
    /// - a reachable task is active in another bind or another
    ///   scheduler ([`SchedError::ForeignSchedulerConflict`])
    /// - the reachable subgraph has a cycle
    ///   ([`SchedError::CyclicDependency`])
    ///
    /// A root may be enqueued again once it returns to `Idle`. Functors
    /// may enqueue unrelated roots on this scheduler, but must not
    /// enqueue anything inside their own bound subgraph.
    pub fn enqueue<T>(&self, root: &T) -> SchedResult<()>
    where
        T: ScheduledTask + ?Sized,
    {
        let mut state = self.shared.state.lock();
        let id = root.core().id();
        let root_arc = match state.graph.vertex(&id) {
            Some(vertex) if std::ptr::eq(vertex.data().core(), root.core()) => {
                Arc::clone(vertex.data())
            }
            _ => return Err(SchedError::NotRegistered { id }),
        };
        if root.core().state() != TaskState::Idle {
            return Err(SchedError::TaskActive { id });
        }
        self.bind(&mut state, root_arc)
    }

    /// The bind pass. Runs under the scheduler lock.
    fn bind(&self, state: &mut SchedState, root: Arc<dyn ScheduledTask>) -> SchedResult<()> {
        let root_id = root.id();

        // Discover the reachable upstream closure and every edge inside
        // it. The traversal aborts on the first back edge.
        let mut visited: Vec<TaskId> = Vec::new();
        let mut edges: Vec<(TaskId, TaskId)> = Vec::new();
        state
            .graph
            .traverse_upstream(
                &root_id,
                |vertex| visited.push(vertex.key().clone()),
                |from, to| edges.push((from.key().clone(), to.key().clone())),
            )
            .map_err(|report| SchedError::CyclicDependency {
                path: report.to_string(),
            })?;

        // Validate and seed the scratch map; nothing is written to any
        // task until the whole subgraph has passed.
        let mut scratch: FxIndexMap<TaskId, BindScratch> = FxIndexMap::default();
        for id in &visited {
            let vertex = state
                .graph
                .vertex(id)
                .expect("visited vertex disappeared during bind");
            let task = Arc::clone(vertex.data());
            if task.active() {
                return Err(if *id == root_id {
                    SchedError::TaskActive { id: id.clone() }
                } else {
                    SchedError::ForeignSchedulerConflict { id: id.clone() }
                });
            }
            scratch.insert(
                id.clone(),
                BindScratch {
                    task,
                    dep_up_init: 0,
                    dep_down_init: 0,
                    upstream: Vec::new(),
                    downstream: Vec::new(),
                },
            );
        }
        for (from, to) in &edges {
            let to_task = Arc::clone(&scratch[to].task);
            let from_task = Arc::clone(&scratch[from].task);
            let entry = scratch
                .get_mut(from)
                .expect("edge endpoint missing from bind scratch");
            entry.dep_up_init += 1;
            entry.upstream.push(Arc::downgrade(&to_task));
            let entry = scratch
                .get_mut(to)
                .expect("edge endpoint missing from bind scratch");
            entry.dep_down_init += 1;
            entry.downstream.push(Arc::downgrade(&from_task));
        }

        // Commit: claim every task for this bind. The CAS arbitrates
        // against other schedulers binding a shared task concurrently.
        state.bind_seq += 1;
        let bind_id = state.bind_seq;
        let sched_weak = Arc::downgrade(&self.shared);
        let root_weak = Arc::downgrade(&root);
        let mut committed: Vec<Arc<dyn ScheduledTask>> = Vec::with_capacity(scratch.len());
        let mut leaves: Vec<Arc<dyn ScheduledTask>> = Vec::new();

        for (id, mut entry) in scratch {
            let task = Arc::clone(&entry.task);
            let core = task.core();
            if !core.try_transition(TaskState::Idle, TaskState::WaitUpstream) {
                for claimed in &committed {
                    rollback(claimed);
                }
                return Err(SchedError::ForeignSchedulerConflict { id });
            }
            let is_root = std::ptr::eq(core, root.core());
            // The root waits one extra count for itself, so it is the
            // last task of the subgraph to finalize.
            let dep_down_init = entry.dep_down_init + usize::from(is_root);
            {
                let mut guard = core.lock.lock();
                guard.dep_up_init = entry.dep_up_init;
                guard.dep_down_init = dep_down_init;
                guard.poison = None;
                guard.bind_dirty = false;
                guard.binding = Some(Binding {
                    bind_id,
                    sched: sched_weak.clone(),
                    root: root_weak.clone(),
                    upstream: std::mem::take(&mut entry.upstream),
                    downstream: std::mem::take(&mut entry.downstream),
                });
            }
            core.dep_up
                .store(entry.dep_up_init, std::sync::atomic::Ordering::Release);
            core.dep_down
                .store(dep_down_init, std::sync::atomic::Ordering::Release);
            if entry.dep_up_init == 0 {
                leaves.push(Arc::clone(&task));
            }
            committed.push(task);
        }

        // Only now may anything start running.
        for leaf in leaves {
            leaf.core()
                .transition(TaskState::WaitUpstream, TaskState::Queued);
            self.shared.pool.submit(leaf.core().pool_handle());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Scheduler")
            .field("registered", &state.graph.len())
            .field("bind_seq", &state.bind_seq)
            .finish_non_exhaustive()
    }
}

/// Reverts one claimed task of a failed commit.
fn rollback(task: &Arc<dyn ScheduledTask>) {
    let core = task.core();
    {
        let mut guard = core.lock.lock();
        guard.binding = None;
    }
    core.transition(TaskState::WaitUpstream, TaskState::Idle);
}
