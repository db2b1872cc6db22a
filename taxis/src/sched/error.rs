//! Error types for scheduler and task configuration operations

use crate::graph::TaskId;
use thiserror::Error;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors reported by [`Scheduler`](super::Scheduler) operations and
/// task configuration.
///
/// None of these abort anything: every variant is reported to the
/// caller with no task state changed. A violated internal invariant
/// (an impossible state transition) panics instead, since it indicates
/// a bug in the scheduler rather than in user code.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum SchedError {
    /// `reg` with an id already present in this scheduler's graph
    #[error("task already registered: {id}")]
    AlreadyRegistered {
        /// The conflicting id
        id: TaskId,
    },

    /// `unreg` or `enqueue` on a task unknown to this scheduler
    #[error("task not registered: {id}")]
    NotRegistered {
        /// The unknown id
        id: TaskId,
    },

    /// `enqueue` on an active root, or `unreg` of an active task
    #[error("task is active: {id}")]
    TaskActive {
        /// The active task
        id: TaskId,
    },

    /// The bind pass found a back edge
    #[error("cyclic dependency: {path}")]
    CyclicDependency {
        /// The cycle, rendered as `a -> b -> a`
        path: String,
    },

    /// A reachable task is currently bound to another scheduler or to
    /// a different root's subgraph
    #[error("task is bound to a foreign scheduler or root: {id}")]
    ForeignSchedulerConflict {
        /// The conflicting task
        id: TaskId,
    },

    /// Structural mutation (`deps`, `set_id`) on a registered task
    #[error("task is registered, unregister before modifying: {id}")]
    Registered {
        /// The registered task
        id: TaskId,
    },

    /// A task was declared as its own prerequisite
    #[error("task cannot depend on itself: {id}")]
    SelfDependency {
        /// The task
        id: TaskId,
    },
}
