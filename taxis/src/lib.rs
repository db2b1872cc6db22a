//! Taxis: dependency-driven task scheduling for Rust
//!
//! `taxis` (Greek τάξις, "arrangement, order") serializes and
//! parallelizes the execution of user-supplied units of work across a
//! pool of worker threads. Work units are vertices of a directed
//! acyclic dependency graph; the scheduler honors the partial order the
//! graph defines while exploiting all the concurrency it permits.
//!
//! # Features
//!
//! - **Dependency binding**: enqueueing a root discovers its transitive
//!   prerequisites, detects cycles, and runs the subgraph in dependency
//!   order with maximal parallelism
//! - **Subgraph join**: the root's future resolves only after every
//!   task in its bound subgraph has completed and returned to idle
//! - **Re-armable tasks**: a finished task can be enqueued again; each
//!   execution produces a fresh future
//! - **Cooperative cancellation**: interrupt an executing task and the
//!   failure propagates through its dependents to the root's future
//! - **Priority forwarding**: per-task priority hints forwarded to the
//!   executing worker's OS thread
//!
//! # Quick Start
//!
//! ```
//! use taxis::{Pool, Scheduler, Task};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(Pool::new(4));
//! let sched = Scheduler::new(pool);
//!
//! // A tiny diamond: report depends on parse and lint, which both
//! // depend on load.
//! let load = Task::new("load", || 3usize);
//! let parse = Task::new("parse", || 1usize);
//! let lint = Task::new("lint", || 2usize);
//! let report = Task::new("report", || "done");
//!
//! parse.deps().unwrap().add(&*load).unwrap();
//! lint.deps().unwrap().add(&*load).unwrap();
//! {
//!     let mut deps = report.deps().unwrap();
//!     deps.add(&*parse).unwrap();
//!     deps.add(&*lint).unwrap();
//! }
//!
//! for task in [&load, &parse, &lint] {
//!     sched.reg(task).unwrap();
//! }
//! sched.reg(&report).unwrap();
//!
//! let future = report.future().unwrap();
//! sched.enqueue(&report).unwrap();
//! assert_eq!(future.get().unwrap(), "done");
//! ```
//!
//! # Module Organization
//!
//! Each module hides one design decision:
//!
//! - [`graph`]: dependency graph representation and traversal
//! - [`pool`]: worker threads, parking, stealing and interruption
//! - [`future`]: the two-phase result channel
//! - [`sched`]: the task state machine and the bind pass
//! - [`trace`]: structured execution-flow records
//!
//! # Concurrency model
//!
//! The pool fixes the concurrency; the scheduler is callable from any
//! thread. Graph structure is serialized by the scheduler's lock, task
//! state lives in per-task atomics with acquire/release ordering, and
//! the happens-before edge between a prerequisite's last write and a
//! dependent's first read is the `dep_up` counter's release decrement
//! and acquire observation of zero.

pub mod future;
pub mod graph;
pub mod pool;
pub mod sched;
pub mod trace;

// Re-export the working surface at the crate root for convenience.
pub use future::{FutureError, PackagedCall, TaskFailure, TaskFuture};
pub use graph::{CycleReport, DepGraph, GraphError, TaskId, Vertex};
pub use pool::{interrupt_requested, interruption_point, Pool, PoolBuilder, PoolTask, Priority};
pub use sched::{current_task, DepsMut, SchedError, ScheduledTask, Scheduler, Task, TaskState};

/// Prelude module for convenient glob imports
///
/// # Example
///
/// ```
/// use taxis::prelude::*;
/// ```
///
/// # What's included:
/// - **Core API**: [`Scheduler`], [`Task`], [`Pool`], [`PoolBuilder`]
/// - **Traits**: [`ScheduledTask`] (erased task surface)
/// - **Support types**: [`TaskId`], [`TaskState`], [`Priority`],
///   [`TaskFuture`], [`TaskFailure`]
/// - **Functions**: [`current_task`], [`interruption_point`],
///   [`interrupt_requested`]
/// - **External types**: `Arc`, because every task lives in one
pub mod prelude {
    pub use crate::future::{TaskFailure, TaskFuture};
    pub use crate::graph::TaskId;
    pub use crate::pool::{
        interrupt_requested, interruption_point, Pool, PoolBuilder, Priority,
    };
    pub use crate::sched::{current_task, ScheduledTask, Scheduler, Task, TaskState};
    pub use std::sync::Arc;
}
