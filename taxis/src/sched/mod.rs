//! Scheduling layer: tasks, state machine, scheduler and binding
//!
//! This module ties the graph, pool and future layers together:
//!
//! - `task`: the task type, its execution state machine and the
//!   completion protocol run on worker threads
//! - `scheduler`: registration and the bind pass that stamps a
//!   subgraph and seeds the pool
//! - `error`: error kinds for scheduler and task configuration
//!
//! # Entry Points
//!
//! - [`Task::new`]: package a functor as a schedulable task
//! - [`Scheduler::new`]: build a scheduler over a pool
//! - [`current_task`]: the task executing on the calling thread

mod error;
mod scheduler;
mod task;

pub use error::{SchedError, SchedResult};
pub use scheduler::Scheduler;
pub use task::{current_task, DepsMut, ScheduledTask, Task, TaskState};

#[doc(hidden)]
pub use task::TaskCore;
