//! Execution flow tracing
//!
//! When enabled, every task state transition emits a structured
//! `tracing` event at debug level carrying the task id, the states, and
//! the worker thread. Formatting and timestamps belong to whatever
//! subscriber the embedding application installs; this module only
//! decides *whether* records are emitted.
//!
//! The flag is process-wide and off by default.

use crate::graph::TaskId;
use crate::sched::TaskState;
use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(false);

/// Enables or disables task execution flow tracing process-wide.
pub fn set_enabled(on: bool) {
    ENABLED.store(on, Ordering::Relaxed);
}

/// Returns true if execution flow tracing is enabled.
pub fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Emits one state-transition record.
pub(crate) fn transition(id: &TaskId, from: TaskState, to: TaskState) {
    if !enabled() {
        return;
    }
    tracing::debug!(
        target: "taxis::task",
        task = %id,
        from = ?from,
        to = ?to,
        worker = ?std::thread::current().id(),
        "state transition"
    );
}
