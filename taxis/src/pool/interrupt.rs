//! Cooperative interruption
//!
//! Interruption is flag-based: [`crate::ScheduledTask::interrupt`]
//! raises a flag on the worker currently executing the task, and the
//! functor observes it at well-defined points. Nothing is preempted; a
//! functor that never reaches an interruption point never stops early.
//!
//! [`interruption_point`] is the observing side. When the calling
//! worker has been flagged it consumes the flag and unwinds with a
//! dedicated payload; the worker converts the unwind into
//! `TaskFailure::Interrupted` in the task's result cell. The unwind
//! bypasses the panic hook, so interrupts are silent on stderr.

use super::worker::current_worker;

/// Unwind payload carrying the interrupt reason.
///
/// Not public API: only [`interruption_point`] creates it and only the
/// functor invocation path downcasts it.
pub(crate) struct InterruptPayload(pub(crate) String);

/// Observes a pending interrupt on the calling worker thread.
///
/// If the executing task has been interrupted, consumes the flag and
/// unwinds with the interrupt reason; the task completes with
/// `TaskFailure::Interrupted` carrying that reason. Outside a worker
/// thread, or with no interrupt pending, this is a no-op.
///
/// Functors that run long should call this periodically:
///
/// ```no_run
/// loop {
///     taxis::interruption_point();
///     // ... a slice of work ...
/// }
/// ```
pub fn interruption_point() {
    if let Some(worker) = current_worker() {
        if let Some(reason) = worker.take_interrupt() {
            std::panic::resume_unwind(Box::new(InterruptPayload(reason)));
        }
    }
}

/// Returns true if an interrupt is pending for the calling worker
/// thread, without consuming it.
///
/// The polling form of [`interruption_point`]: a functor can use it to
/// wind down gracefully instead of unwinding.
pub fn interrupt_requested() -> bool {
    current_worker().is_some_and(|worker| worker.interrupt_requested())
}

/// Consumes a pending interrupt on the calling worker, returning its
/// reason. Used by blocking waits that need to observe cancellation
/// without unwinding (for example `TaskFuture::get`).
pub(crate) fn take_current_interrupt() -> Option<String> {
    current_worker().and_then(|worker| worker.take_interrupt())
}
