//! Packaged callable and one-shot future
//!
//! A [`PackagedCall`] wraps a functor so that its result (value or
//! failure) lands in a one-shot cell, observable through a
//! [`TaskFuture`]. Publication is two-phase:
//!
//! 1. [`PackagedCall::invoke_delayed_ready`] runs the functor and
//!    stores the result as *pending* - consumers stay blocked.
//! 2. [`PackagedCall::set_ready`] publishes, releasing waiters.
//!
//! The split is what lets a scheduler delay a root's publication until
//! its whole bound subgraph has completed: an observer that sees the
//! future resolved may conclude every task in the subgraph is idle
//! again. Folding publication into the invocation would break that
//! guarantee under fan-out.
//!
//! The cell is re-armable: after publication a fresh arming produces a
//! fresh future for the next execution.

mod error;

pub use error::{FutureError, TaskFailure};

use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// How long a blocked `get` waits between looks at the interrupt flag.
const WAIT_SLICE: Duration = Duration::from_millis(50);

enum Phase<R> {
    /// No result yet.
    Unset,
    /// Result computed but not published; consumers stay blocked.
    Pending(Result<R, TaskFailure>),
    /// Result published; consumers may take it.
    Ready(Result<R, TaskFailure>),
    /// Result consumed by `get`.
    Taken,
}

struct Cell<R> {
    phase: Mutex<Phase<R>>,
    cond: Condvar,
}

impl<R> Cell<R> {
    fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Unset),
            cond: Condvar::new(),
        }
    }

    fn publish(&self) -> Result<(), FutureError> {
        let mut phase = self.phase.lock();
        match std::mem::replace(&mut *phase, Phase::Taken) {
            Phase::Pending(result) => {
                *phase = Phase::Ready(result);
                drop(phase);
                self.cond.notify_all();
                Ok(())
            }
            ready @ Phase::Ready(_) => {
                *phase = ready;
                Ok(())
            }
            other => {
                *phase = other;
                Err(FutureError::NotInvoked)
            }
        }
    }
}

/// Consumer handle for one execution's result.
///
/// Obtained through [`PackagedCall::future`] (or `Task::future`), at
/// most once per arming. [`get`](TaskFuture::get) blocks until the
/// producer publishes.
#[must_use = "a future does nothing unless waited on"]
pub struct TaskFuture<R> {
    cell: Arc<Cell<R>>,
}

impl<R> TaskFuture<R> {
    /// Returns true once the result has been published.
    pub fn is_ready(&self) -> bool {
        matches!(*self.cell.phase.lock(), Phase::Ready(_))
    }

    /// Blocks until the result is published, then returns it.
    ///
    /// A stored failure is returned as `Err`. When called from a pool
    /// worker thread, a pending interrupt on that worker cancels the
    /// wait with [`TaskFailure::Interrupted`].
    pub fn get(self) -> Result<R, TaskFailure> {
        let mut phase = self.cell.phase.lock();
        loop {
            if matches!(*phase, Phase::Ready(_)) {
                break;
            }
            if let Some(reason) = crate::pool::take_current_interrupt() {
                return Err(TaskFailure::Interrupted { reason });
            }
            self.cell.cond.wait_for(&mut phase, WAIT_SLICE);
        }
        match std::mem::replace(&mut *phase, Phase::Taken) {
            Phase::Ready(result) => result,
            _ => unreachable!("future phase changed while locked"),
        }
    }
}

impl<R> std::fmt::Debug for TaskFuture<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// A functor packaged with a re-armable one-shot result cell.
///
/// Each arming supports one `future()` retrieval and one invocation;
/// [`set_ready(false)`](PackagedCall::set_ready) re-arms for the next
/// execution with a fresh cell.
///
/// # Example
///
/// ```
/// use taxis::future::PackagedCall;
///
/// let mut call = PackagedCall::new(|| 2 + 2);
/// let future = call.future().unwrap();
///
/// call.invoke_delayed_ready().unwrap();
/// assert!(!future.is_ready()); // computed, not yet published
///
/// call.set_ready(true).unwrap();
/// assert_eq!(future.get().unwrap(), 4);
/// ```
pub struct PackagedCall<R> {
    func: Box<dyn FnMut() -> R + Send>,
    cell: Arc<Cell<R>>,
    /// Cell retired by `begin_rearm`, awaiting publication.
    retiring: Option<Arc<Cell<R>>>,
    invoked: bool,
    future_taken: bool,
}

impl<R> PackagedCall<R> {
    /// Packages a functor.
    pub fn new<F>(func: F) -> Self
    where
        F: FnMut() -> R + Send + 'static,
    {
        Self {
            func: Box::new(func),
            cell: Arc::new(Cell::new()),
            retiring: None,
            invoked: false,
            future_taken: false,
        }
    }

    /// Future for the current arming's result.
    ///
    /// Fails with [`FutureError::AlreadyRetrieved`] on the second call
    /// in the same arming.
    pub fn future(&mut self) -> Result<TaskFuture<R>, FutureError> {
        if self.future_taken {
            return Err(FutureError::AlreadyRetrieved);
        }
        self.future_taken = true;
        Ok(TaskFuture {
            cell: Arc::clone(&self.cell),
        })
    }

    /// Runs the functor and stores its result as pending: consumers
    /// keep blocking until [`set_ready`](Self::set_ready) publishes.
    ///
    /// A panic in the functor is captured as a [`TaskFailure`] instead
    /// of a value; the dedicated interruption payload becomes
    /// [`TaskFailure::Interrupted`].
    pub fn invoke_delayed_ready(&mut self) -> Result<(), FutureError> {
        if self.invoked {
            return Err(FutureError::AlreadySatisfied);
        }
        self.invoked = true;
        let result = match catch_unwind(AssertUnwindSafe(|| (self.func)())) {
            Ok(value) => Ok(value),
            Err(payload) => Err(TaskFailure::from_unwind(payload)),
        };
        *self.cell.phase.lock() = Phase::Pending(result);
        Ok(())
    }

    /// Runs the functor and publishes immediately.
    pub fn invoke(&mut self) -> Result<(), FutureError> {
        self.invoke_delayed_ready()?;
        self.set_ready(true)
    }

    /// `set_ready(true)` publishes the pending result, releasing
    /// waiters. `set_ready(false)` re-arms: a fresh cell is installed
    /// and `future()` is permitted again; any unpublished cell is
    /// abandoned, so re-arm only before invoking or after publishing.
    pub fn set_ready(&mut self, ready: bool) -> Result<(), FutureError> {
        if ready {
            if !self.invoked {
                return Err(FutureError::NotInvoked);
            }
            self.cell.publish()
        } else {
            self.cell = Arc::new(Cell::new());
            self.invoked = false;
            self.future_taken = false;
            Ok(())
        }
    }

    /// True once the current arming has been invoked.
    pub fn invoked(&self) -> bool {
        self.invoked
    }

    /// Stores a failure as the pending result without running the
    /// functor. Used when an upstream failure poisons this task.
    pub(crate) fn store_failure(&mut self, failure: TaskFailure) {
        self.invoked = true;
        *self.cell.phase.lock() = Phase::Pending(Err(failure));
    }

    /// Failure held by the pending (unpublished) result, if any.
    pub(crate) fn pending_failure(&self) -> Option<TaskFailure> {
        match &*self.cell.phase.lock() {
            Phase::Pending(Err(failure)) => Some(failure.clone()),
            _ => None,
        }
    }

    /// First half of a finalize: retires the current cell for later
    /// publication and re-arms with a fresh one. The caller publishes
    /// the retired cell with [`publish_retired`](Self::publish_retired)
    /// once the task is observably idle again.
    pub(crate) fn begin_rearm(&mut self) {
        let fresh = Arc::new(Cell::new());
        self.retiring = Some(std::mem::replace(&mut self.cell, fresh));
        self.invoked = false;
        self.future_taken = false;
    }

    /// Second half of a finalize: publishes the retired cell.
    pub(crate) fn publish_retired(&mut self) {
        if let Some(cell) = self.retiring.take() {
            // NotInvoked only if the task never executed; the state
            // machine makes that unreachable on this path.
            let _ = cell.publish();
        }
    }
}

impl<R> std::fmt::Debug for PackagedCall<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackagedCall")
            .field("invoked", &self.invoked)
            .field("future_taken", &self.future_taken)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_phase_publication() {
        let mut call = PackagedCall::new(|| 7);
        let future = call.future().unwrap();

        call.invoke_delayed_ready().unwrap();
        assert!(!future.is_ready());

        call.set_ready(true).unwrap();
        assert!(future.is_ready());
        assert_eq!(future.get().unwrap(), 7);
    }

    #[test]
    fn test_future_retrieved_once_per_arming() {
        let mut call = PackagedCall::new(|| ());
        let _first = call.future().unwrap();
        assert_eq!(call.future().unwrap_err(), FutureError::AlreadyRetrieved);

        // Re-arming permits retrieval again.
        call.set_ready(false).unwrap();
        assert!(call.future().is_ok());
    }

    #[test]
    fn test_invoke_once_per_arming() {
        let mut call = PackagedCall::new(|| ());
        call.invoke_delayed_ready().unwrap();
        assert_eq!(
            call.invoke_delayed_ready().unwrap_err(),
            FutureError::AlreadySatisfied
        );
    }

    #[test]
    fn test_set_ready_before_invoke_fails() {
        let mut call = PackagedCall::new(|| ());
        assert_eq!(call.set_ready(true).unwrap_err(), FutureError::NotInvoked);
    }

    #[test]
    fn test_panic_captured_as_failure() {
        let mut call = PackagedCall::new(|| -> i32 { panic!("boom") });
        let future = call.future().unwrap();
        call.invoke().unwrap();
        assert_eq!(
            future.get().unwrap_err(),
            TaskFailure::Panicked {
                message: "boom".to_owned()
            }
        );
    }

    #[test]
    fn test_rearm_produces_fresh_future() {
        let mut counter = 0;
        let mut call = PackagedCall::new(move || {
            counter += 1;
            counter
        });

        let first = call.future().unwrap();
        call.invoke().unwrap();
        assert_eq!(first.get().unwrap(), 1);

        call.set_ready(false).unwrap();
        let second = call.future().unwrap();
        call.invoke().unwrap();
        assert_eq!(second.get().unwrap(), 2);
    }

    #[test]
    fn test_get_blocks_until_published_across_threads() {
        let mut call = PackagedCall::new(|| "done");
        let future = call.future().unwrap();
        call.invoke_delayed_ready().unwrap();

        let waiter = std::thread::spawn(move || future.get());
        // Publication from the producing side releases the waiter.
        std::thread::sleep(Duration::from_millis(20));
        call.set_ready(true).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), "done");
    }

    #[test]
    fn test_retire_then_publish() {
        let mut call = PackagedCall::new(|| 3);
        let future = call.future().unwrap();
        call.invoke_delayed_ready().unwrap();

        call.begin_rearm();
        // Fresh arming is independent of the retired result.
        assert!(call.future().is_ok());
        assert!(!future.is_ready());

        call.publish_retired();
        assert_eq!(future.get().unwrap(), 3);
    }
}
