//! Pool worker threads
//!
//! Each worker owns a local task deque and loops: pop local, steal a
//! batch from the shared injector, steal from a sibling, or park until
//! a submission wakes it. A monotonic signal counter in the sleep state
//! closes the window between "queues looked empty" and "parked".
//!
//! The worker also carries the per-thread interruption state and its OS
//! thread id, published through [`WorkerHandle`] so that a task can be
//! interrupted or re-prioritized from any thread while it executes.

use super::priority::{current_os_tid, forward_to_os_thread, Priority};
use super::{PoolShared, PoolTask};
use crossbeam_deque::{Steal, Stealer, Worker as TaskQueue};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::iter;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Shared state of one worker thread.
#[derive(Debug, Default)]
pub(crate) struct WorkerShared {
    interrupted: AtomicBool,
    reason: Mutex<Option<String>>,
    os_tid: AtomicI64,
}

/// Cloneable handle to a worker thread.
///
/// Held by the pool, by the worker's own thread-local slot, and
/// transiently by whichever task the worker is executing (so that
/// `interrupt` and `set_priority` can reach the right thread).
#[derive(Debug, Clone, Default)]
pub(crate) struct WorkerHandle {
    shared: Arc<WorkerShared>,
}

impl WorkerHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Flags the worker for cooperative interruption with a reason.
    pub(crate) fn interrupt(&self, reason: &str) {
        *self.shared.reason.lock() = Some(reason.to_owned());
        self.shared.interrupted.store(true, Ordering::Release);
    }

    pub(crate) fn interrupt_requested(&self) -> bool {
        self.shared.interrupted.load(Ordering::Acquire)
    }

    /// Consumes a pending interrupt, returning its reason.
    pub(crate) fn take_interrupt(&self) -> Option<String> {
        if self.shared.interrupted.swap(false, Ordering::AcqRel) {
            Some(
                self.shared
                    .reason
                    .lock()
                    .take()
                    .unwrap_or_else(|| "interrupted".to_owned()),
            )
        } else {
            None
        }
    }

    /// Drops any pending interrupt. Called at the end of every task so
    /// an interrupt aimed at one task cannot leak into the next.
    pub(crate) fn clear_interrupt(&self) {
        self.shared.interrupted.store(false, Ordering::Release);
        self.shared.reason.lock().take();
    }

    /// Forwards a priority to this worker's OS thread.
    pub(crate) fn apply_priority(&self, priority: Priority) {
        forward_to_os_thread(self.shared.os_tid.load(Ordering::Acquire), priority);
    }
}

thread_local! {
    static CURRENT_WORKER: RefCell<Option<WorkerHandle>> = const { RefCell::new(None) };
}

/// Handle of the worker running the calling thread, if any.
pub(crate) fn current_worker() -> Option<WorkerHandle> {
    CURRENT_WORKER.with(|slot| slot.borrow().clone())
}

/// Body of a worker thread.
pub(super) fn run(
    shared: Arc<PoolShared>,
    local: TaskQueue<Arc<dyn PoolTask>>,
    index: usize,
    handle: WorkerHandle,
) {
    handle
        .shared
        .os_tid
        .store(current_os_tid(), Ordering::Release);
    CURRENT_WORKER.with(|slot| *slot.borrow_mut() = Some(handle));
    tracing::debug!(worker = index, "pool worker started");

    loop {
        if let Some(task) = find_task(&local, &shared, index) {
            task.run();
            continue;
        }

        // Nothing visible; capture the wakeup counter, look once more,
        // and only then park. A submission bumps the counter under the
        // same lock, so a push between the recheck and the wait cannot
        // be lost.
        let seen = {
            let sleep = shared.sleep.lock();
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            sleep.signal
        };
        if let Some(task) = find_task(&local, &shared, index) {
            task.run();
            continue;
        }
        let mut sleep = shared.sleep.lock();
        while sleep.signal == seen && !shared.shutdown.load(Ordering::Acquire) {
            shared.cond.wait(&mut sleep);
        }
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
    }
    tracing::debug!(worker = index, "pool worker stopped");
}

/// Next task for this worker: local deque first, then a batch from the
/// shared injector, then a steal from a sibling.
fn find_task(
    local: &TaskQueue<Arc<dyn PoolTask>>,
    shared: &PoolShared,
    index: usize,
) -> Option<Arc<dyn PoolTask>> {
    local.pop().or_else(|| {
        iter::repeat_with(|| {
            shared
                .injector
                .steal_batch_and_pop(local)
                .or_else(|| steal_from_siblings(&shared.stealers, index))
        })
        .find(|steal| !steal.is_retry())
        .and_then(Steal::success)
    })
}

fn steal_from_siblings(
    stealers: &[Stealer<Arc<dyn PoolTask>>],
    index: usize,
) -> Steal<Arc<dyn PoolTask>> {
    stealers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, stealer)| stealer.steal())
        .collect()
}
