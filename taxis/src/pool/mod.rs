//! Worker pool
//!
//! A fixed-size pool of OS threads consuming submitted tasks. The pool
//! is the concurrency bound of the scheduler: however wide a bound
//! subgraph fans out, at most `worker_count` functors run at once.
//!
//! # Module Organization
//!
//! - `worker`: worker thread loop, local deques and stealing
//! - `interrupt`: cooperative interruption points
//! - `priority`: OS thread priority forwarding
//!
//! # Design
//!
//! Submissions go to a shared injector queue; each worker owns a local
//! deque and steals from the injector or from siblings when its own
//! runs dry. Idle workers park on a condvar guarded by a monotonic
//! wakeup counter, so `submit` never blocks beyond that critical
//! section and wakeups cannot be lost.
//!
//! Worker threads do not guard against panics outside the functor
//! invocation path: a panic there is a bug in the pool or its tasks and
//! takes the worker down.

mod interrupt;
mod priority;
mod worker;

pub use interrupt::{interrupt_requested, interruption_point};
pub use priority::Priority;

pub(crate) use interrupt::{take_current_interrupt, InterruptPayload};
pub(crate) use worker::{current_worker, WorkerHandle};

use crossbeam_deque::{Injector, Stealer, Worker as TaskQueue};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A unit of work the pool can execute.
///
/// Implementors are submitted as `Arc<dyn PoolTask>`; the worker that
/// picks the task up invokes [`run`](PoolTask::run) exactly once per
/// submission.
pub trait PoolTask: Send + Sync {
    /// Executes the task on the calling worker thread.
    fn run(self: Arc<Self>);
}

#[derive(Debug, Default)]
pub(crate) struct SleepState {
    /// Monotonic wakeup counter; bumped on every submission.
    signal: u64,
}

pub(crate) struct PoolShared {
    pub(crate) injector: Injector<Arc<dyn PoolTask>>,
    pub(crate) stealers: Vec<Stealer<Arc<dyn PoolTask>>>,
    pub(crate) sleep: Mutex<SleepState>,
    pub(crate) cond: Condvar,
    pub(crate) shutdown: AtomicBool,
}

/// Builder for [`Pool`].
///
/// # Example
///
/// ```
/// use taxis::Pool;
///
/// let pool = Pool::builder().workers(2).name_prefix("demo").build();
/// ```
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    workers: usize,
    stack_size: Option<usize>,
    name_prefix: String,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
            stack_size: None,
            name_prefix: "taxis-worker".to_owned(),
        }
    }
}

impl PoolBuilder {
    /// Number of worker threads. Clamped to at least one.
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    /// Stack size hint for worker threads.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Thread name prefix; workers are named `<prefix>-<index>`.
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Starts the workers and returns the pool.
    pub fn build(self) -> Pool {
        let queues: Vec<TaskQueue<Arc<dyn PoolTask>>> =
            (0..self.workers).map(|_| TaskQueue::new_fifo()).collect();
        let stealers = queues.iter().map(TaskQueue::stealer).collect();
        let shared = Arc::new(PoolShared {
            injector: Injector::new(),
            stealers,
            sleep: Mutex::new(SleepState::default()),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut threads = Vec::with_capacity(self.workers);
        for (index, local) in queues.into_iter().enumerate() {
            let mut builder =
                std::thread::Builder::new().name(format!("{}-{index}", self.name_prefix));
            if let Some(bytes) = self.stack_size {
                builder = builder.stack_size(bytes);
            }
            let shared = Arc::clone(&shared);
            let handle = WorkerHandle::new();
            let thread = builder
                .spawn(move || worker::run(shared, local, index, handle))
                .expect("failed to spawn pool worker thread");
            threads.push(thread);
        }

        Pool {
            shared,
            threads: Mutex::new(threads),
        }
    }
}

/// Fixed-size pool of worker threads executing submitted tasks.
///
/// Dropping the pool stops the workers after their current task;
/// still-queued tasks are discarded. The pool must outlive every
/// scheduler built on it.
pub struct Pool {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    /// Creates a pool with the given number of workers.
    pub fn new(workers: usize) -> Self {
        Self::builder().workers(workers).build()
    }

    /// Returns a [`PoolBuilder`] with defaults.
    pub fn builder() -> PoolBuilder {
        PoolBuilder::default()
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.shared.stealers.len()
    }

    /// Schedules a task for execution on some worker.
    ///
    /// Never blocks beyond the wakeup critical section; the task runs
    /// as soon as a worker is free.
    pub fn submit(&self, task: Arc<dyn PoolTask>) {
        self.shared.injector.push(task);
        {
            let mut sleep = self.shared.sleep.lock();
            sleep.signal = sleep.signal.wrapping_add(1);
        }
        self.shared.cond.notify_one();
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let mut sleep = self.shared.sleep.lock();
            sleep.signal = sleep.signal.wrapping_add(1);
        }
        self.shared.cond.notify_all();
        for thread in self.threads.lock().drain(..) {
            // A worker that panicked already unwound; nothing to do.
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("workers", &self.workers())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingTask {
        hits: Arc<AtomicUsize>,
    }

    impl PoolTask for CountingTask {
        fn run(self: Arc<Self>) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        check()
    }

    #[test]
    fn test_submit_runs_every_task() {
        let pool = Pool::new(3);
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            pool.submit(Arc::new(CountingTask { hits: hits.clone() }));
        }
        assert!(wait_until(Duration::from_secs(5), || {
            hits.load(Ordering::SeqCst) == 64
        }));
    }

    #[test]
    fn test_worker_context_present_inside_task() {
        struct Probe {
            seen: Arc<AtomicUsize>,
        }
        impl PoolTask for Probe {
            fn run(self: Arc<Self>) {
                if current_worker().is_some() {
                    self.seen.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let pool = Pool::new(1);
        let seen = Arc::new(AtomicUsize::new(0));
        pool.submit(Arc::new(Probe { seen: seen.clone() }));
        assert!(wait_until(Duration::from_secs(5), || {
            seen.load(Ordering::SeqCst) == 1
        }));
        assert!(current_worker().is_none());
    }

    #[test]
    fn test_interrupt_flag_take_and_clear() {
        let handle = WorkerHandle::new();
        assert!(!handle.interrupt_requested());
        handle.interrupt("stop");
        assert!(handle.interrupt_requested());
        assert_eq!(handle.take_interrupt().as_deref(), Some("stop"));
        assert!(!handle.interrupt_requested());
        assert_eq!(handle.take_interrupt(), None);

        handle.interrupt("again");
        handle.clear_interrupt();
        assert_eq!(handle.take_interrupt(), None);
    }

    #[test]
    fn test_drop_joins_workers() {
        let pool = Pool::new(2);
        let hits = Arc::new(AtomicUsize::new(0));
        pool.submit(Arc::new(CountingTask { hits: hits.clone() }));
        assert!(wait_until(Duration::from_secs(5), || {
            hits.load(Ordering::SeqCst) == 1
        }));
        drop(pool);
    }
}
