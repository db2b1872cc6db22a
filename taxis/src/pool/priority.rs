//! Task scheduling priority
//!
//! Priority is a per-task hint forwarded to the OS thread of whichever
//! worker is executing the task, for the duration of that execution.
//! There is no priority queue above the pool: a higher priority does
//! not reorder ready tasks, it only nudges the OS scheduler.

/// Scheduling priority hint for a task.
///
/// `0` is normal; positive values request more urgency, negative values
/// less. On Linux the value maps onto the thread's nice level
/// (best-effort; raising priority may require privileges and failures
/// are ignored). Elsewhere the value is stored and observable but not
/// forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(i32);

impl Priority {
    /// Normal priority, the default for every task.
    pub const NORMAL: Priority = Priority(0);

    /// Creates a priority from a raw level.
    pub fn new(level: i32) -> Self {
        Self(level)
    }

    /// Returns the raw level.
    pub fn level(self) -> i32 {
        self.0
    }

    /// Nice value for the OS: higher priority means a lower nice.
    #[cfg(target_os = "linux")]
    fn nice(self) -> libc::c_int {
        (-self.0).clamp(-20, 19) as libc::c_int
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// OS thread id of the calling thread, for cross-thread priority
/// forwarding. `0` where the platform offers no addressable id.
#[cfg(target_os = "linux")]
pub(crate) fn current_os_tid() -> i64 {
    // SAFETY: gettid has no preconditions and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as i64 }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn current_os_tid() -> i64 {
    0
}

/// Forwards a priority to the given OS thread. Best-effort: lowering
/// always works, raising may be denied, and either outcome is ignored.
#[cfg(target_os = "linux")]
pub(crate) fn forward_to_os_thread(tid: i64, priority: Priority) {
    if tid == 0 {
        return;
    }
    // SAFETY: setpriority with PRIO_PROCESS addresses a single thread
    // on Linux; an invalid tid only yields an error return.
    let rc = unsafe {
        libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, priority.nice())
    };
    if rc != 0 {
        tracing::debug!(tid, level = priority.level(), "priority forwarding denied");
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn forward_to_os_thread(_tid: i64, _priority: Priority) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_default_is_normal() {
        assert_eq!(Priority::default(), Priority::NORMAL);
        assert_eq!(Priority::NORMAL.level(), 0);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::new(5) > Priority::NORMAL);
        assert!(Priority::new(-3) < Priority::NORMAL);
    }
}
