//! Task identifier type
//!
//! This module defines the `TaskId` type which names a task inside a
//! scheduler's dependency graph. Ids are interned tokens: cloning and
//! hashing are cheap, so the same id can be stamped on vertices, edge
//! sets and trace records without copying the underlying text.

use std::fmt;
use std::sync::Arc;

/// Unique identifier of a task within a scheduler.
///
/// A `TaskId` wraps an interned string. Clones share the same backing
/// allocation, which keeps the graph bookkeeping cheap: the id appears
/// as a map key, in both edge sets of every neighboring vertex, and in
/// every trace record.
///
/// Ids must be unique within a single scheduler; the same id may be
/// reused across unrelated schedulers.
///
/// # Examples
///
/// ```
/// use taxis::TaskId;
///
/// let id = TaskId::new("load_assets");
/// assert_eq!(id.as_str(), "load_assets");
/// assert_eq!(id.clone(), id);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Arc<str>);

impl TaskId {
    /// Creates a new id from a name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Returns the textual form of the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&TaskId> for TaskId {
    fn from(id: &TaskId) -> Self {
        id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_task_id_creation() {
        let id = TaskId::new("render");
        assert_eq!(id.as_str(), "render");
        assert_eq!(format!("{id}"), "render");
    }

    #[test]
    fn test_task_id_equality() {
        let a = TaskId::new("a");
        let b = TaskId::from("a");
        let c: TaskId = String::from("c").into();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_task_id_hash() {
        let mut set = HashSet::new();
        set.insert(TaskId::new("a"));
        set.insert(TaskId::new("b"));
        set.insert(TaskId::new("a"));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_task_id_cheap_clone_shares_backing() {
        let a = TaskId::new("shared");
        let b = a.clone();
        assert!(std::ptr::eq(a.as_str(), b.as_str()));
    }
}
