//! Error types for graph operations
//!
//! This module hides the error representation details and provides a
//! unified error type for structural graph operations. Cycle detection
//! during traversal reports through [`CycleReport`] instead, since a
//! discovered cycle carries a path rather than a single vertex.

use super::TaskId;
use std::fmt;
use thiserror::Error;

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors that can occur during structural graph operations
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum GraphError {
    /// A vertex was inserted with a key that is already present
    #[error("duplicate vertex: {key}")]
    DuplicateVertex {
        /// The duplicate key
        key: TaskId,
    },

    /// An operation referenced a vertex that is not in the graph
    #[error("vertex not found: {key}")]
    VertexNotFound {
        /// The missing key
        key: TaskId,
    },

    /// An edge from a vertex to itself was requested
    #[error("vertex '{key}' cannot depend on itself")]
    SelfDependency {
        /// The vertex with the self edge
        key: TaskId,
    },
}

impl GraphError {
    /// Creates a duplicate vertex error
    pub fn duplicate(key: TaskId) -> Self {
        Self::DuplicateVertex { key }
    }

    /// Creates a vertex not found error
    pub fn not_found(key: TaskId) -> Self {
        Self::VertexNotFound { key }
    }

    /// Creates a self dependency error
    pub fn self_dependency(key: TaskId) -> Self {
        Self::SelfDependency { key }
    }
}

/// Description of a cycle discovered during upstream traversal.
///
/// The report holds the vertices on the offending path, starting and
/// ending at the vertex whose back edge closed the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    path: Vec<TaskId>,
}

impl CycleReport {
    pub(crate) fn new(path: Vec<TaskId>) -> Self {
        Self { path }
    }

    /// The vertices on the cycle, first and last entries equal.
    pub fn path(&self) -> &[TaskId] {
        &self.path
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for id in &self.path {
            if !first {
                f.write_str(" -> ")?;
            }
            first = false;
            write!(f, "{id}")?;
        }
        Ok(())
    }
}
