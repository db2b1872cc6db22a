//! Dependency graph for task scheduling
//!
//! This module provides the graph data structures the scheduler builds
//! on:
//!
//! - Task identifiers ([`TaskId`]) as interned tokens
//! - A directed graph of named vertices ([`DepGraph`]) with
//!   bidirectional edge sets and deferred edges for absent targets
//! - An upstream traversal with cycle detection ([`CycleReport`])
//!
//! # Design
//!
//! The graph hides its representation (adjacency sets vs. matrices) and
//! exposes only the operations binding needs: insert, remove, link,
//! unlink, lookup, neighbor iteration, and a depth-first upstream
//! traversal that enumerates the transitive prerequisite closure of a
//! root while detecting back edges.

mod dep_graph;
mod error;
mod task_id;

pub use dep_graph::{DepGraph, Vertex};
pub use error::{CycleReport, GraphError, GraphResult};
pub use task_id::TaskId;

pub(crate) use dep_graph::{FxIndexMap, FxIndexSet};
