//! Dependency graph - topological bookkeeping for task scheduling
//!
//! This module provides the core data structure for representing task
//! dependencies as a directed graph keyed by [`TaskId`].
//!
//! # Design
//!
//! The graph uses a bidirectional adjacency representation per vertex:
//! - `out`: upstream vertices (prerequisites that must finish first)
//! - `in`: downstream vertices (dependents that wait for this vertex)
//!
//! This gives O(1) average access to both directions, which the bind
//! pass needs for computing wait counters in a single traversal.
//!
//! Vertices carry a payload `T`; the scheduler stores the owning task
//! handle there so that a traversal hands back everything needed to
//! stamp a binding.
//!
//! # Partial graphs
//!
//! A vertex may declare upstream ids that are not (yet) present. Such
//! edges are held in a deferred set and materialized when the target is
//! inserted; removing a vertex returns the edges of its remaining
//! dependents to the deferred set. Traversal only ever sees edges
//! between present vertices.
//!
//! The graph is not internally synchronized; callers serialize access.

use super::error::{CycleReport, GraphError, GraphResult};
use super::TaskId;
use indexmap::{IndexMap, IndexSet};
use rustc_hash::{FxBuildHasher, FxHashMap};

pub(crate) type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;
pub(crate) type FxIndexSet<T> = IndexSet<T, FxBuildHasher>;

/// A vertex in the dependency graph.
///
/// Owns its key, the upstream id set it was declared with, the two live
/// edge sets, and a caller-supplied payload (the scheduler's back
/// pointer to the owning task).
#[derive(Debug)]
pub struct Vertex<T> {
    key: TaskId,
    /// Upstream ids as declared, present in the graph or not.
    declared: FxIndexSet<TaskId>,
    /// Linked upstream neighbors (present in the graph).
    out: FxIndexSet<TaskId>,
    /// Linked downstream neighbors (present in the graph).
    r#in: FxIndexSet<TaskId>,
    data: T,
}

impl<T> Vertex<T> {
    /// Returns the vertex key
    pub fn key(&self) -> &TaskId {
        &self.key
    }

    /// Returns the payload
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Linked upstream neighbors (prerequisites)
    pub fn upstream(&self) -> impl Iterator<Item = &TaskId> {
        self.out.iter()
    }

    /// Linked downstream neighbors (dependents)
    pub fn downstream(&self) -> impl Iterator<Item = &TaskId> {
        self.r#in.iter()
    }

    /// Number of linked upstream neighbors
    pub fn out_degree(&self) -> usize {
        self.out.len()
    }

    /// Number of linked downstream neighbors
    pub fn in_degree(&self) -> usize {
        self.r#in.len()
    }
}

/// Three-color marking for the upstream traversal.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

/// A directed graph of task dependencies keyed by [`TaskId`].
///
/// # Example
///
/// ```
/// use taxis::graph::DepGraph;
/// use taxis::TaskId;
///
/// let mut graph: DepGraph<()> = DepGraph::new();
/// graph.insert(TaskId::new("a"), [TaskId::new("b")], ()).unwrap();
/// graph.insert(TaskId::new("b"), [], ()).unwrap();
///
/// // "a" depends on "b": the edge exists in both directions.
/// let a = graph.vertex(&TaskId::new("a")).unwrap();
/// assert_eq!(a.upstream().count(), 1);
/// let b = graph.vertex(&TaskId::new("b")).unwrap();
/// assert_eq!(b.downstream().count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct DepGraph<T> {
    vertices: FxIndexMap<TaskId, Vertex<T>>,
    /// Declared edges whose target is absent: target id -> declaring ids.
    deferred: FxHashMap<TaskId, FxIndexSet<TaskId>>,
}

impl<T> DepGraph<T> {
    /// Creates an empty graph
    pub fn new() -> Self {
        Self {
            vertices: FxIndexMap::default(),
            deferred: FxHashMap::default(),
        }
    }

    /// Returns the number of vertices
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Returns true if the graph has no vertices
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Looks up a vertex by key
    pub fn vertex(&self, key: &TaskId) -> Option<&Vertex<T>> {
        self.vertices.get(key)
    }

    /// Returns true if the key is present
    pub fn contains(&self, key: &TaskId) -> bool {
        self.vertices.contains_key(key)
    }

    /// Iterates vertices in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Vertex<T>> {
        self.vertices.values()
    }

    /// Inserts a vertex with its declared upstream ids.
    ///
    /// Edges to declared ids already present are linked immediately;
    /// the rest are deferred until the target registers. Deferred edges
    /// from previously inserted vertices that declared `key` are
    /// materialized now.
    ///
    /// Fails if the key is already present or the declared set contains
    /// the vertex itself.
    pub fn insert(
        &mut self,
        key: TaskId,
        declared: impl IntoIterator<Item = TaskId>,
        data: T,
    ) -> GraphResult<()> {
        if self.vertices.contains_key(&key) {
            return Err(GraphError::duplicate(key));
        }
        let declared: FxIndexSet<TaskId> = declared.into_iter().collect();
        if declared.contains(&key) {
            return Err(GraphError::self_dependency(key));
        }

        self.vertices.insert(
            key.clone(),
            Vertex {
                key: key.clone(),
                declared: declared.clone(),
                out: FxIndexSet::default(),
                r#in: FxIndexSet::default(),
                data,
            },
        );

        for target in &declared {
            if self.vertices.contains_key(target) {
                self.link(&key, target)?;
            } else {
                self.deferred
                    .entry(target.clone())
                    .or_default()
                    .insert(key.clone());
            }
        }

        if let Some(waiters) = self.deferred.remove(&key) {
            for from in waiters {
                if self.vertices.contains_key(&from) {
                    self.link(&from, &key)?;
                }
            }
        }
        Ok(())
    }

    /// Removes a vertex, unlinking all incident edges.
    ///
    /// Edges from remaining dependents return to the deferred set so
    /// that re-inserting the vertex restores them. Returns the payload.
    pub fn remove(&mut self, key: &TaskId) -> GraphResult<T> {
        let Some(vertex) = self.vertices.shift_remove(key) else {
            return Err(GraphError::not_found(key.clone()));
        };

        for target in &vertex.out {
            if let Some(v) = self.vertices.get_mut(target) {
                v.r#in.shift_remove(key);
            }
        }
        for from in &vertex.r#in {
            if let Some(v) = self.vertices.get_mut(from) {
                v.out.shift_remove(key);
            }
            // The dependent still declares us; keep the edge pending.
            self.deferred
                .entry(key.clone())
                .or_default()
                .insert(from.clone());
        }
        for target in &vertex.declared {
            if let Some(waiters) = self.deferred.get_mut(target) {
                waiters.shift_remove(key);
                if waiters.is_empty() {
                    self.deferred.remove(target);
                }
            }
        }
        Ok(vertex.data)
    }

    /// Adds the edge `from -> to` (from depends on to).
    ///
    /// Idempotent. Both vertices must be present; self edges are
    /// rejected.
    pub fn link(&mut self, from: &TaskId, to: &TaskId) -> GraphResult<()> {
        if from == to {
            return Err(GraphError::self_dependency(from.clone()));
        }
        if !self.vertices.contains_key(to) {
            return Err(GraphError::not_found(to.clone()));
        }
        let Some(v) = self.vertices.get_mut(from) else {
            return Err(GraphError::not_found(from.clone()));
        };
        v.out.insert(to.clone());
        // Unwrap-free: checked above that `to` is present.
        if let Some(v) = self.vertices.get_mut(to) {
            v.r#in.insert(from.clone());
        }
        Ok(())
    }

    /// Removes the edge `from -> to`. Idempotent.
    pub fn unlink(&mut self, from: &TaskId, to: &TaskId) {
        if let Some(v) = self.vertices.get_mut(from) {
            v.out.shift_remove(to);
        }
        if let Some(v) = self.vertices.get_mut(to) {
            v.r#in.shift_remove(from);
        }
    }

    /// Depth-first traversal over `out` edges from `root`.
    ///
    /// Visits each reachable vertex exactly once (`visit`, preorder) and
    /// invokes `edge(u, v)` for every discovered edge `u -> v`, tree and
    /// cross edges alike. Uses three-color marking; encountering a gray
    /// vertex during descent is a back edge and aborts the traversal
    /// with a [`CycleReport`] carrying the cycle path.
    ///
    /// The traversal is iterative (explicit stack), so arbitrarily deep
    /// graphs do not recurse.
    pub fn traverse_upstream<V, E>(
        &self,
        root: &TaskId,
        mut visit: V,
        mut edge: E,
    ) -> Result<(), CycleReport>
    where
        V: FnMut(&Vertex<T>),
        E: FnMut(&Vertex<T>, &Vertex<T>),
    {
        struct Frame {
            id: TaskId,
            neighbors: Vec<TaskId>,
            next: usize,
        }

        let Some(root_vertex) = self.vertices.get(root) else {
            return Ok(());
        };

        let mut colors: FxHashMap<TaskId, Color> = FxHashMap::default();
        let mut stack: Vec<Frame> = Vec::new();

        visit(root_vertex);
        colors.insert(root.clone(), Color::Gray);
        stack.push(Frame {
            id: root.clone(),
            neighbors: root_vertex.out.iter().cloned().collect(),
            next: 0,
        });

        while let Some(frame) = stack.last_mut() {
            if frame.next == frame.neighbors.len() {
                colors.insert(frame.id.clone(), Color::Black);
                stack.pop();
                continue;
            }
            let target = frame.neighbors[frame.next].clone();
            frame.next += 1;
            let from_id = frame.id.clone();

            match colors.get(&target).copied() {
                Some(Color::Gray) => {
                    // Back edge: the gray chain on the stack from the
                    // target down to the current vertex is the cycle.
                    let start = stack
                        .iter()
                        .position(|f| f.id == target)
                        .unwrap_or_default();
                    let mut path: Vec<TaskId> =
                        stack[start..].iter().map(|f| f.id.clone()).collect();
                    path.push(target);
                    return Err(CycleReport::new(path));
                }
                Some(Color::Black) => {
                    let from = &self.vertices[&from_id];
                    let to = &self.vertices[&target];
                    edge(from, to);
                }
                None => {
                    let from = &self.vertices[&from_id];
                    let to = &self.vertices[&target];
                    visit(to);
                    edge(from, to);
                    colors.insert(target.clone(), Color::Gray);
                    let neighbors = to.out.iter().cloned().collect();
                    stack.push(Frame {
                        id: target,
                        neighbors,
                        next: 0,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TaskId {
        TaskId::new(s)
    }

    fn graph(entries: &[(&str, &[&str])]) -> DepGraph<()> {
        let mut g = DepGraph::new();
        for &(key, deps) in entries {
            g.insert(id(key), deps.iter().copied().map(id), ()).unwrap();
        }
        g
    }

    #[test]
    fn test_empty_graph() {
        let g: DepGraph<()> = DepGraph::new();
        assert!(g.is_empty());
        assert_eq!(g.len(), 0);
    }

    #[test]
    fn test_insert_and_lookup() {
        let g = graph(&[("a", &[]), ("b", &["a"])]);
        assert_eq!(g.len(), 2);
        assert!(g.contains(&id("a")));
        assert_eq!(g.vertex(&id("b")).unwrap().out_degree(), 1);
        assert_eq!(g.vertex(&id("a")).unwrap().in_degree(), 1);
    }

    #[test]
    fn test_duplicate_vertex_error() {
        let mut g = graph(&[("a", &[])]);
        let err = g.insert(id("a"), [], ()).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateVertex { .. }));
    }

    #[test]
    fn test_self_dependency_error() {
        let mut g: DepGraph<()> = DepGraph::new();
        let err = g.insert(id("a"), [id("a")], ()).unwrap_err();
        assert!(matches!(err, GraphError::SelfDependency { .. }));
    }

    #[test]
    fn test_deferred_edges_materialize_on_insert() {
        let mut g: DepGraph<()> = DepGraph::new();
        // "b" declares "a" before "a" exists.
        g.insert(id("b"), [id("a")], ()).unwrap();
        assert_eq!(g.vertex(&id("b")).unwrap().out_degree(), 0);

        g.insert(id("a"), [], ()).unwrap();
        assert_eq!(g.vertex(&id("b")).unwrap().out_degree(), 1);
        assert_eq!(g.vertex(&id("a")).unwrap().in_degree(), 1);
    }

    #[test]
    fn test_remove_returns_edges_to_deferred() {
        let mut g = graph(&[("a", &[]), ("b", &["a"])]);
        g.remove(&id("a")).unwrap();
        assert_eq!(g.vertex(&id("b")).unwrap().out_degree(), 0);

        // Re-inserting "a" restores the edge from its dependent.
        g.insert(id("a"), [], ()).unwrap();
        assert_eq!(g.vertex(&id("b")).unwrap().out_degree(), 1);
    }

    #[test]
    fn test_remove_missing_vertex_error() {
        let mut g: DepGraph<()> = DepGraph::new();
        assert!(matches!(
            g.remove(&id("nope")),
            Err(GraphError::VertexNotFound { .. })
        ));
    }

    #[test]
    fn test_link_unlink_idempotent() {
        let mut g = graph(&[("a", &[]), ("b", &[])]);
        g.link(&id("b"), &id("a")).unwrap();
        g.link(&id("b"), &id("a")).unwrap();
        assert_eq!(g.vertex(&id("b")).unwrap().out_degree(), 1);

        g.unlink(&id("b"), &id("a"));
        g.unlink(&id("b"), &id("a"));
        assert_eq!(g.vertex(&id("b")).unwrap().out_degree(), 0);
        assert_eq!(g.vertex(&id("a")).unwrap().in_degree(), 0);
    }

    #[test]
    fn test_traverse_diamond_counts_every_edge() {
        // a depends on b and c; both depend on d.
        let g = graph(&[
            ("d", &[]),
            ("b", &["d"]),
            ("c", &["d"]),
            ("a", &["b", "c"]),
        ]);
        let mut visited = Vec::new();
        let mut edges = Vec::new();
        g.traverse_upstream(
            &id("a"),
            |v| visited.push(v.key().clone()),
            |u, v| edges.push((u.key().clone(), v.key().clone())),
        )
        .unwrap();

        assert_eq!(visited.len(), 4);
        assert_eq!(visited[0], id("a"));
        // Both edges into "d" are reported even though it is visited once.
        assert_eq!(edges.len(), 4);
        assert_eq!(edges.iter().filter(|(_, v)| *v == id("d")).count(), 2);
    }

    #[test]
    fn test_traverse_ignores_unreachable_and_absent() {
        // "a" declares "ghost", which never registers; "x" is present
        // but unreachable from "a".
        let g = graph(&[("a", &["b", "ghost"]), ("b", &[]), ("x", &[])]);
        let mut visited = Vec::new();
        g.traverse_upstream(&id("a"), |v| visited.push(v.key().clone()), |_, _| {})
            .unwrap();
        assert_eq!(visited, vec![id("a"), id("b")]);
    }

    #[test]
    fn test_traverse_detects_cycle_with_path() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let report = g
            .traverse_upstream(&id("a"), |_| {}, |_, _| {})
            .unwrap_err();
        let path = report.path();
        assert_eq!(path.first(), path.last());
        assert_eq!(path.len(), 4);
        assert_eq!(report.to_string(), "a -> b -> c -> a");
    }

    #[test]
    fn test_traverse_missing_root_is_empty() {
        let g: DepGraph<()> = DepGraph::new();
        let mut visited = 0;
        g.traverse_upstream(&id("a"), |_| visited += 1, |_, _| {})
            .unwrap();
        assert_eq!(visited, 0);
    }
}
