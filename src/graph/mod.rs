//! Arena-backed dependency graph.
//!
//! Nodes live in a slot vector and refer to each other by index, so shared children
//! and back-references never form ownership cycles. The graph has a single root and
//! guarantees that it stays acyclic: [`Graph::add_edge`] searches for a path from the
//! edge's target back to its origin before committing, and rejects the edge with a
//! [`CyclicError`] carrying that path.
//!
//! Children are kept in insertion order, which makes [`Graph::next_leaf`] and the
//! leaves-first [`Graph::drain_leaves`] deterministic.
//!
//! # Example
//!
//! ```rust
//! use devflow_cli::graph::{Graph, GraphError};
//!
//! let mut graph = Graph::new("root", ());
//! graph.insert_node_at("root", "api", ()).unwrap();
//! graph.insert_node_at("api", "db", ()).unwrap();
//!
//! // db -> root would close a cycle
//! let err = graph.add_edge("db", "root").unwrap_err();
//! assert!(matches!(err, GraphError::Cyclic(_)));
//!
//! let order: Vec<String> = graph.drain_leaves().into_iter().map(|(id, _)| id).collect();
//! assert_eq!(order, vec!["db", "api"]);
//! ```

use petgraph::dot::{Config, Dot};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Errors returned by graph operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Parent node '{0}' does not exist")]
    ParentNotFound(String),

    #[error("Node '{0}' does not exist")]
    NodeNotFound(String),

    #[error("Cannot remove node '{0}' because it still has children")]
    HasChildren(String),

    #[error("The root node cannot be removed")]
    CannotRemoveRoot,

    #[error(transparent)]
    Cyclic(#[from] CyclicError),
}

/// An edge was rejected because it would close a cycle.
///
/// `path` lists node IDs in traversal order, starting at the target of the rejected
/// edge and ending at its origin.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub struct CyclicError {
    pub path: Vec<String>,
}

impl fmt::Display for CyclicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cyclic dependency detected: {}", self.path.join(" -> "))?;
        if let Some(first) = self.path.first() {
            write!(f, " -> {first}")?;
        }
        Ok(())
    }
}

/// Result of [`Graph::insert_node_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// A new node was created under the parent.
    Created,
    /// A node with the same ID existed; only an edge from the parent was added.
    Shared,
}

struct Node<T> {
    id: String,
    data: T,
    parents: Vec<usize>,
    children: Vec<usize>,
}

/// A rooted DAG keyed by string IDs.
pub struct Graph<T> {
    slots: Vec<Option<Node<T>>>,
    index: HashMap<String, usize>,
    root: usize,
}

impl<T> Graph<T> {
    pub fn new(root_id: impl Into<String>, root_data: T) -> Self {
        let id = root_id.into();
        let mut index = HashMap::new();
        index.insert(id.clone(), 0);
        Self {
            slots: vec![Some(Node {
                id,
                data: root_data,
                parents: Vec::new(),
                children: Vec::new(),
            })],
            index,
            root: 0,
        }
    }

    fn node(&self, idx: usize) -> &Node<T> {
        self.slots[idx].as_ref().expect("graph index points at a live slot")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<T> {
        self.slots[idx].as_mut().expect("graph index points at a live slot")
    }

    fn lookup(&self, id: &str) -> Result<usize, GraphError> {
        self.index.get(id).copied().ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    pub fn root_id(&self) -> &str {
        &self.node(self.root).id
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|&idx| &self.node(idx).data)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        let idx = *self.index.get(id)?;
        Some(&mut self.node_mut(idx).data)
    }

    /// IDs of the node's children in insertion order.
    pub fn children(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&idx| self.node(idx).children.iter().map(|&c| self.node(c).id.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn parents(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&idx| self.node(idx).parents.iter().map(|&p| self.node(p).id.as_str()).collect())
            .unwrap_or_default()
    }

    /// Number of nodes including the root.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when only the root is left.
    pub fn is_empty(&self) -> bool {
        self.index.len() <= 1
    }

    /// Add `id` as a child of `parent_id`.
    ///
    /// If a node with `id` already exists, `data` is dropped and an edge from the parent
    /// to the existing node is added instead, which can fail with a cyclic error.
    pub fn insert_node_at(
        &mut self,
        parent_id: &str,
        id: impl Into<String>,
        data: T,
    ) -> Result<Insertion, GraphError> {
        let parent =
            self.index.get(parent_id).copied().ok_or_else(|| GraphError::ParentNotFound(parent_id.to_string()))?;
        let id = id.into();

        if self.contains(&id) {
            self.add_edge(parent_id, &id)?;
            return Ok(Insertion::Shared);
        }

        let idx = self.slots.len();
        self.slots.push(Some(Node {
            id: id.clone(),
            data,
            parents: vec![parent],
            children: Vec::new(),
        }));
        self.index.insert(id, idx);
        self.node_mut(parent).children.push(idx);
        Ok(Insertion::Created)
    }

    /// Add an edge `from -> to`.
    ///
    /// A duplicate edge is a no-op. If `from` is reachable from `to` the edge is
    /// rejected and the graph is left unchanged.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        let from_idx = self.lookup(from)?;
        let to_idx = self.lookup(to)?;

        if self.node(from_idx).children.contains(&to_idx) {
            return Ok(());
        }

        if let Some(path) = self.find_path(to_idx, from_idx) {
            return Err(CyclicError {
                path: path.into_iter().map(|idx| self.node(idx).id.clone()).collect(),
            }
            .into());
        }

        self.node_mut(from_idx).children.push(to_idx);
        self.node_mut(to_idx).parents.push(from_idx);
        Ok(())
    }

    /// Depth-first search for a path `start ->* target` following child edges.
    fn find_path(&self, start: usize, target: usize) -> Option<Vec<usize>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        if self.dfs(start, target, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn dfs(&self, current: usize, target: usize, visited: &mut HashSet<usize>, path: &mut Vec<usize>) -> bool {
        if !visited.insert(current) {
            return false;
        }
        path.push(current);
        if current == target {
            return true;
        }
        for &child in &self.node(current).children {
            if self.dfs(child, target, visited, path) {
                return true;
            }
        }
        path.pop();
        false
    }

    /// Remove a childless node and detach it from its parents.
    ///
    /// Returns the node's data, or `None` if no node has that ID.
    pub fn remove_node(&mut self, id: &str) -> Result<Option<T>, GraphError> {
        let Some(&idx) = self.index.get(id) else {
            return Ok(None);
        };
        if idx == self.root {
            return Err(GraphError::CannotRemoveRoot);
        }
        if !self.node(idx).children.is_empty() {
            return Err(GraphError::HasChildren(id.to_string()));
        }

        let parents = std::mem::take(&mut self.node_mut(idx).parents);
        for parent in parents {
            self.node_mut(parent).children.retain(|&c| c != idx);
        }

        self.index.remove(id);
        Ok(self.slots[idx].take().map(|node| node.data))
    }

    /// Follow the first-child chain from `start` until a node without children.
    pub fn next_leaf(&self, start: &str) -> Option<&str> {
        let mut current = *self.index.get(start)?;
        while let Some(&first) = self.node(current).children.first() {
            current = first;
        }
        Some(&self.node(current).id)
    }

    /// Remove every non-root node leaves first, returning `(id, data)` in removal order.
    ///
    /// Each step takes [`Graph::next_leaf`] of the root, so a node is only removed
    /// after all of its children.
    pub fn drain_leaves(&mut self) -> Vec<(String, T)> {
        let mut drained = Vec::with_capacity(self.len().saturating_sub(1));
        while !self.is_empty() {
            let root_id = self.root_id().to_string();
            let Some(leaf) = self.next_leaf(&root_id).map(str::to_string) else {
                break;
            };
            if leaf == root_id {
                break;
            }
            match self.remove_node(&leaf) {
                Ok(Some(data)) => drained.push((leaf, data)),
                _ => break,
            }
        }
        drained
    }

    /// Render the graph in Graphviz DOT format, one vertex per node ID.
    pub fn to_dot(&self) -> String {
        let mut rendered = petgraph::Graph::<String, &str>::new();
        let mut vertices = HashMap::new();
        for (idx, slot) in self.slots.iter().enumerate() {
            if let Some(node) = slot {
                vertices.insert(idx, rendered.add_node(node.id.clone()));
            }
        }
        for (idx, slot) in self.slots.iter().enumerate() {
            if let Some(node) = slot {
                for child in &node.children {
                    if let (Some(&a), Some(&b)) = (vertices.get(&idx), vertices.get(child)) {
                        rendered.add_edge(a, b, "");
                    }
                }
            }
        }
        format!("{}", Dot::with_config(&rendered, &[Config::EdgeNoLabel]))
    }
}
