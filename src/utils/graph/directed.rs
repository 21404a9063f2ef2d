//! Adjacency-list directed graph.

use crate::{
    utils::graph::{GraphBase, NodeId, Predecessors, Successors},
    Error, Result,
};

/// A directed graph with payload `N` on every node.
///
/// Edges carry no data; parallel edges are allowed and are reported once per
/// insertion by [`Successors::successors`].
#[derive(Debug, Clone)]
pub struct DirectedGraph<N> {
    nodes: Vec<N>,
    outgoing: Vec<Vec<NodeId>>,
    incoming: Vec<Vec<NodeId>>,
}

impl<N> Default for DirectedGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> DirectedGraph<N> {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        DirectedGraph {
            nodes: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }

    /// Creates an empty graph with room for `capacity` nodes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        DirectedGraph {
            nodes: Vec::with_capacity(capacity),
            outgoing: Vec::with_capacity(capacity),
            incoming: Vec::with_capacity(capacity),
        }
    }

    /// Adds a node and returns its id.
    pub fn add_node(&mut self, data: N) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(data);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    /// Adds the edge `source -> target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if either endpoint does not exist.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId) -> Result<()> {
        for node in [source, target] {
            if node.index() >= self.nodes.len() {
                return Err(Error::GraphError(format!(
                    "node {} does not exist in graph with {} nodes",
                    node,
                    self.nodes.len()
                )));
            }
        }
        self.outgoing[source.index()].push(target);
        self.incoming[target.index()].push(source);
        Ok(())
    }

    /// Returns the payload of `node`.
    #[must_use]
    pub fn node(&self, node: NodeId) -> Option<&N> {
        self.nodes.get(node.index())
    }

    /// Iterates `(id, payload)` pairs.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &N)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, data)| (NodeId::new(i), data))
    }
}

impl<N> GraphBase for DirectedGraph<N> {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl<N> Successors for DirectedGraph<N> {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.outgoing
            .get(node.index())
            .into_iter()
            .flatten()
            .copied()
    }
}

impl<N> Predecessors for DirectedGraph<N> {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.incoming
            .get(node.index())
            .into_iter()
            .flatten()
            .copied()
    }
}
