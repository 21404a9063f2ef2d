//! Trait definitions the graph algorithms are written against.

use crate::utils::graph::NodeId;

/// Core graph properties: node count and node iteration.
pub trait GraphBase {
    /// Number of nodes; valid ids are `0..node_count()`.
    fn node_count(&self) -> usize;

    /// Iterates all node ids.
    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.node_count()).map(NodeId::new)
    }
}

/// Forward edge traversal.
pub trait Successors: GraphBase {
    /// Iterates the targets of the outgoing edges of `node`.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Backward edge traversal.
pub trait Predecessors: GraphBase {
    /// Iterates the sources of the incoming edges of `node`.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}
