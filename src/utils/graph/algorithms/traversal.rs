//! Depth-first traversal orders.
//!
//! - [`postorder`] - Every node after all nodes reachable through its successors
//! - [`reverse_postorder`] - The order forward data-flow problems converge fastest in
//!
//! Both return collected vectors since the order needs the full traversal anyway.
//! Nodes not reachable from `start` are omitted.

use crate::utils::graph::{NodeId, Successors};

/// Returns the nodes reachable from `start` in depth-first post-order.
///
/// Successors are explored in the order the graph yields them. The walk is
/// iterative so deeply nested control flow cannot overflow the call stack.
#[must_use]
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut order = Vec::with_capacity(node_count);
    // (node, successors not yet explored, next successor index)
    let mut stack: Vec<(NodeId, Vec<NodeId>, usize)> = Vec::new();

    visited[start.index()] = true;
    stack.push((start, graph.successors(start).collect(), 0));

    while let Some((node, succs, next)) = stack.last_mut() {
        if let Some(&succ) = succs.get(*next) {
            *next += 1;
            if !visited[succ.index()] {
                visited[succ.index()] = true;
                let children = graph.successors(succ).collect();
                stack.push((succ, children, 0));
            }
        } else {
            order.push(*node);
            stack.pop();
        }
    }

    order
}

/// Returns the nodes reachable from `start` in reverse post-order.
///
/// `start` is always first; for every edge `a -> b` that is not a back edge,
/// `a` comes before `b`.
#[must_use]
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut order = postorder(graph, start);
    order.reverse();
    order
}
