//! Dominator tree computation.
//!
//! A node `d` **dominates** a node `n` if every path from the entry node to `n`
//! must pass through `d`. The **immediate dominator** of `n` is the unique node
//! that strictly dominates `n` but does not strictly dominate any other
//! dominator of `n`. Making each node's immediate dominator its parent yields
//! the dominator tree, rooted at the entry.
//!
//! # Algorithm
//!
//! Cooper, Harvey and Kennedy, "A Simple, Fast Dominance Algorithm": iterate
//! over the nodes in reverse post-order, intersecting the dominator chains of
//! all already processed predecessors, until nothing changes. Control-flow
//! graphs of single method bodies are small and mostly reducible, where this
//! converges in two or three sweeps.
//!
//! Nodes unreachable from the entry have no immediate dominator and do not
//! appear in the tree.

use crate::{
    utils::{
        graph::{reverse_postorder, NodeId, Predecessors, Successors},
        CancellationToken,
    },
    Error, Result,
};

/// The dominator tree of a rooted graph.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: NodeId,
    idom: Vec<Option<NodeId>>,
    children: Vec<Vec<NodeId>>,
}

impl DominatorTree {
    /// The root of the tree.
    #[inline]
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the immediate dominator, or `None` for the entry and for unreachable nodes.
    #[inline]
    #[must_use]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        if node == self.entry {
            None
        } else {
            self.idom.get(node.index()).copied().flatten()
        }
    }

    /// Returns `true` if `node` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        node == self.entry || self.immediate_dominator(node).is_some()
    }

    /// Returns `true` if `a` dominates `b`. Every node dominates itself.
    #[must_use]
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.immediate_dominator(current) {
                Some(idom) => current = idom,
                None => return false,
            }
        }
    }

    /// Returns `true` if `a` dominates `b` and `a != b`.
    #[inline]
    #[must_use]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// The nodes immediately dominated by `node`, in ascending id order.
    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.children
            .get(node.index())
            .map_or(&[], |c| c.as_slice())
    }

    /// Distance from the entry in the dominator tree.
    #[must_use]
    pub fn depth(&self, node: NodeId) -> usize {
        let mut depth = 0;
        let mut current = node;
        while let Some(idom) = self.immediate_dominator(current) {
            current = idom;
            depth += 1;
        }
        depth
    }
}

/// Computes the dominator tree of `graph` rooted at `entry`.
///
/// # Arguments
///
/// * `graph` - The graph to analyze
/// * `entry` - The root node
/// * `cancel` - Polled once per sweep over the graph
///
/// # Errors
///
/// Returns [`Error::GraphError`] if `entry` is not a node of the graph,
/// [`Error::Cancelled`] if `cancel` was triggered.
pub fn compute_dominators<G>(
    graph: &G,
    entry: NodeId,
    cancel: &CancellationToken,
) -> Result<DominatorTree>
where
    G: Successors + Predecessors,
{
    let node_count = graph.node_count();
    if entry.index() >= node_count {
        return Err(Error::GraphError(format!(
            "entry node {} does not exist in graph with {} nodes",
            entry, node_count
        )));
    }

    let rpo = reverse_postorder(graph, entry);
    let mut order = vec![usize::MAX; node_count];
    for (position, node) in rpo.iter().enumerate() {
        order[node.index()] = position;
    }

    let mut idom: Vec<Option<NodeId>> = vec![None; node_count];
    idom[entry.index()] = Some(entry);

    let mut changed = true;
    while changed {
        cancel.check()?;
        changed = false;

        for &node in rpo.iter().skip(1) {
            let mut new_idom: Option<NodeId> = None;
            for pred in graph.predecessors(node) {
                if idom[pred.index()].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, &order, pred, current)?,
                });
            }

            let Some(new_idom) = new_idom else {
                return Err(Error::GraphError(format!(
                    "node {} is reachable but has no processed predecessor",
                    node
                )));
            };
            if idom[node.index()] != Some(new_idom) {
                idom[node.index()] = Some(new_idom);
                changed = true;
            }
        }
    }

    let mut children = vec![Vec::new(); node_count];
    for (index, dom) in idom.iter().enumerate() {
        if let Some(dom) = dom {
            if index != entry.index() {
                children[dom.index()].push(NodeId::new(index));
            }
        }
    }

    Ok(DominatorTree {
        entry,
        idom,
        children,
    })
}

fn intersect(
    idom: &[Option<NodeId>],
    order: &[usize],
    mut a: NodeId,
    mut b: NodeId,
) -> Result<NodeId> {
    while a != b {
        while order[a.index()] > order[b.index()] {
            a = idom[a.index()].ok_or_else(|| broken_chain(a))?;
        }
        while order[b.index()] > order[a.index()] {
            b = idom[b.index()].ok_or_else(|| broken_chain(b))?;
        }
    }
    Ok(a)
}

fn broken_chain(node: NodeId) -> Error {
    Error::GraphError(format!("dominator chain of {} is incomplete", node))
}
