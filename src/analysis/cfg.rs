//! Control-flow graph over the blocks of one container.
//!
//! The graph is a snapshot: it is built from the container as it is when
//! [`ControlFlowGraph::build`] runs and does not follow later edits. Transforms
//! that restructure blocks keep using the old dominator order for the rest of
//! the engine run, which is what the block transform engine expects.
//!
//! Nodes are the reachable blocks numbered in reverse post-order, so node 0 is
//! always the entry block. Edges are the branches inside a block (at any depth)
//! that target another block of the same container; `leave` exits the container
//! and contributes no edge.

use std::collections::{BTreeSet, HashMap};

use crate::{
    il::{Function, InstrId, InstructionKind},
    utils::{
        graph::{
            compute_dominators, reverse_postorder, DirectedGraph, DominatorTree, GraphBase,
            NodeId, Predecessors, Successors,
        },
        CancellationToken,
    },
    Error, Result,
};

/// Snapshot of the control flow between the blocks of a container.
#[derive(Debug)]
pub struct ControlFlowGraph {
    container: InstrId,
    graph: DirectedGraph<InstrId>,
    blocks: Vec<InstrId>,
    nodes: HashMap<InstrId, NodeId>,
    dominators: DominatorTree,
}

impl ControlFlowGraph {
    /// Builds the graph and dominator tree for `container`.
    ///
    /// # Arguments
    ///
    /// * `function` - The function owning the container
    /// * `container` - A [`InstructionKind::BlockContainer`]
    /// * `cancel` - Checked between construction phases and dominator sweeps
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if `container` is not a container or has no
    /// entry block, and [`Error::Cancelled`] on cancellation.
    pub fn build(function: &Function, container: InstrId, cancel: &CancellationToken) -> Result<Self> {
        if !matches!(function.kind(container), InstructionKind::BlockContainer { .. }) {
            return Err(Error::GraphError(format!(
                "{:?} is not a block container",
                container
            )));
        }
        let blocks = function.container_blocks(container);
        if blocks.is_empty() {
            return Err(Error::GraphError(format!(
                "container {:?} has no entry block",
                container
            )));
        }

        // Phase 1: every block, edges in container order.
        let index_of: HashMap<InstrId, usize> =
            blocks.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let mut full: DirectedGraph<InstrId> = DirectedGraph::with_capacity(blocks.len());
        for block in blocks {
            full.add_node(*block);
        }
        for (source, block) in blocks.iter().enumerate() {
            for target in branch_targets(function, *block) {
                if let Some(&target) = index_of.get(&target) {
                    full.add_edge(NodeId::new(source), NodeId::new(target))?;
                }
            }
        }
        cancel.check()?;

        // Phase 2: renumber reachable blocks in reverse post-order.
        let order = reverse_postorder(&full, NodeId::new(0));
        if order.first().map(|n| n.index()) != Some(0) {
            return Err(Error::GraphError(format!(
                "entry block of {:?} is not reachable from itself",
                container
            )));
        }
        let mut renumber = vec![None; blocks.len()];
        let mut graph = DirectedGraph::with_capacity(order.len());
        let mut nodes = HashMap::with_capacity(order.len());
        let mut node_blocks = Vec::with_capacity(order.len());
        for old in &order {
            let block = blocks[old.index()];
            let node = graph.add_node(block);
            node_blocks.push(block);
            renumber[old.index()] = Some(node);
            nodes.insert(block, node);
        }
        for old in &order {
            let Some(source) = renumber[old.index()] else {
                continue;
            };
            for succ in full.successors(*old) {
                if let Some(target) = renumber[succ.index()] {
                    graph.add_edge(source, target)?;
                }
            }
        }
        cancel.check()?;

        // Phase 3: dominators.
        let dominators = compute_dominators(&graph, NodeId::new(0), cancel)?;
        log::trace!(
            "cfg for {:?}: {} of {} blocks reachable",
            container,
            graph.node_count(),
            blocks.len()
        );

        Ok(ControlFlowGraph {
            container,
            graph,
            blocks: node_blocks,
            nodes,
            dominators,
        })
    }

    /// The container this graph was built from.
    #[must_use]
    pub fn container(&self) -> InstrId {
        self.container
    }

    /// Number of reachable blocks.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// The entry node.
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.dominators.entry()
    }

    /// The block of `node`.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not a node of this graph.
    #[must_use]
    pub fn block(&self, node: NodeId) -> InstrId {
        self.blocks[node.index()]
    }

    /// The node of `block`, `None` for unreachable or foreign blocks.
    #[must_use]
    pub fn node_of(&self, block: InstrId) -> Option<NodeId> {
        self.nodes.get(&block).copied()
    }

    /// Blocks in node order (reverse post-order).
    #[must_use]
    pub fn blocks(&self) -> &[InstrId] {
        &self.blocks
    }

    /// Successor nodes.
    pub fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.successors(node)
    }

    /// Predecessor nodes.
    pub fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.predecessors(node)
    }

    /// The dominator tree.
    #[must_use]
    pub fn dominators(&self) -> &DominatorTree {
        &self.dominators
    }

    /// Children of `node` in the dominator tree.
    #[must_use]
    pub fn dominator_children(&self, node: NodeId) -> &[NodeId] {
        self.dominators.children(node)
    }

    /// Returns `true` if block `a` dominates block `b`.
    #[must_use]
    pub fn block_dominates(&self, a: InstrId, b: InstrId) -> bool {
        match (self.node_of(a), self.node_of(b)) {
            (Some(a), Some(b)) => self.dominators.dominates(a, b),
            _ => false,
        }
    }

    /// Sources of the back edges into `header`: predecessors that `header`
    /// dominates.
    #[must_use]
    pub fn back_edges(&self, header: NodeId) -> Vec<NodeId> {
        self.predecessors(header)
            .filter(|&pred| self.dominators.dominates(header, pred))
            .collect()
    }

    /// The natural loop headed by `header`, in node order.
    ///
    /// Contains `header` and every node that reaches a back edge source
    /// without passing through `header`. Empty if `header` has no back edges.
    #[must_use]
    pub fn natural_loop(&self, header: NodeId) -> Vec<NodeId> {
        let mut worklist = self.back_edges(header);
        if worklist.is_empty() {
            return Vec::new();
        }
        let mut body = BTreeSet::from([header]);
        while let Some(node) = worklist.pop() {
            if body.insert(node) {
                worklist.extend(self.predecessors(node).filter(|p| !body.contains(p)));
            }
        }
        body.into_iter().collect()
    }
}

/// Targets of all branches inside `block`, in evaluation order.
fn branch_targets(function: &Function, block: InstrId) -> Vec<InstrId> {
    function
        .descendants(block)
        .into_iter()
        .filter_map(|id| match function.kind(id) {
            InstructionKind::Branch { target } => Some(*target),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typesystem::Type;

    /// entry -> (a | b) -> exit, plus an unreachable block.
    fn diamond() -> (Function, Vec<InstrId>) {
        let mut f = Function::new("m", Type::Void);
        let body = f.body();
        let blocks: Vec<InstrId> = (0..5).map(|i| f.create_block_with_label(i)).collect();
        for b in &blocks {
            f.add_block(body, *b).unwrap();
        }
        let branch = |f: &mut Function, from: InstrId, to: InstrId| {
            let br = f.create(InstructionKind::Branch { target: to });
            f.push_instruction(from, br).unwrap();
        };
        let cond = f.create(InstructionKind::LdcI4(1));
        let to_b = f.create(InstructionKind::Branch { target: blocks[2] });
        let nop = f.create(InstructionKind::Nop);
        let branch_if = f.create(InstructionKind::IfInstruction {
            condition: cond,
            true_inst: to_b,
            false_inst: nop,
        });
        f.push_instruction(blocks[0], branch_if).unwrap();
        branch(&mut f, blocks[0], blocks[1]);
        branch(&mut f, blocks[1], blocks[3]);
        branch(&mut f, blocks[2], blocks[3]);
        let nop = f.create(InstructionKind::Nop);
        let leave = f.create(InstructionKind::Leave {
            target: body,
            value: nop,
        });
        f.push_instruction(blocks[3], leave).unwrap();
        (f, blocks)
    }

    #[test]
    fn test_reachable_blocks_and_dominators() {
        let (f, blocks) = diamond();
        let cfg = ControlFlowGraph::build(&f, f.body(), &CancellationToken::new()).unwrap();
        assert_eq!(cfg.node_count(), 4);
        assert_eq!(cfg.block(cfg.entry()), blocks[0]);
        assert!(cfg.node_of(blocks[4]).is_none());

        let exit = cfg.node_of(blocks[3]).unwrap();
        assert_eq!(cfg.dominators().immediate_dominator(exit), Some(cfg.entry()));
        assert!(cfg.block_dominates(blocks[0], blocks[2]));
        assert!(!cfg.block_dominates(blocks[1], blocks[3]));
        assert_eq!(cfg.predecessors(exit).count(), 2);
        assert_eq!(cfg.dominator_children(cfg.entry()).len(), 3);
    }

    #[test]
    fn test_natural_loop_of_header() {
        // b0 -> b1 -> b2 -> b1, b1 -> b3
        let mut f = Function::new("m", Type::Void);
        let body = f.body();
        let blocks: Vec<InstrId> = (0..4).map(|i| f.create_block_with_label(i)).collect();
        for b in &blocks {
            f.add_block(body, *b).unwrap();
        }
        let branch = |f: &mut Function, from: InstrId, to: InstrId| {
            let br = f.create(InstructionKind::Branch { target: to });
            f.push_instruction(from, br).unwrap();
        };
        let cond = f.create(InstructionKind::LdcI4(1));
        let exit = f.create(InstructionKind::Branch { target: blocks[3] });
        let nop = f.create(InstructionKind::Nop);
        let check = f.create(InstructionKind::IfInstruction {
            condition: cond,
            true_inst: exit,
            false_inst: nop,
        });
        branch(&mut f, blocks[0], blocks[1]);
        f.push_instruction(blocks[1], check).unwrap();
        branch(&mut f, blocks[1], blocks[2]);
        branch(&mut f, blocks[2], blocks[1]);

        let cfg = ControlFlowGraph::build(&f, body, &CancellationToken::new()).unwrap();
        let header = cfg.node_of(blocks[1]).unwrap();
        let latch = cfg.node_of(blocks[2]).unwrap();
        assert_eq!(cfg.back_edges(header), vec![latch]);
        let members: Vec<InstrId> = cfg.natural_loop(header).into_iter().map(|n| cfg.block(n)).collect();
        assert_eq!(members, vec![blocks[1], blocks[2]]);
        assert!(cfg.natural_loop(cfg.entry()).is_empty());
    }

    #[test]
    fn test_empty_container_is_an_error() {
        let f = Function::new("m", Type::Void);
        let result = ControlFlowGraph::build(&f, f.body(), &CancellationToken::new());
        assert!(matches!(result, Err(Error::GraphError(_))));
    }

    #[test]
    fn test_cancellation() {
        let (f, _) = diamond();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = ControlFlowGraph::build(&f, f.body(), &cancel);
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
