//! Loop detection.
//!
//! A block `H` heads a loop if it dominates one of its predecessors; the edge
//! from that predecessor is a back edge. The natural loop of `H` is `H` plus
//! every block that reaches a back edge source without passing through `H`.
//! The loop moves into a new [`ContainerKind::Loop`] container:
//!
//! ```text
//! H: { S; if (c) br X; br B }         H: { loop L; br X }
//! B: { T; br H }              -->     L:   E: { S; if (c) leave L; br B }
//! X: { ... }                               B: { T; br E }
//!                                     X: { ... }
//! ```
//!
//! Branches to the exit most branches inside the loop agree on become
//! `leave L`. Any other exit stays a branch out of the container.

use std::collections::HashSet;

use crate::{
    analysis::ControlFlowGraph,
    compiler::{passes::utils::offset_of, BlockContext, BlockTransform, EventKind, TransformContext},
    il::{
        patterns::{match_branch, match_if, match_nop},
        ContainerKind, Function, InstrId, InstructionKind,
    },
    Error, Result,
};

/// Wraps natural loops in loop containers.
///
/// Runs pre-order, so an outer loop is formed before the blocks of its body
/// are visited. Loops nested inside it are found when the new container is
/// processed on the next run of the block stage.
#[derive(Debug, Default)]
pub struct LoopDetection;

impl LoopDetection {
    /// Creates the transform.
    #[must_use]
    pub fn new() -> Self {
        LoopDetection
    }

    /// Blocks of the natural loop headed by `header`, without `header`, in
    /// container order. `None` if `header` has no back edges.
    fn loop_blocks(
        f: &Function,
        container: InstrId,
        header: InstrId,
        ctx: &TransformContext<'_>,
    ) -> Result<Option<Vec<InstrId>>> {
        // Earlier transforms of this run may have restructured the container.
        let cfg = ControlFlowGraph::build(f, container, ctx.cancel)?;
        let Some(node) = cfg.node_of(header) else {
            return Ok(None);
        };
        let members: HashSet<InstrId> = cfg
            .natural_loop(node)
            .into_iter()
            .map(|n| cfg.block(n))
            .collect();
        if members.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            f.container_blocks(container)
                .iter()
                .copied()
                .filter(|b| *b != header && members.contains(b))
                .collect(),
        ))
    }

    /// Branches directly inside `lp` (not in a nested container) that target `target`.
    fn branches_to(f: &Function, lp: InstrId, target: InstrId) -> Vec<InstrId> {
        f.descendants(lp)
            .into_iter()
            .filter(|&inst| match_branch(f, inst) == Some(target))
            .filter(|&inst| f.enclosing_container(inst) == Some(lp))
            .collect()
    }

    /// The block of `container` that most branches leaving `lp` target.
    ///
    /// Ties go to the block that comes first in the container.
    fn choose_exit(f: &Function, lp: InstrId, container: InstrId) -> Option<InstrId> {
        f.container_blocks(container)
            .iter()
            .map(|&block| (block, Self::branches_to(f, lp, block).len()))
            .filter(|&(_, count)| count > 0)
            .fold(None, |best: Option<(InstrId, usize)>, candidate| match best {
                Some(best) if best.1 >= candidate.1 => Some(best),
                _ => Some(candidate),
            })
            .map(|(block, _)| block)
    }

    /// `if (c) br T; leave L`  -->  `if (!c) leave L; br T`
    ///
    /// Puts the exit into the `if`, so the loop body continues at block level.
    fn exit_first(f: &mut Function, lp: InstrId, block: InstrId) -> Result<bool> {
        let &[.., branch_if, leave] = f.block_instructions(block) else {
            return Ok(false);
        };
        if !matches!(*f.kind(leave), InstructionKind::Leave { target, .. } if target == lp) {
            return Ok(false);
        }
        let Some((condition, true_inst, false_inst)) = match_if(f, branch_if) else {
            return Ok(false);
        };
        if !match_nop(f, false_inst) || match_branch(f, true_inst).is_none() {
            return Ok(false);
        }

        let len = f.block_instructions(block).len();
        let leave = f.remove_instruction(block, len - 1)?;
        let branch = f.detach(true_inst)?;
        let placeholder = f
            .children(branch_if)
            .get(1)
            .copied()
            .ok_or_else(|| Error::AnalysisFailed("if without true branch".into()))?;
        f.replace_child(branch_if, placeholder, leave)?;
        f.push_instruction(block, branch)?;

        let range = f.range(condition);
        let condition = f.detach(condition)?;
        let negated = f.create_at(InstructionKind::LogicNot(condition), range);
        let old_condition = f
            .children(branch_if)
            .first()
            .copied()
            .ok_or_else(|| Error::AnalysisFailed("if without condition".into()))?;
        f.replace_child(branch_if, old_condition, negated)?;
        Ok(true)
    }
}

impl BlockTransform for LoopDetection {
    fn name(&self) -> &'static str {
        "loop-detection"
    }

    fn run(
        &self,
        f: &mut Function,
        header: InstrId,
        ctx: &TransformContext<'_>,
        _block_ctx: BlockContext<'_>,
    ) -> Result<bool> {
        if !ctx.settings.loop_detection {
            return Ok(false);
        }
        let Some(container) = f.parent(header) else {
            return Ok(false);
        };
        let is_loop = matches!(
            f.kind(container),
            InstructionKind::BlockContainer {
                kind: ContainerKind::Loop,
                ..
            }
        );
        // Branches to the entry of a loop container continue that loop.
        if is_loop && f.entry_block(container) == Some(header) {
            return Ok(false);
        }
        let Some(blocks) = Self::loop_blocks(f, container, header, ctx)? else {
            return Ok(false);
        };
        let offset = f
            .block_instructions(header)
            .first()
            .map_or(offset_of(f, header), |&first| offset_of(f, first));

        // The header keeps its place and its incoming edges; its statements
        // become the entry of the loop.
        let lp = f.create_container(ContainerKind::Loop);
        let entry = f.create_block_with_label(f.block_label(header).unwrap_or(0));
        let header_range = f.range(header);
        f.set_range(entry, header_range);
        let count = f.block_instructions(header).len();
        for _ in 0..count {
            let inst = f.remove_instruction(header, 0)?;
            f.push_instruction(entry, inst)?;
        }
        f.add_block(lp, entry)?;
        for &block in &blocks {
            if let Some(index) = f.container_blocks(container).iter().position(|&b| b == block) {
                let block = f.remove_block(container, index)?;
                f.add_block(lp, block)?;
            }
        }

        for inst in f.descendants(lp) {
            if match_branch(f, inst) == Some(header) {
                let range = f.range(inst);
                let next_iteration = f.create_at(InstructionKind::Branch { target: entry }, range);
                f.replace_with(inst, next_iteration)?;
            }
        }

        let exit = Self::choose_exit(f, lp, container);
        if let Some(exit) = exit {
            for inst in Self::branches_to(f, lp, exit) {
                let range = f.range(inst);
                let nop = f.create(InstructionKind::Nop);
                let leave = f.create_at(
                    InstructionKind::Leave {
                        target: lp,
                        value: nop,
                    },
                    range,
                );
                f.replace_with(inst, leave)?;
            }
            for block in f.container_blocks(lp).to_vec() {
                Self::exit_first(f, lp, block)?;
            }
        }

        f.push_instruction(header, lp)?;
        if let Some(exit) = exit {
            let after = f.create(InstructionKind::Branch { target: exit });
            f.push_instruction(header, after)?;
        }

        // Loops nested in the body are found when the new container is visited.
        ctx.request_rerun();
        ctx.record(EventKind::LoopDetected, self.name(), offset)
            .message(format!("loop of {} blocks at {:?}", blocks.len() + 1, header));
        log::trace!("loop at IL_{:04x} in {}", offset, f.name());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::{DecompilerSettings, EventLog},
        il::{patterns::match_logic_not, VariableKind},
        typesystem::{SimpleTypeSystem, Type},
        utils::CancellationToken,
    };

    struct Blocks {
        f: Function,
        blocks: Vec<InstrId>,
    }

    fn blocks(count: u32) -> Blocks {
        let mut f = Function::new("m", Type::Void);
        let body = f.body();
        let blocks: Vec<InstrId> = (0..count).map(|i| f.create_block_with_label(i * 0x10)).collect();
        for b in &blocks {
            f.add_block(body, *b).unwrap();
        }
        Blocks { f, blocks }
    }

    impl Blocks {
        fn br(&mut self, from: usize, to: usize) {
            let br = self.f.create(InstructionKind::Branch {
                target: self.blocks[to],
            });
            self.f.push_instruction(self.blocks[from], br).unwrap();
        }

        fn branch_if(&mut self, from: usize, to: usize) -> InstrId {
            let p = self
                .f
                .add_variable(VariableKind::Parameter, Type::BOOLEAN, "p", Some(0));
            let condition = self.f.create(InstructionKind::LdLoc(p));
            let br = self.f.create(InstructionKind::Branch {
                target: self.blocks[to],
            });
            let nop = self.f.create(InstructionKind::Nop);
            let branch_if = self.f.create(InstructionKind::IfInstruction {
                condition,
                true_inst: br,
                false_inst: nop,
            });
            self.f.push_instruction(self.blocks[from], branch_if).unwrap();
            condition
        }

        fn leave(&mut self, from: usize) {
            let nop = self.f.create(InstructionKind::Nop);
            let body = self.f.body();
            let leave = self.f.create(InstructionKind::Leave {
                target: body,
                value: nop,
            });
            self.f.push_instruction(self.blocks[from], leave).unwrap();
        }

        fn run(&mut self, block: usize) -> (bool, EventLog, bool) {
            let ts = SimpleTypeSystem::new();
            let settings = DecompilerSettings::default();
            let events = EventLog::new();
            let cancel = CancellationToken::new();
            let body = self.f.body();
            let cfg = ControlFlowGraph::build(&self.f, body, &cancel).unwrap();
            let node = cfg.node_of(self.blocks[block]).unwrap();
            let ctx = TransformContext::new("m", &ts, &settings, &events, &cancel);
            let changed = LoopDetection::new()
                .run(&mut self.f, self.blocks[block], &ctx, BlockContext { cfg: &cfg, node })
                .unwrap();
            let rerun = ctx.take_rerun();
            (changed, events, rerun)
        }
    }

    fn loop_of(f: &Function, header: InstrId) -> InstrId {
        let lp = f.block_instructions(header)[0];
        assert!(matches!(
            f.kind(lp),
            InstructionKind::BlockContainer {
                kind: ContainerKind::Loop,
                ..
            }
        ));
        lp
    }

    #[test]
    fn test_while_shaped_loop() {
        // B0: br B1    B1: if (p) br B3; br B2    B2: br B1    B3: leave
        let mut b = blocks(4);
        b.br(0, 1);
        b.branch_if(1, 3);
        b.br(1, 2);
        b.br(2, 1);
        b.leave(3);

        let (changed, events, rerun) = b.run(1);
        assert!(changed);
        assert!(rerun);
        assert!(events.has(EventKind::LoopDetected));

        let body = b.f.body();
        assert_eq!(b.f.container_blocks(body), &[b.blocks[0], b.blocks[1], b.blocks[3]]);
        let header = b.blocks[1];
        let lp = loop_of(&b.f, header);
        assert_eq!(match_branch(&b.f, b.f.block_instructions(header)[1]), Some(b.blocks[3]));

        let loop_blocks = b.f.container_blocks(lp).to_vec();
        assert_eq!(loop_blocks.len(), 2);
        let entry = loop_blocks[0];
        assert_eq!(loop_blocks[1], b.blocks[2]);
        assert_eq!(b.f.block_label(entry), Some(0x10));
        // B2 continues at the new entry; the exit became a leave.
        assert_eq!(match_branch(&b.f, b.f.block_instructions(b.blocks[2])[0]), Some(entry));
        let (_, exit, _) = match_if(&b.f, b.f.block_instructions(entry)[0]).unwrap();
        assert!(matches!(*b.f.kind(exit), InstructionKind::Leave { target, .. } if target == lp));
        assert!(b.f.is_connected(lp));
        assert_eq!(b.f.incoming_edge_count(b.blocks[3]), 1);
        assert_eq!(b.f.incoming_edge_count(header), 1);
        assert_eq!(b.f.incoming_edge_count(b.blocks[2]), 1);
    }

    #[test]
    fn test_exit_moves_into_condition() {
        // B0: br B2    B1: br B2    B2: if (p) br B1; br B3    B3: leave
        let mut b = blocks(4);
        b.br(0, 2);
        b.br(1, 2);
        let condition = b.branch_if(2, 1);
        b.br(2, 3);
        b.leave(3);

        let (changed, _, _) = b.run(2);
        assert!(changed);
        let lp = loop_of(&b.f, b.blocks[2]);
        let entry = b.f.entry_block(lp).unwrap();
        let statements = b.f.block_instructions(entry).to_vec();
        let (negated, exit, _) = match_if(&b.f, statements[0]).unwrap();
        assert_eq!(match_logic_not(&b.f, negated), Some(condition));
        assert!(matches!(*b.f.kind(exit), InstructionKind::Leave { .. }));
        assert_eq!(match_branch(&b.f, statements[1]), Some(b.blocks[1]));
    }

    #[test]
    fn test_endless_loop_has_no_exit() {
        // B0: br B1    B1: br B1
        let mut b = blocks(2);
        b.br(0, 1);
        b.br(1, 1);

        let (changed, _, _) = b.run(1);
        assert!(changed);
        let lp = loop_of(&b.f, b.blocks[1]);
        assert_eq!(b.f.block_instructions(b.blocks[1]).len(), 1);
        let entry = b.f.entry_block(lp).unwrap();
        assert_eq!(match_branch(&b.f, b.f.block_instructions(entry)[0]), Some(entry));
    }

    #[test]
    fn test_blocks_without_back_edges_are_left_alone() {
        // B0: if (p) br B2; br B1    B1: br B2    B2: leave
        let mut b = blocks(3);
        b.branch_if(0, 2);
        b.br(0, 1);
        b.br(1, 2);
        b.leave(2);

        for block in 0..3 {
            let (changed, events, _) = b.run(block);
            assert!(!changed);
            assert!(events.is_empty());
        }
    }

    #[test]
    fn test_loop_entry_is_not_wrapped_again() {
        let mut b = blocks(2);
        b.br(0, 1);
        b.br(1, 1);
        b.run(1);
        let lp = loop_of(&b.f, b.blocks[1]);
        let entry = b.f.entry_block(lp).unwrap();

        let ts = SimpleTypeSystem::new();
        let settings = DecompilerSettings::default();
        let events = EventLog::new();
        let cancel = CancellationToken::new();
        let cfg = ControlFlowGraph::build(&b.f, lp, &cancel).unwrap();
        let ctx = TransformContext::new("m", &ts, &settings, &events, &cancel);
        let changed = LoopDetection::new()
            .run(&mut b.f, entry, &ctx, BlockContext { cfg: &cfg, node: cfg.entry() })
            .unwrap();
        assert!(!changed);
    }
}
