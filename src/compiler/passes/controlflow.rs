//! Block-level control-flow cleanup: condition detection and block merging.
//!
//! The reader lowers every conditional branch to
//!
//! ```text
//! Block B { ...; if (cond) br T; br F }
//! ```
//!
//! [`ConditionDetection`] folds a target block that is only reachable from `B`
//! into the `if`, and [`BlockMerging`] appends a block to its only predecessor.
//! Both run post-order, so the blocks they absorb are already in final form.

use crate::{
    compiler::{passes::utils::offset_of, BlockContext, BlockTransform, EventKind, TransformContext},
    il::{
        patterns::{match_branch, match_if, match_nop},
        Function, InstrId, InstructionFlags, InstructionKind,
    },
    Result,
};

/// Returns `true` if `target` is a block of `container` other than its entry
/// whose only incoming edge is a branch.
fn has_single_predecessor(f: &Function, container: InstrId, target: InstrId) -> bool {
    f.parent(target) == Some(container)
        && f.entry_block(container) != Some(target)
        && f.incoming_edge_count(target) == 1
}

/// Moves all statements of `source` into a fresh detached block, dropping a
/// trailing `br drop_branch_to`.
fn take_statements(f: &mut Function, source: InstrId, drop_branch_to: Option<InstrId>) -> Result<InstrId> {
    let nested = f.create_block();
    let mut count = f.block_instructions(source).len();
    if let (Some(target), Some(&last)) = (drop_branch_to, f.block_instructions(source).last()) {
        if match_branch(f, last) == Some(target) {
            f.remove_instruction(source, count - 1)?;
            count -= 1;
        }
    }
    for _ in 0..count {
        let inst = f.remove_instruction(source, 0)?;
        f.push_instruction(nested, inst)?;
    }
    Ok(nested)
}

fn remove_from_container(f: &mut Function, container: InstrId, block: InstrId) -> Result<()> {
    if let Some(index) = f.container_blocks(container).iter().position(|&b| b == block) {
        f.remove_block(container, index)?;
    }
    Ok(())
}

/// Builds `if` statements from conditional branches to single-predecessor blocks.
///
/// ```text
/// if (c) br T; br F     T: { S; br F }          --> if (c) { S }; br F
/// if (c) br T; br F     F: { S; br T }          --> if (!c) { S }; br T
/// if (c) br T; br F     T: { S; <unreachable> } --> if (c) { S; <unreachable> }; br F
/// ```
#[derive(Debug, Default)]
pub struct ConditionDetection;

impl ConditionDetection {
    /// Creates the transform.
    #[must_use]
    pub fn new() -> Self {
        ConditionDetection
    }

    /// The trailing `if (cond) br T; br F` of `block`, as `(if, T, F)`.
    fn conditional_tail(f: &Function, block: InstrId) -> Option<(InstrId, InstrId, InstrId)> {
        let statements = f.block_instructions(block);
        let [.., branch_if, fallthrough] = statements else {
            return None;
        };
        let (_, true_inst, false_inst) = match_if(f, *branch_if)?;
        if !match_nop(f, false_inst) {
            return None;
        }
        let target = match_branch(f, true_inst)?;
        let fallthrough_target = match_branch(f, *fallthrough)?;
        (target != fallthrough_target).then_some((*branch_if, target, fallthrough_target))
    }

    fn fold_true_target(
        f: &mut Function,
        block: InstrId,
        branch_if: InstrId,
        target: InstrId,
        fallthrough: InstrId,
    ) -> Result<bool> {
        let Some(container) = f.parent(block) else {
            return Ok(false);
        };
        if target == block || !has_single_predecessor(f, container, target) {
            return Ok(false);
        }
        let Some(&last) = f.block_instructions(target).last() else {
            return Ok(false);
        };
        let ends_in_fallthrough = match_branch(f, last) == Some(fallthrough);
        if !ends_in_fallthrough && !f.flags(last).contains(InstructionFlags::END_POINT_UNREACHABLE) {
            return Ok(false);
        }

        let InstructionKind::IfInstruction { true_inst, .. } = *f.kind(branch_if) else {
            return Ok(false);
        };
        // Dropping the `br T` leaves T without predecessors before it is removed.
        f.detach(true_inst)?;
        let nested = take_statements(f, target, Some(fallthrough))?;
        remove_from_container(f, container, target)?;
        let placeholder = f
            .children(branch_if)
            .get(1)
            .copied()
            .ok_or_else(|| crate::Error::AnalysisFailed("if without true branch".into()))?;
        f.replace_child(branch_if, placeholder, nested)?;
        Ok(true)
    }

    fn fold_false_target(
        f: &mut Function,
        block: InstrId,
        branch_if: InstrId,
        target: InstrId,
        fallthrough: InstrId,
    ) -> Result<bool> {
        let Some(container) = f.parent(block) else {
            return Ok(false);
        };
        if fallthrough == block || !has_single_predecessor(f, container, fallthrough) {
            return Ok(false);
        }
        let Some(&last) = f.block_instructions(fallthrough).last() else {
            return Ok(false);
        };
        if match_branch(f, last) != Some(target) {
            return Ok(false);
        }

        let InstructionKind::IfInstruction {
            condition,
            true_inst,
            ..
        } = *f.kind(branch_if)
        else {
            return Ok(false);
        };
        let len = f.block_instructions(block).len();
        // `br F` becomes `br T`; the `br T` inside the if goes away.
        let continue_at = f.create(InstructionKind::Branch { target });
        f.set_instruction(block, len - 1, continue_at)?;
        f.detach(true_inst)?;

        let range = f.range(condition);
        let condition = f.detach(condition)?;
        let negated = f.create_at(InstructionKind::LogicNot(condition), range);
        let old_condition = f
            .children(branch_if)
            .first()
            .copied()
            .ok_or_else(|| crate::Error::AnalysisFailed("if without condition".into()))?;
        f.replace_child(branch_if, old_condition, negated)?;

        let nested = take_statements(f, fallthrough, Some(target))?;
        remove_from_container(f, container, fallthrough)?;
        let placeholder = f
            .children(branch_if)
            .get(1)
            .copied()
            .ok_or_else(|| crate::Error::AnalysisFailed("if without true branch".into()))?;
        f.replace_child(branch_if, placeholder, nested)?;
        Ok(true)
    }
}

impl BlockTransform for ConditionDetection {
    fn name(&self) -> &'static str {
        "condition-detection"
    }

    fn run(
        &self,
        f: &mut Function,
        block: InstrId,
        ctx: &TransformContext<'_>,
        _block_ctx: BlockContext<'_>,
    ) -> Result<bool> {
        let Some((branch_if, target, fallthrough)) = Self::conditional_tail(f, block) else {
            return Ok(false);
        };
        let folded = Self::fold_true_target(f, block, branch_if, target, fallthrough)?
            || Self::fold_false_target(f, block, branch_if, target, fallthrough)?;
        if folded {
            ctx.record(EventKind::ConditionDetected, self.name(), offset_of(f, branch_if))
                .message(format!("if at block {:?}", block));
        }
        Ok(folded)
    }
}

/// Appends a block to its predecessor when the predecessor ends in the only
/// branch to it.
///
/// ```text
/// B: { S1; br C }    C (1 incoming): { S2 }    -->    B: { S1; S2 }
/// ```
#[derive(Debug, Default)]
pub struct BlockMerging;

impl BlockMerging {
    /// Creates the transform.
    #[must_use]
    pub fn new() -> Self {
        BlockMerging
    }
}

impl BlockTransform for BlockMerging {
    fn name(&self) -> &'static str {
        "block-merging"
    }

    fn run(
        &self,
        f: &mut Function,
        block: InstrId,
        ctx: &TransformContext<'_>,
        _block_ctx: BlockContext<'_>,
    ) -> Result<bool> {
        let Some(container) = f.parent(block) else {
            return Ok(false);
        };
        let mut changed = false;
        loop {
            ctx.check_cancelled()?;
            let Some(&last) = f.block_instructions(block).last() else {
                break;
            };
            let Some(successor) = match_branch(f, last) else {
                break;
            };
            if successor == block
                || f.block_final(successor).is_some()
                || !has_single_predecessor(f, container, successor)
            {
                break;
            }
            let offset = offset_of(f, last);
            let len = f.block_instructions(block).len();
            f.remove_instruction(block, len - 1)?;
            let count = f.block_instructions(successor).len();
            for _ in 0..count {
                let inst = f.remove_instruction(successor, 0)?;
                f.push_instruction(block, inst)?;
            }
            remove_from_container(f, container, successor)?;
            ctx.record(EventKind::BlockMerged, self.name(), offset)
                .message(format!("{:?} into {:?}", successor, block));
            changed = true;
        }
        Ok(changed)
    }
}
