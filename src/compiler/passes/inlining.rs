//! Stack slot inlining.
//!
//! The reader stores every intermediate value into a fresh stack slot. This
//! transform moves such a value back into its single use in the following
//! statement:
//!
//! ```text
//! stloc S_1(call get_Count(ldloc this))
//! call set_Count(ldloc this, binary.add(ldloc S_1, ldc.i4 1))
//! -->
//! call set_Count(ldloc this, binary.add(call get_Count(ldloc this), ldc.i4 1))
//! ```
//!
//! Moving a value changes when it is evaluated: it now runs after everything
//! the next statement evaluates before the load. That is only allowed if all of
//! those earlier evaluations are pure, and if the load is not inside a nested
//! region (branch targets, loop bodies and handlers run at different times).

use crate::{
    compiler::{
        passes::utils::offset_of, EventKind, StatementTransform, TransformContext,
    },
    il::{patterns::match_stloc, Function, InstrId, InstructionKind, VarId, VariableKind},
    Result,
};

/// Inlines single-definition, single-use stack slots into the next statement.
#[derive(Debug, Default)]
pub struct InliningTransform;

impl InliningTransform {
    /// Creates the transform.
    #[must_use]
    pub fn new() -> Self {
        InliningTransform
    }

    /// The load of `variable` that inlining `stloc variable(..)` would replace,
    /// if the variable qualifies.
    fn inlinable_load(f: &Function, variable: VarId, next: InstrId) -> Option<InstrId> {
        let var = f.variable(variable);
        if var.kind != VariableKind::StackSlot
            || !var.is_single_definition()
            || var.load_count() != 1
        {
            return None;
        }
        let load = var.load_instructions()[0];
        f.is_descendant_of(load, next).then_some(load)
    }
}

/// Returns `true` if `load` is the next value `statement` evaluates, apart from
/// pure computations that may be reordered freely.
pub(crate) fn can_move_into(f: &Function, statement: InstrId, load: InstrId) -> bool {
    let mut child = load;
    while child != statement {
        let Some(parent) = f.parent(child) else {
            return false;
        };
        let allowed = match f.kind(parent) {
            InstructionKind::IfInstruction { condition, .. } => *condition == child,
            InstructionKind::Switch { value, .. } => *value == child,
            InstructionKind::Using { resource, .. } => *resource == child,
            InstructionKind::Block { .. }
            | InstructionKind::BlockContainer { .. }
            | InstructionKind::TryFinally { .. }
            | InstructionKind::SwitchSection { .. } => false,
            _ => true,
        };
        if !allowed {
            return false;
        }
        for sibling in f.children(parent) {
            if sibling == child {
                break;
            }
            if !f.is_pure(sibling) {
                return false;
            }
        }
        child = parent;
    }
    true
}

impl StatementTransform for InliningTransform {
    fn name(&self) -> &'static str {
        "inlining"
    }

    fn run(
        &self,
        f: &mut Function,
        block: InstrId,
        pos: usize,
        ctx: &TransformContext<'_>,
    ) -> Result<bool> {
        if !ctx.settings.inlining {
            return Ok(false);
        }
        let instructions = f.block_instructions(block);
        let (Some(&store), Some(&next)) = (instructions.get(pos), instructions.get(pos + 1)) else {
            return Ok(false);
        };
        let Some((variable, value)) = match_stloc(f, store) else {
            return Ok(false);
        };
        let Some(load) = Self::inlinable_load(f, variable, next) else {
            return Ok(false);
        };
        if !can_move_into(f, next, load) {
            return Ok(false);
        }

        let offset = offset_of(f, store);
        f.remove_instruction(block, pos)?;
        let value = f.detach(value)?;
        f.replace_with(load, value)?;

        log::trace!("inlined {} in {}", f.variable(variable).name, f.name());
        ctx.record(EventKind::Inlined, self.name(), offset)
            .message(format!("inlined {}", f.variable(variable).name));
        Ok(true)
    }
}
