//! Expression-level rewrites inside one statement.
//!
//! Visits every instruction of the statement bottom-up and applies the first
//! applicable rewrite. The statement engine re-runs all transforms after a
//! change, so one rewrite per call is enough.
//!
//! Handled shapes:
//!
//! ```text
//! call set_P(args.., binary.op(call get_P(args..), v))    --> compound.op.new(call get_P(args..), v)
//! call set_P(args.., stloc s(binary.op(..)))              --> stloc s(compound.op.new(..))
//! stobj(t, binary.op(ldobj(t), v))                        --> compound.op.new(ldobj(t), v)
//! logic.not(logic.not(x))                                 --> x
//! logic.not(comp.eq(a, b))                                --> comp.ne(a, b)
//! ```

use crate::{
    compiler::{
        passes::utils::{
            build_compound, matching_getter_and_setter_calls, offset_of,
            unwrap_small_integer_conv, validate_compound_assign,
        },
        EventKind, StatementTransform, TransformContext,
    },
    il::{
        patterns::{
            infer_type, match_binary, match_comp, match_invocation, match_ldobj, match_logic_not,
            match_stloc, match_stobj, matches_structurally,
        },
        ComparisonKind, CompoundEvaluation, Function, InstrId, InstructionKind,
    },
    Result,
};

/// Applies expression-level simplifications and compound assignment folds.
#[derive(Debug, Default)]
pub struct ExpressionTransforms;

impl ExpressionTransforms {
    /// Creates the transform.
    #[must_use]
    pub fn new() -> Self {
        ExpressionTransforms
    }

    fn visit(&self, f: &mut Function, inst: InstrId, ctx: &TransformContext<'_>) -> Result<bool> {
        match f.kind(inst) {
            InstructionKind::Call { .. } if ctx.settings.compound_assignment => {
                self.handle_call_compound_assign(f, inst, ctx)
            }
            InstructionKind::StObj { .. } if ctx.settings.compound_assignment => {
                self.handle_stobj_compound_assign(f, inst, ctx)
            }
            InstructionKind::LogicNot(_) => Self::simplify_logic_not(f, inst),
            _ => Ok(false),
        }
    }

    /// `call set_P(args.., [stloc s(] [conv(] binary.op(call get_P(args..), v) [)] [)])`
    fn handle_call_compound_assign(
        &self,
        f: &mut Function,
        setter: InstrId,
        ctx: &TransformContext<'_>,
    ) -> Result<bool> {
        let Some(call) = match_invocation(f, setter) else {
            return Ok(false);
        };
        let Some(&setter_value) = call.arguments.last() else {
            return Ok(false);
        };
        let (store, value) = match match_stloc(f, setter_value) {
            Some((variable, value)) => (Some(variable), value),
            None => (None, setter_value),
        };
        let (binary, conv) = unwrap_small_integer_conv(f, value);
        let Some(capture) = match_binary(f, binary) else {
            return Ok(false);
        };
        let getter = capture.left;
        let Some(property) = matching_getter_and_setter_calls(f, ctx.type_system, getter, setter)
        else {
            return Ok(false);
        };
        let Some(target_type) =
            match_invocation(f, getter).map(|g| g.method.signature.return_type.clone())
        else {
            return Ok(false);
        };
        if !validate_compound_assign(f, binary, conv, &target_type) {
            return Ok(false);
        }

        let range = f.range(setter);
        let getter = f.detach(getter)?;
        let compound = build_compound(f, binary, getter, target_type, CompoundEvaluation::NewValue)?;
        let replacement = match store {
            Some(variable) => {
                // The store moves to statement level, where it may be inlined.
                ctx.request_rerun();
                f.create_at(
                    InstructionKind::StLoc {
                        variable,
                        value: compound,
                    },
                    range,
                )
            }
            None => {
                f.set_range(compound, range);
                compound
            }
        };
        f.replace_with(setter, replacement)?;

        ctx.record(EventKind::CompoundAssignment, self.name(), range.start)
            .message(format!("compound assignment to {}", property.name));
        Ok(true)
    }

    /// `stobj(target, [conv(] binary.op(ldobj(target), v) [)])`
    fn handle_stobj_compound_assign(
        &self,
        f: &mut Function,
        stobj: InstrId,
        ctx: &TransformContext<'_>,
    ) -> Result<bool> {
        let Some((target, value, _)) = match_stobj(f, stobj) else {
            return Ok(false);
        };
        let (binary, conv) = unwrap_small_integer_conv(f, value);
        let Some(capture) = match_binary(f, binary) else {
            return Ok(false);
        };
        let Some((load_target, load_type)) = match_ldobj(f, capture.left) else {
            return Ok(false);
        };
        if !f.is_pure(load_target) || !matches_structurally(f, target, load_target) {
            return Ok(false);
        }

        // `ldobj` may only know the stack type (`ldind.i4` on a `ref MyEnum`);
        // prefer the pointee type of the address when it has the same size.
        let load_type = load_type.clone();
        let target_type = match infer_type(f, load_target).element_type() {
            Some(pointee) if !pointee.is_unknown() && pointee.size() == load_type.size() => {
                pointee.clone()
            }
            _ => load_type,
        };
        if !validate_compound_assign(f, binary, conv, &target_type) {
            return Ok(false);
        }

        let range = f.range(stobj);
        let load = f.detach(capture.left)?;
        let compound = build_compound(f, binary, load, target_type, CompoundEvaluation::NewValue)?;
        f.set_range(compound, range);
        f.replace_with(stobj, compound)?;

        ctx.record(EventKind::CompoundAssignment, self.name(), range.start)
            .message("compound assignment through address");
        Ok(true)
    }

    fn simplify_logic_not(f: &mut Function, not: InstrId) -> Result<bool> {
        let Some(argument) = match_logic_not(f, not) else {
            return Ok(false);
        };
        if f.parent(not).is_none() {
            return Ok(false);
        }
        if let Some(inner) = match_logic_not(f, argument) {
            let inner = f.detach(inner)?;
            f.replace_with(not, inner)?;
            return Ok(true);
        }
        // Ordered comparisons are left alone: negating them is wrong for NaN.
        let Some((kind, sign, _, _)) = match_comp(f, argument) else {
            return Ok(false);
        };
        if !matches!(kind, ComparisonKind::Equality | ComparisonKind::Inequality) {
            return Ok(false);
        }
        let InstructionKind::Comp { left, right, .. } = *f.kind(argument) else {
            return Ok(false);
        };
        let range = f.range(not);
        let left = f.detach(left)?;
        let right = f.detach(right)?;
        let negated = f.create_at(
            InstructionKind::Comp {
                kind: kind.negate(),
                sign,
                left,
                right,
            },
            range,
        );
        f.replace_with(not, negated)?;
        Ok(true)
    }
}

impl StatementTransform for ExpressionTransforms {
    fn name(&self) -> &'static str {
        "expression-transforms"
    }

    fn run(
        &self,
        f: &mut Function,
        block: InstrId,
        pos: usize,
        ctx: &TransformContext<'_>,
    ) -> Result<bool> {
        let Some(&statement) = f.block_instructions(block).get(pos) else {
            return Ok(false);
        };
        for inst in f.descendants_postorder(statement) {
            if !f.is_connected(inst) {
                continue;
            }
            if self.visit(f, inst, ctx)? {
                log::trace!(
                    "expression rewrite at IL_{:04x} in {}",
                    offset_of(f, statement),
                    f.name()
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}
