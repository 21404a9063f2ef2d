//! Assignment folding over adjacent block statements.
//!
//! Compilers spell assignments used as expressions, compound assignments and
//! postfix increments as sequences of stores through temporaries. Each
//! sub-pattern below recognizes one such sequence at a block position and
//! replaces it by a single statement:
//!
//! | Sub-pattern                     | Result                                   |
//! |---------------------------------|------------------------------------------|
//! | inline assignment (stobj/call)  | `stloc l(stobj(t, v))`, `stloc l(Block CallInlineAssign)` |
//! | inline assignment (local)       | `stloc s(stloc l(v))`                    |
//! | inline compound call            | `stloc s(compound.op.new(get(), v))`     |
//! | roslyn compound call            | `compound.op.new(get(), v)`              |
//! | post-increment on address       | `stloc l(compound.op.old(ldobj(t), 1))`  |
//! | roslyn post-increment (address) | `stloc l(compound.op.old(ldobj(t), 1))`  |
//! | post-increment on static field  | `stloc s(compound.op.old(ldobj(ldsflda), 1))` |
//! | legacy post-increment (address) | `stloc l(compound.op.old(ldobj(addr), 1))` |
//! | post-increment on local         | `stloc s(compound.op.old(ldloc l, 1))`   |
//!
//! Sub-patterns are tried in the order of the table; the first match wins. Each
//! fold creates a new top-level store, which may enable inlining elsewhere, so
//! every success requests a re-run of the enclosing stage.

use crate::{
    compiler::{
        passes::utils::{
            build_compound, is_implicit_truncation, is_increment_by_one,
            matching_getter_and_setter_calls, unwrap_small_integer_conv,
            validate_compound_assign,
        },
        DecompilerSettings, EventKind, StatementTransform, TransformContext,
    },
    il::{
        patterns::{
            is_used_within, match_binary, match_invocation, match_ldloc, match_ldloc_of,
            match_ldobj, match_ldflda, match_ldsflda, match_stloc, match_stobj,
            matches_structurally,
        },
        BlockKind, CompoundEvaluation, Function, ILRange, InstrId, InstructionKind, VarId,
        VariableKind,
    },
    typesystem::{StackType, Type},
    Result,
};

/// What a successful sub-pattern did, for the event log.
struct Fold {
    kind: EventKind,
    message: String,
}

impl Fold {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Fold {
            kind,
            message: message.into(),
        }
    }
}

type SubPattern =
    fn(&mut Function, InstrId, usize, &TransformContext<'_>) -> Result<Option<Fold>>;

/// Sub-patterns in matching order, with the setting that enables each.
const SUB_PATTERNS: [(&str, fn(&DecompilerSettings) -> bool, SubPattern); 9] = [
    ("inline-assignment-stobj-or-call", inline_assignment_enabled, inline_assignment_stobj_or_call),
    ("inline-assignment-local", inline_assignment_enabled, inline_assignment_local),
    ("inline-compound-call", compound_assignment_enabled, inline_compound_assignment_call),
    ("roslyn-compound-call", compound_assignment_enabled, roslyn_compound_assignment_call),
    ("post-increment-on-address", post_increment_enabled, post_inc_dec_on_address),
    ("roslyn-post-increment-on-address", post_increment_enabled, roslyn_post_inc_dec_on_address),
    ("post-increment-on-static-field", post_increment_enabled, post_inc_dec_on_static_field),
    ("legacy-post-increment-on-address", post_increment_enabled, legacy_post_inc_dec_on_address),
    ("post-increment-on-local", post_increment_enabled, post_inc_dec_on_local),
];

fn inline_assignment_enabled(settings: &DecompilerSettings) -> bool {
    settings.inline_assignment
}

fn compound_assignment_enabled(settings: &DecompilerSettings) -> bool {
    settings.compound_assignment
}

fn post_increment_enabled(settings: &DecompilerSettings) -> bool {
    settings.post_increment
}

/// Folds assignment idioms at a block position.
#[derive(Debug, Default)]
pub struct TransformAssignment;

impl TransformAssignment {
    /// Creates the transform.
    #[must_use]
    pub fn new() -> Self {
        TransformAssignment
    }

    /// Names of the sub-patterns in matching order.
    pub fn sub_patterns() -> impl Iterator<Item = &'static str> {
        SUB_PATTERNS.iter().map(|(name, _, _)| *name)
    }
}

impl StatementTransform for TransformAssignment {
    fn name(&self) -> &'static str {
        "transform-assignment"
    }

    fn run(
        &self,
        f: &mut Function,
        block: InstrId,
        pos: usize,
        ctx: &TransformContext<'_>,
    ) -> Result<bool> {
        for (name, enabled, pattern) in SUB_PATTERNS {
            if !enabled(ctx.settings) {
                continue;
            }
            let offset = statement(f, block, pos).map_or(0, |s| f.range(s).start);
            if let Some(fold) = pattern(f, block, pos, ctx)? {
                log::trace!("{} at IL_{:04x} in {}", name, offset, f.name());
                ctx.record(fold.kind, name, offset).message(fold.message);
                ctx.request_rerun();
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn statement(f: &Function, block: InstrId, pos: usize) -> Option<InstrId> {
    f.block_instructions(block).get(pos).copied()
}

fn covering(f: &Function, statements: &[InstrId]) -> ILRange {
    statements
        .iter()
        .fold(ILRange::default(), |acc, s| acc.union(f.range(*s)))
}

fn is_local_or_slot(f: &Function, variable: VarId) -> bool {
    matches!(
        f.variable(variable).kind,
        VariableKind::StackSlot | VariableKind::Local
    )
}

/// ```text
/// stloc s(value)
/// [stloc l(ldloc s)]
/// stobj(target, ldloc s)           or    call set_P(args.., ldloc s)
/// -->
/// stloc l(stobj(target, value))    or    stloc l(Block CallInlineAssign { call set_P(args.., stloc t(value)); final: ldloc t })
/// ```
///
/// `target` and `args` must be pure and must not use `s`.
fn inline_assignment_stobj_or_call(
    f: &mut Function,
    block: InstrId,
    pos: usize,
    ctx: &TransformContext<'_>,
) -> Result<Option<Fold>> {
    let Some(inst) = statement(f, block, pos) else {
        return Ok(None);
    };
    let Some((slot, value)) = match_stloc(f, inst) else {
        return Ok(None);
    };
    if !is_local_or_slot(f, slot) || is_implicit_truncation(f, value, &f.variable(slot).ty) {
        return Ok(None);
    }

    let (local, local_store, next_pos) = match statement(f, block, pos + 1)
        .and_then(|s| match_stloc(f, s).map(|(v, val)| (s, v, val)))
    {
        Some((store, local, local_value)) => {
            if f.variable(local).kind != VariableKind::Local
                || !match_ldloc_of(f, local_value, slot)
            {
                return Ok(None);
            }
            let var = f.variable(slot);
            if !(var.is_single_definition() && var.load_count() == 2) {
                return Ok(None);
            }
            (local, Some(store), pos + 2)
        }
        None => (slot, None, pos + 1),
    };
    let Some(next) = statement(f, block, next_pos) else {
        return Ok(None);
    };

    if let Some((target, stored, ty)) = match_stobj(f, next) {
        if !match_ldloc_of(f, stored, slot)
            || !f.is_pure(target)
            || is_used_within(f, slot, target)
            || is_implicit_truncation(f, value, ty)
        {
            return Ok(None);
        }

        let range = covering(f, &[inst, next])
            .union(local_store.map_or_else(ILRange::default, |s| f.range(s)));
        let stobj = f.remove_instruction(block, next_pos)?;
        if local_store.is_some() {
            f.remove_instruction(block, pos + 1)?;
        }
        let value = f.detach(value)?;
        f.replace_child(stobj, stored, value)?;
        let store = f.create_at(
            InstructionKind::StLoc {
                variable: local,
                value: stobj,
            },
            range,
        );
        f.set_instruction(block, pos, store)?;
        return Ok(Some(Fold::new(
            EventKind::InlineAssignment,
            format!("inline assignment through stobj into {}", f.variable(local).name),
        )));
    }

    let Some(call) = match_invocation(f, next) else {
        return Ok(None);
    };
    if f.result_type(next) != StackType::Void {
        return Ok(None);
    }
    let Some((&stored, leading)) = call.arguments.split_last() else {
        return Ok(None);
    };
    let Some((method, property)) = ctx.type_system.accessor_property(call.method) else {
        return Ok(None);
    };
    if property.setter != Some(method.token) || !match_ldloc_of(f, stored, slot) {
        return Ok(None);
    }
    if leading
        .iter()
        .any(|&arg| !f.is_pure(arg) || is_used_within(f, slot, arg))
    {
        return Ok(None);
    }
    let parameter_type = call
        .method
        .signature
        .parameters
        .last()
        .cloned()
        .unwrap_or(Type::Unknown);
    if is_implicit_truncation(f, value, &parameter_type) {
        return Ok(None);
    }

    let range = covering(f, &[inst, next])
        .union(local_store.map_or_else(ILRange::default, |s| f.range(s)));
    let setter = f.remove_instruction(block, next_pos)?;
    if local_store.is_some() {
        f.remove_instruction(block, pos + 1)?;
    }
    let temp = f.add_stack_slot(parameter_type);
    let value = f.detach(value)?;
    let temp_store = f.create(InstructionKind::StLoc {
        variable: temp,
        value,
    });
    f.replace_child(setter, stored, temp_store)?;

    let assign = f.create_block_of_kind(BlockKind::CallInlineAssign);
    f.set_range(assign, range);
    f.push_instruction(assign, setter)?;
    let result = f.create(InstructionKind::LdLoc(temp));
    f.set_final_instruction(assign, Some(result))?;
    let store = f.create_at(
        InstructionKind::StLoc {
            variable: local,
            value: assign,
        },
        range,
    );
    f.set_instruction(block, pos, store)?;
    Ok(Some(Fold::new(
        EventKind::InlineAssignment,
        format!("inline assignment to {}", property.name),
    )))
}

/// ```text
/// stloc s(value)
/// stloc l(ldloc s)
/// -->
/// stloc s(stloc l(value))
/// ```
fn inline_assignment_local(
    f: &mut Function,
    block: InstrId,
    pos: usize,
    _ctx: &TransformContext<'_>,
) -> Result<Option<Fold>> {
    let (Some(inst), Some(next)) = (statement(f, block, pos), statement(f, block, pos + 1)) else {
        return Ok(None);
    };
    let (Some((slot, value)), Some((local, local_value))) = (match_stloc(f, inst), match_stloc(f, next))
    else {
        return Ok(None);
    };
    if f.variable(slot).kind != VariableKind::StackSlot || !f.variable(slot).is_single_definition() {
        return Ok(None);
    }
    if !matches!(
        f.variable(local).kind,
        VariableKind::Local | VariableKind::Parameter
    ) || !match_ldloc_of(f, local_value, slot)
    {
        return Ok(None);
    }
    if is_implicit_truncation(f, value, &f.variable(local).ty) {
        return Ok(None);
    }

    let inner_range = f.range(next);
    let range = covering(f, &[inst, next]);
    f.remove_instruction(block, pos)?;
    let value = f.detach(value)?;
    let inner = f.create_at(
        InstructionKind::StLoc {
            variable: local,
            value,
        },
        inner_range,
    );
    let outer = f.create_at(
        InstructionKind::StLoc {
            variable: slot,
            value: inner,
        },
        range,
    );
    f.set_instruction(block, pos, outer)?;
    Ok(Some(Fold::new(
        EventKind::InlineAssignment,
        format!("inline assignment to local {}", f.variable(local).name),
    )))
}

/// ```text
/// stloc s(binary.op(call get_P(args..), value))
/// call set_P(args.., ldloc s)
/// <next statement with exactly one ldloc s>
/// -->
/// stloc s(compound.op.new(call get_P(args..), value))
/// ```
fn inline_compound_assignment_call(
    f: &mut Function,
    block: InstrId,
    pos: usize,
    ctx: &TransformContext<'_>,
) -> Result<Option<Fold>> {
    let (Some(inst), Some(setter), Some(next)) = (
        statement(f, block, pos),
        statement(f, block, pos + 1),
        statement(f, block, pos + 2),
    ) else {
        return Ok(None);
    };
    let Some((slot, value)) = match_stloc(f, inst) else {
        return Ok(None);
    };
    let var = f.variable(slot);
    if !is_local_or_slot(f, slot) || !var.is_single_definition() || var.load_count() != 2 {
        return Ok(None);
    }
    let (binary, conv) = unwrap_small_integer_conv(f, value);
    let Some(capture) = match_binary(f, binary) else {
        return Ok(None);
    };
    let getter = capture.left;
    let Some(property) = matching_getter_and_setter_calls(f, ctx.type_system, getter, setter) else {
        return Ok(None);
    };
    let stores_slot = match_invocation(f, setter)
        .and_then(|c| c.arguments.last().copied())
        .is_some_and(|last| match_ldloc_of(f, last, slot));
    if !stores_slot {
        return Ok(None);
    }
    let uses_in_next = f
        .descendants(next)
        .into_iter()
        .filter(|&d| match_ldloc_of(f, d, slot))
        .count();
    if uses_in_next != 1 {
        return Ok(None);
    }
    let Some(target_type) =
        match_invocation(f, getter).map(|g| g.method.signature.return_type.clone())
    else {
        return Ok(None);
    };
    if !validate_compound_assign(f, binary, conv, &target_type) {
        return Ok(None);
    }

    let range = covering(f, &[inst, setter]);
    f.remove_instruction(block, pos + 1)?;
    let getter = f.detach(getter)?;
    let compound = build_compound(f, binary, getter, target_type, CompoundEvaluation::NewValue)?;
    f.replace_child(inst, value, compound)?;
    f.set_range(inst, range);
    Ok(Some(Fold::new(
        EventKind::CompoundAssignment,
        format!("inline compound assignment to {}", property.name),
    )))
}

/// ```text
/// stloc v(call get_P(args..))
/// call set_P(args.., binary.op(ldloc v, value))
/// -->
/// compound.op.new(call get_P(args..), value)
/// ```
fn roslyn_compound_assignment_call(
    f: &mut Function,
    block: InstrId,
    pos: usize,
    ctx: &TransformContext<'_>,
) -> Result<Option<Fold>> {
    let (Some(inst), Some(setter)) = (statement(f, block, pos), statement(f, block, pos + 1)) else {
        return Ok(None);
    };
    let Some((variable, getter)) = match_stloc(f, inst) else {
        return Ok(None);
    };
    let var = f.variable(variable);
    if !(var.is_single_definition() && var.load_count() == 1) {
        return Ok(None);
    }
    let Some(property) = matching_getter_and_setter_calls(f, ctx.type_system, getter, setter) else {
        return Ok(None);
    };
    let Some(binary) = match_invocation(f, setter).and_then(|c| c.arguments.last().copied()) else {
        return Ok(None);
    };
    let Some(capture) = match_binary(f, binary) else {
        return Ok(None);
    };
    if !match_ldloc_of(f, capture.left, variable) {
        return Ok(None);
    }
    let Some(target_type) =
        match_invocation(f, getter).map(|g| g.method.signature.return_type.clone())
    else {
        return Ok(None);
    };
    if !validate_compound_assign(f, binary, None, &target_type) {
        return Ok(None);
    }

    let range = covering(f, &[inst, setter]);
    f.remove_instruction(block, pos + 1)?;
    let getter = f.detach(getter)?;
    let compound = build_compound(f, binary, getter, target_type, CompoundEvaluation::NewValue)?;
    f.set_range(compound, range);
    f.set_instruction(block, pos, compound)?;
    Ok(Some(Fold::new(
        EventKind::CompoundAssignment,
        format!("compound assignment to {}", property.name),
    )))
}

/// ```text
/// stobj(target, [conv(] binary.op(stloc l(ldobj(target)), ldc.i4 1) [)])
/// -->
/// stloc l(compound.op.old(ldobj(target), ldc.i4 1))
/// ```
///
/// `target` must be pure and must not use `l`.
fn post_inc_dec_on_address(
    f: &mut Function,
    block: InstrId,
    pos: usize,
    _ctx: &TransformContext<'_>,
) -> Result<Option<Fold>> {
    let Some(inst) = statement(f, block, pos) else {
        return Ok(None);
    };
    let Some((target, stored, _)) = match_stobj(f, inst) else {
        return Ok(None);
    };
    let (binary, conv) = unwrap_small_integer_conv(f, stored);
    let Some(capture) = match_binary(f, binary) else {
        return Ok(None);
    };
    if !is_increment_by_one(f, &capture) {
        return Ok(None);
    }
    let Some((local, load)) = match_stloc(f, capture.left) else {
        return Ok(None);
    };
    if !is_local_or_slot(f, local) {
        return Ok(None);
    }
    let Some((load_target, ty)) = match_ldobj(f, load) else {
        return Ok(None);
    };
    if !f.is_pure(load_target)
        || !matches_structurally(f, load_target, target)
        || is_used_within(f, local, load_target)
    {
        return Ok(None);
    }
    let ty = ty.clone();
    if !validate_compound_assign(f, binary, conv, &ty) {
        return Ok(None);
    }

    let range = f.range(inst);
    let load = f.detach(load)?;
    let compound = build_compound(f, binary, load, ty, CompoundEvaluation::OldValue)?;
    let store = f.create_at(
        InstructionKind::StLoc {
            variable: local,
            value: compound,
        },
        range,
    );
    f.set_instruction(block, pos, store)?;
    Ok(Some(Fold::new(
        EventKind::PostIncrement,
        format!("postfix operator on address into {}", f.variable(local).name),
    )))
}

/// ```text
/// stloc l(ldobj(target))
/// stobj(target, [conv(] binary.op(ldloc l, ldc.i4 1) [)])
/// -->
/// stloc l(compound.op.old(ldobj(target), ldc.i4 1))
/// ```
fn roslyn_post_inc_dec_on_address(
    f: &mut Function,
    block: InstrId,
    pos: usize,
    _ctx: &TransformContext<'_>,
) -> Result<Option<Fold>> {
    let (Some(inst), Some(next)) = (statement(f, block, pos), statement(f, block, pos + 1)) else {
        return Ok(None);
    };
    let (Some((local, load)), Some((target, stored, _))) = (match_stloc(f, inst), match_stobj(f, next))
    else {
        return Ok(None);
    };
    let Some((load_target, ty)) = match_ldobj(f, load) else {
        return Ok(None);
    };
    if !f.is_pure(load_target)
        || !matches_structurally(f, load_target, target)
        || is_used_within(f, local, load_target)
    {
        return Ok(None);
    }
    let ty = ty.clone();
    let (binary, conv) = unwrap_small_integer_conv(f, stored);
    let Some(capture) = match_binary(f, binary) else {
        return Ok(None);
    };
    if !match_ldloc_of(f, capture.left, local) || !is_increment_by_one(f, &capture) {
        return Ok(None);
    }
    if !validate_compound_assign(f, binary, conv, &ty) {
        return Ok(None);
    }

    let range = covering(f, &[inst, next]);
    f.remove_instruction(block, pos + 1)?;
    let load = f.detach(load)?;
    let compound = build_compound(f, binary, load, ty, CompoundEvaluation::OldValue)?;
    let store = f.create_at(
        InstructionKind::StLoc {
            variable: local,
            value: compound,
        },
        range,
    );
    f.set_instruction(block, pos, store)?;
    Ok(Some(Fold::new(
        EventKind::PostIncrement,
        format!("postfix operator on address into {}", f.variable(local).name),
    )))
}

/// ```text
/// stloc s(ldobj(ldsflda F))
/// stobj(ldsflda F, binary.op(ldloc s, ldc.i4 1))
/// -->
/// stloc s(compound.op.old(ldobj(ldsflda F), ldc.i4 1))
/// ```
fn post_inc_dec_on_static_field(
    f: &mut Function,
    block: InstrId,
    pos: usize,
    _ctx: &TransformContext<'_>,
) -> Result<Option<Fold>> {
    let (Some(inst), Some(next)) = (statement(f, block, pos), statement(f, block, pos + 1)) else {
        return Ok(None);
    };
    let (Some((slot, load)), Some((target, stored, _))) = (match_stloc(f, inst), match_stobj(f, next))
    else {
        return Ok(None);
    };
    if f.variable(slot).kind != VariableKind::StackSlot {
        return Ok(None);
    }
    let Some((load_target, ty)) = match_ldobj(f, load) else {
        return Ok(None);
    };
    let same_field = match (match_ldsflda(f, load_target), match_ldsflda(f, target)) {
        (Some(a), Some(b)) => a.token == b.token,
        _ => false,
    };
    if !same_field {
        return Ok(None);
    }
    let ty = ty.clone();
    let Some(capture) = match_binary(f, stored) else {
        return Ok(None);
    };
    if !match_ldloc_of(f, capture.left, slot) || !is_increment_by_one(f, &capture) {
        return Ok(None);
    }
    if !validate_compound_assign(f, stored, None, &ty) {
        return Ok(None);
    }

    let range = covering(f, &[inst, next]);
    f.remove_instruction(block, pos)?;
    let load = f.detach(load)?;
    let compound = build_compound(f, stored, load, ty, CompoundEvaluation::OldValue)?;
    let store = f.create_at(
        InstructionKind::StLoc {
            variable: slot,
            value: compound,
        },
        range,
    );
    f.set_instruction(block, pos, store)?;
    Ok(Some(Fold::new(
        EventKind::PostIncrement,
        "postfix operator on static field",
    )))
}

/// ```text
/// stloc s(ldflda F(base))      or   stloc s(ldelema(array, index))
/// stloc s2(ldobj(ldflda G(ldloc s)))  or   stloc s2(ldobj(ldloc s))
/// stloc l(ldloc s2)
/// stobj(ldflda G(ldloc s), binary.op(ldloc s2, ldc.i4 1))   or   stobj(ldloc s, ..)
/// -->
/// stloc l(compound.op.old(ldobj(ldflda G(ldflda F(base))), ldc.i4 1))
/// ```
///
/// The shape older compilers emit for `x.f.g++` and `a[i]++`.
fn legacy_post_inc_dec_on_address(
    f: &mut Function,
    block: InstrId,
    pos: usize,
    _ctx: &TransformContext<'_>,
) -> Result<Option<Fold>> {
    let statements: Vec<InstrId> = (pos..pos + 4)
        .map_while(|i| statement(f, block, i))
        .collect();
    let &[base_store, value_store, copy_store, stobj] = statements.as_slice() else {
        return Ok(None);
    };
    let (Some((base, base_value)), Some((slot, load)), Some((local, copy)), Some((target, stored, _))) = (
        match_stloc(f, base_store),
        match_stloc(f, value_store),
        match_stloc(f, copy_store),
        match_stobj(f, stobj),
    ) else {
        return Ok(None);
    };
    if f.variable(base).kind != VariableKind::StackSlot
        || f.variable(slot).kind != VariableKind::StackSlot
        || f.variable(local).kind != VariableKind::Local
        || !match_ldloc_of(f, copy, slot)
    {
        return Ok(None);
    }
    // Both temporaries disappear, so they may not be used anywhere else.
    let (base_var, slot_var) = (f.variable(base), f.variable(slot));
    if !(base_var.is_single_definition() && base_var.load_count() == 2)
        || !(slot_var.is_single_definition() && slot_var.load_count() == 2)
    {
        return Ok(None);
    }
    let Some((field_address, ty)) = match_ldobj(f, load) else {
        return Ok(None);
    };
    let ty = ty.clone();

    let inner_field = match f.kind(base_value) {
        InstructionKind::LdFlda { .. } => {
            let (Some((load_base, field)), Some((store_base, field2))) =
                (match_ldflda(f, field_address), match_ldflda(f, target))
            else {
                return Ok(None);
            };
            if !match_ldloc_of(f, load_base, base)
                || !match_ldloc_of(f, store_base, base)
                || field.token != field2.token
            {
                return Ok(None);
            }
            Some(field.clone())
        }
        InstructionKind::LdElema { .. } => {
            if !match_ldloc_of(f, field_address, base) || !match_ldloc_of(f, target, base) {
                return Ok(None);
            }
            None
        }
        _ => return Ok(None),
    };
    let Some(capture) = match_binary(f, stored) else {
        return Ok(None);
    };
    if !match_ldloc_of(f, capture.left, slot) || !is_increment_by_one(f, &capture) {
        return Ok(None);
    }

    let range = covering(f, &statements);
    let base_value = f.detach(base_value)?;
    let address = match inner_field {
        Some(field) => f.create(InstructionKind::LdFlda {
            target: base_value,
            field,
        }),
        None => base_value,
    };
    let load = f.create(InstructionKind::LdObj {
        target: address,
        ty: ty.clone(),
    });
    let compound = build_compound(f, stored, load, ty, CompoundEvaluation::OldValue)?;
    let store = f.create_at(
        InstructionKind::StLoc {
            variable: local,
            value: compound,
        },
        range,
    );
    f.set_instruction(block, pos + 3, store)?;
    for i in (pos..pos + 3).rev() {
        f.remove_instruction(block, i)?;
    }
    Ok(Some(Fold::new(
        EventKind::PostIncrement,
        format!("legacy postfix operator into {}", f.variable(local).name),
    )))
}

/// ```text
/// stloc s(ldloc l)
/// stloc l([conv(] binary.op(ldloc s, ldc.i4 1) [)])
/// -->
/// stloc s(compound.op.old(ldloc l, ldc.i4 1))
/// ```
fn post_inc_dec_on_local(
    f: &mut Function,
    block: InstrId,
    pos: usize,
    _ctx: &TransformContext<'_>,
) -> Result<Option<Fold>> {
    let (Some(inst), Some(next)) = (statement(f, block, pos), statement(f, block, pos + 1)) else {
        return Ok(None);
    };
    let (Some((slot, load)), Some((local, stored))) = (match_stloc(f, inst), match_stloc(f, next))
    else {
        return Ok(None);
    };
    if match_ldloc(f, load) != Some(local)
        || f.variable(slot).kind != VariableKind::StackSlot
        || f.variable(local).kind == VariableKind::StackSlot
    {
        return Ok(None);
    }
    let (binary, conv) = unwrap_small_integer_conv(f, stored);
    let Some(capture) = match_binary(f, binary) else {
        return Ok(None);
    };
    if !match_ldloc_of(f, capture.left, slot) || !is_increment_by_one(f, &capture) {
        return Ok(None);
    }
    let ty = f.variable(local).ty.clone();
    if !validate_compound_assign(f, binary, conv, &ty) {
        return Ok(None);
    }

    let range = covering(f, &[inst, next]);
    f.remove_instruction(block, pos)?;
    let target = f.create_at(InstructionKind::LdLoc(local), f.range(load));
    let compound = build_compound(f, binary, target, ty, CompoundEvaluation::OldValue)?;
    let store = f.create_at(
        InstructionKind::StLoc {
            variable: slot,
            value: compound,
        },
        range,
    );
    f.set_instruction(block, pos, store)?;
    Ok(Some(Fold::new(
        EventKind::PostIncrement,
        format!("postfix operator on {}", f.variable(local).name),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::EventLog,
        il::{patterns::match_call, BinaryNumericOperator, CallKind},
        test::{Fixture, FunctionBuilder},
        typesystem::PrimitiveKind,
        utils::CancellationToken,
    };

    fn run_at(fixture: &Fixture, f: &mut Function, block: InstrId, pos: usize) -> (bool, EventLog) {
        run_with(fixture, f, block, pos, DecompilerSettings::default())
    }

    fn run_with(
        fixture: &Fixture,
        f: &mut Function,
        block: InstrId,
        pos: usize,
        settings: DecompilerSettings,
    ) -> (bool, EventLog) {
        let events = EventLog::new();
        let cancel = CancellationToken::new();
        let changed = {
            let ctx = TransformContext::new("m", &fixture.ts, &settings, &events, &cancel);
            let changed = TransformAssignment::new().run(f, block, pos, &ctx).unwrap();
            assert_eq!(changed, ctx.take_rerun());
            changed
        };
        (changed, events)
    }

    fn compound_of(f: &Function, inst: InstrId) -> (BinaryNumericOperator, CompoundEvaluation, InstrId) {
        match f.kind(inst) {
            InstructionKind::CompoundAssignment {
                op,
                evaluates_to,
                target,
                ..
            } => (*op, *evaluates_to, *target),
            other => panic!("expected compound assignment, got {}", other.opcode_name()),
        }
    }

    #[test]
    fn test_sub_pattern_order() {
        let names: Vec<_> = TransformAssignment::sub_patterns().collect();
        assert_eq!(names.len(), 9);
        assert_eq!(names[0], "inline-assignment-stobj-or-call");
        assert_eq!(names[8], "post-increment-on-local");
    }

    #[test]
    fn test_inline_assignment_to_field_with_local() {
        // stloc s(ldc 5); stloc l(ldloc s); stobj(ldflda value(ldloc this), ldloc s)
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let this = b.this(fx.counter.clone());
        let l = b.local("l", Type::INT32);
        let s = b.slot(Type::INT32);
        let five = b.ldc(5);
        b.stloc(s, five);
        let load = b.ldloc(s);
        b.stloc(l, load);
        let obj = b.ldloc(this);
        let address = b.ldflda(obj, &fx.value_field);
        let load = b.ldloc(s);
        let store = b.stobj(address, load, Type::INT32);
        b.push(store);
        let (mut f, block) = b.finish();

        let (changed, events) = run_at(&fx, &mut f, block, 0);
        assert!(changed);
        assert!(events.has(EventKind::InlineAssignment));
        assert_eq!(f.block_instructions(block).len(), 1);
        let (variable, value) = match_stloc(&f, f.block_instructions(block)[0]).unwrap();
        assert_eq!(variable, l);
        let (_, stored, _) = match_stobj(&f, value).unwrap();
        assert_eq!(f.kind(stored), &InstructionKind::LdcI4(5));
        assert_eq!(f.variable(s).store_count(), 0);
        assert_eq!(f.variable(s).load_count(), 0);
    }

    #[test]
    fn test_inline_assignment_rejects_truncation() {
        // stloc s(ldc 300); stobj u1(ldsflda flags, ldloc s)
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let s = b.slot(Type::INT32);
        let value = b.ldc(300);
        b.stloc(s, value);
        let address = b.ldsflda(&fx.flags_field);
        let load = b.ldloc(s);
        let store = b.stobj(address, load, Type::Primitive(PrimitiveKind::U1));
        b.push(store);
        let (mut f, block) = b.finish();

        let (changed, _) = run_at(&fx, &mut f, block, 0);
        assert!(!changed);
        assert_eq!(f.block_instructions(block).len(), 2);
    }

    #[test]
    fn test_inline_assignment_to_setter() {
        // stloc s(ldc 3); call set_Count(ldloc s)
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let s = b.slot(Type::INT32);
        let three = b.ldc(3);
        b.stloc(s, three);
        let load = b.ldloc(s);
        let call = b.call(&fx.set_count, CallKind::Call, vec![load]);
        b.push(call);
        let (mut f, block) = b.finish();

        let (changed, _) = run_at(&fx, &mut f, block, 0);
        assert!(changed);
        let (variable, value) = match_stloc(&f, f.block_instructions(block)[0]).unwrap();
        assert_eq!(variable, s);
        match f.kind(value) {
            InstructionKind::Block {
                kind,
                instructions,
                final_instruction: Some(result),
                ..
            } => {
                assert_eq!(*kind, BlockKind::CallInlineAssign);
                let call = match_call(&f, instructions[0]).unwrap();
                let (temp, _) = match_stloc(&f, call.arguments[0]).unwrap();
                assert_eq!(match_ldloc(&f, *result), Some(temp));
            }
            other => panic!("unexpected {}", other.opcode_name()),
        }
    }

    #[test]
    fn test_inline_assignment_local() {
        // stloc s(ldc 7); stloc x(ldloc s)
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let x = b.local("x", Type::INT32);
        let s = b.slot(Type::INT32);
        let seven = b.ldc(7);
        b.stloc(s, seven);
        let load = b.ldloc(s);
        b.stloc(x, load);
        let (mut f, block) = b.finish();

        let (changed, _) = run_at(&fx, &mut f, block, 0);
        assert!(changed);
        let (outer, inner) = match_stloc(&f, f.block_instructions(block)[0]).unwrap();
        assert_eq!(outer, s);
        let (inner_var, value) = match_stloc(&f, inner).unwrap();
        assert_eq!(inner_var, x);
        assert_eq!(f.kind(value), &InstructionKind::LdcI4(7));
    }

    #[test]
    fn test_roslyn_compound_assignment_call() {
        // stloc v(call get_Value(ldloc this)); call set_Value(ldloc this, binary.add(ldloc v, ldc 2))
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let this = b.this(fx.counter.clone());
        let v = b.slot(Type::INT32);
        let obj = b.ldloc(this);
        let get = b.call(&fx.get_value, CallKind::Call, vec![obj]);
        b.stloc(v, get);
        let obj = b.ldloc(this);
        let load = b.ldloc(v);
        let two = b.ldc(2);
        let sum = b.add(load, two);
        let set = b.call(&fx.set_value, CallKind::Call, vec![obj, sum]);
        b.push(set);
        let (mut f, block) = b.finish();

        let (changed, events) = run_at(&fx, &mut f, block, 0);
        assert!(changed);
        assert_eq!(events.count_kind(EventKind::CompoundAssignment), 1);
        assert_eq!(f.block_instructions(block).len(), 1);
        let (op, evaluates_to, target) = compound_of(&f, f.block_instructions(block)[0]);
        assert_eq!(op, BinaryNumericOperator::Add);
        assert_eq!(evaluates_to, CompoundEvaluation::NewValue);
        assert_eq!(match_call(&f, target).unwrap().method.name, "get_Value");
    }

    #[test]
    fn test_folded_block_is_a_fixed_point() {
        // stloc v(call get_Value(ldloc this)); call set_Value(ldloc this, binary.add(ldloc v, ldc 2))
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let this = b.this(fx.counter.clone());
        let v = b.slot(Type::INT32);
        let obj = b.ldloc(this);
        let get = b.call(&fx.get_value, CallKind::Call, vec![obj]);
        b.stloc(v, get);
        let obj = b.ldloc(this);
        let load = b.ldloc(v);
        let two = b.ldc(2);
        let sum = b.add(load, two);
        let set = b.call(&fx.set_value, CallKind::Call, vec![obj, sum]);
        b.push(set);
        let (mut f, block) = b.finish();

        let (changed, _) = run_at(&fx, &mut f, block, 0);
        assert!(changed);
        let folded = f.block_instructions(block).to_vec();
        for pos in 0..folded.len() {
            let (changed, events) = run_at(&fx, &mut f, block, pos);
            assert!(!changed);
            assert!(events.is_empty());
        }
        assert_eq!(f.block_instructions(block), folded.as_slice());
    }

    #[test]
    fn test_setter_rejects_sign_mismatch() {
        // stloc s(ldloc u); call set_Level(ldloc s) with `byte u` and `sbyte Level`
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let unsigned = b.local("u", PrimitiveKind::U1.into());
        let signed = b.local("i", PrimitiveKind::I1.into());
        let s = b.slot(Type::INT32);
        let t = b.slot(Type::INT32);
        let load = b.ldloc(unsigned);
        b.stloc(s, load);
        let load = b.ldloc(s);
        let set = b.call(&fx.set_level, CallKind::Call, vec![load]);
        b.push(set);
        let load = b.ldloc(signed);
        b.stloc(t, load);
        let load = b.ldloc(t);
        let set = b.call(&fx.set_level, CallKind::Call, vec![load]);
        b.push(set);
        let (mut f, block) = b.finish();

        let (changed, _) = run_at(&fx, &mut f, block, 0);
        assert!(!changed);
        assert_eq!(f.block_instructions(block).len(), 4);

        // Same size and sign as the property: folds.
        let (changed, events) = run_at(&fx, &mut f, block, 2);
        assert!(changed);
        assert!(events.has(EventKind::InlineAssignment));
        assert_eq!(f.block_instructions(block).len(), 3);
    }

    #[test]
    fn test_compound_requires_matching_receivers() {
        // Getter and setter on different receivers must not fold.
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let this = b.this(fx.counter.clone());
        let other = b.local("other", fx.counter.clone());
        let v = b.slot(Type::INT32);
        let obj = b.ldloc(this);
        let get = b.call(&fx.get_value, CallKind::Call, vec![obj]);
        b.stloc(v, get);
        let obj = b.ldloc(other);
        let load = b.ldloc(v);
        let two = b.ldc(2);
        let sum = b.add(load, two);
        let set = b.call(&fx.set_value, CallKind::Call, vec![obj, sum]);
        b.push(set);
        let (mut f, block) = b.finish();

        let (changed, _) = run_at(&fx, &mut f, block, 0);
        assert!(!changed);
    }

    #[test]
    fn test_inline_compound_assignment_call() {
        // stloc s(binary.add(call get_Count(), ldc 1)); call set_Count(ldloc s); stloc x(ldloc s)
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let x = b.local("x", Type::INT32);
        let s = b.slot(Type::INT32);
        let get = b.call(&fx.get_count, CallKind::Call, vec![]);
        let one = b.ldc(1);
        let sum = b.add(get, one);
        b.stloc(s, sum);
        let load = b.ldloc(s);
        let set = b.call(&fx.set_count, CallKind::Call, vec![load]);
        b.push(set);
        let load = b.ldloc(s);
        b.stloc(x, load);
        let (mut f, block) = b.finish();

        // With inline assignment enabled the setter store is folded first.
        let settings = DecompilerSettings::default().with_inline_assignment(false);
        let (changed, _) = run_with(&fx, &mut f, block, 0, settings);
        assert!(changed);
        assert_eq!(f.block_instructions(block).len(), 2);
        let (_, value) = match_stloc(&f, f.block_instructions(block)[0]).unwrap();
        let (_, evaluates_to, _) = compound_of(&f, value);
        assert_eq!(evaluates_to, CompoundEvaluation::NewValue);
        assert_eq!(f.variable(s).load_count(), 1);
    }

    #[test]
    fn test_post_increment_on_address() {
        // stobj(ldflda value(ldloc this), binary.add(stloc l(ldobj(ldflda value(ldloc this))), ldc 1))
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let this = b.this(fx.counter.clone());
        let l = b.local("l", Type::INT32);
        let obj = b.ldloc(this);
        let address = b.ldflda(obj, &fx.value_field);
        let load = b.ldobj(address, Type::INT32);
        let saved = b.stloc_expr(l, load);
        let one = b.ldc(1);
        let sum = b.add(saved, one);
        let obj = b.ldloc(this);
        let address = b.ldflda(obj, &fx.value_field);
        let store = b.stobj(address, sum, Type::INT32);
        b.push(store);
        let (mut f, block) = b.finish();

        let (changed, events) = run_at(&fx, &mut f, block, 0);
        assert!(changed);
        assert!(events.has(EventKind::PostIncrement));
        let (variable, value) = match_stloc(&f, f.block_instructions(block)[0]).unwrap();
        assert_eq!(variable, l);
        let (_, evaluates_to, target) = compound_of(&f, value);
        assert_eq!(evaluates_to, CompoundEvaluation::OldValue);
        assert!(match_ldobj(&f, target).is_some());
    }

    #[test]
    fn test_roslyn_post_increment_on_address() {
        // stloc l(ldobj(ldsflda hits)); stobj(ldsflda hits, binary.sub(ldloc l, ldc 1))
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let l = b.local("l", Type::INT32);
        let address = b.ldsflda(&fx.hits_field);
        let load = b.ldobj(address, Type::INT32);
        b.stloc(l, load);
        let address = b.ldsflda(&fx.hits_field);
        let current = b.ldloc(l);
        let one = b.ldc(1);
        let diff = b.binary(BinaryNumericOperator::Sub, current, one);
        let store = b.stobj(address, diff, Type::INT32);
        b.push(store);
        let (mut f, block) = b.finish();

        let (changed, _) = run_at(&fx, &mut f, block, 0);
        assert!(changed);
        assert_eq!(f.block_instructions(block).len(), 1);
        let (_, value) = match_stloc(&f, f.block_instructions(block)[0]).unwrap();
        let (op, evaluates_to, _) = compound_of(&f, value);
        assert_eq!(op, BinaryNumericOperator::Sub);
        assert_eq!(evaluates_to, CompoundEvaluation::OldValue);
    }

    #[test]
    fn test_post_increment_on_static_field_slot() {
        // stloc s(ldobj(ldsflda hits)); stobj(ldsflda hits, binary.add(ldloc s, ldc 1))
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let s = b.slot(Type::INT32);
        let address = b.ldsflda(&fx.hits_field);
        let load = b.ldobj(address, Type::INT32);
        b.stloc(s, load);
        let address = b.ldsflda(&fx.hits_field);
        let current = b.ldloc(s);
        let one = b.ldc(1);
        let sum = b.add(current, one);
        let store = b.stobj(address, sum, Type::INT32);
        b.push(store);
        let (mut f, block) = b.finish();

        let (changed, _) = run_at(&fx, &mut f, block, 0);
        assert!(changed);
        let (variable, value) = match_stloc(&f, f.block_instructions(block)[0]).unwrap();
        assert_eq!(variable, s);
        let (_, evaluates_to, _) = compound_of(&f, value);
        assert_eq!(evaluates_to, CompoundEvaluation::OldValue);
    }

    #[test]
    fn test_legacy_post_increment_on_field() {
        // stloc s(ldflda inner(ldloc this))
        // stloc s2(ldobj(ldflda value(ldloc s)))
        // stloc l(ldloc s2)
        // stobj(ldflda value(ldloc s), binary.add(ldloc s2, ldc 1))
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let this = b.this(fx.counter.clone());
        let l = b.local("l", Type::INT32);
        let s = b.slot(fx.counter.clone().by_reference());
        let s2 = b.slot(Type::INT32);
        let obj = b.ldloc(this);
        let base = b.ldflda(obj, &fx.inner_field);
        b.stloc(s, base);
        let base = b.ldloc(s);
        let address = b.ldflda(base, &fx.value_field);
        let load = b.ldobj(address, Type::INT32);
        b.stloc(s2, load);
        let copy = b.ldloc(s2);
        b.stloc(l, copy);
        let base = b.ldloc(s);
        let address = b.ldflda(base, &fx.value_field);
        let current = b.ldloc(s2);
        let one = b.ldc(1);
        let sum = b.add(current, one);
        let store = b.stobj(address, sum, Type::INT32);
        b.push(store);
        let (mut f, block) = b.finish();

        let (changed, _) = run_at(&fx, &mut f, block, 0);
        assert!(changed);
        assert_eq!(f.block_instructions(block).len(), 1);
        let (variable, value) = match_stloc(&f, f.block_instructions(block)[0]).unwrap();
        assert_eq!(variable, l);
        let (_, evaluates_to, target) = compound_of(&f, value);
        assert_eq!(evaluates_to, CompoundEvaluation::OldValue);
        let (address, _) = match_ldobj(&f, target).unwrap();
        let (inner, field) = match_ldflda(&f, address).unwrap();
        assert_eq!(field.name, "value");
        assert!(match_ldflda(&f, inner).is_some());
        assert_eq!(f.variable(s).store_count(), 0);
        assert_eq!(f.variable(s2).store_count(), 0);
    }

    #[test]
    fn test_post_increment_on_local() {
        // stloc s(ldloc i); stloc i(binary.add(ldloc s, ldc 1))
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let i = b.local("i", Type::INT32);
        let s = b.slot(Type::INT32);
        let load = b.ldloc(i);
        b.stloc(s, load);
        let current = b.ldloc(s);
        let one = b.ldc(1);
        let sum = b.add(current, one);
        b.stloc(i, sum);
        let (mut f, block) = b.finish();

        let (changed, _) = run_at(&fx, &mut f, block, 0);
        assert!(changed);
        let (variable, value) = match_stloc(&f, f.block_instructions(block)[0]).unwrap();
        assert_eq!(variable, s);
        let (_, evaluates_to, target) = compound_of(&f, value);
        assert_eq!(evaluates_to, CompoundEvaluation::OldValue);
        assert_eq!(match_ldloc(&f, target), Some(i));
    }

    #[test]
    fn test_disabled_settings_skip_sub_patterns() {
        let fx = Fixture::new();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let i = b.local("i", Type::INT32);
        let s = b.slot(Type::INT32);
        let load = b.ldloc(i);
        b.stloc(s, load);
        let current = b.ldloc(s);
        let one = b.ldc(1);
        let sum = b.add(current, one);
        b.stloc(i, sum);
        let (mut f, block) = b.finish();

        let settings = DecompilerSettings::default()
            .with_post_increment(false)
            .with_inline_assignment(false);
        let events = EventLog::new();
        let cancel = CancellationToken::new();
        let ctx = TransformContext::new("m", &fx.ts, &settings, &events, &cancel);
        assert!(!TransformAssignment::new().run(&mut f, block, 0, &ctx).unwrap());
        assert!(events.is_empty());
    }
}
