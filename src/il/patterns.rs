//! Structural match helpers over the instruction tree.
//!
//! Each `match_*` function inspects one instruction and returns the captured
//! operands on success. They never mutate the function and compose with plain
//! `?` / `and_then` chains:
//!
//! ```rust,ignore
//! let (target, field) = match_ldobj(f, inst).and_then(|(addr, _)| match_ldflda(f, addr))?;
//! ```

use std::sync::Arc;

use crate::{
    il::{
        BinaryNumericOperator, CallKind, ComparisonKind, Function, InstrId, InstructionKind,
        VarId, VariableKind,
    },
    typesystem::{
        binder::{binary_numeric_promotion, OperatorClass},
        Field, MethodReference, PrimitiveKind, Sign, Type,
    },
};

/// Operands of a [`InstructionKind::BinaryNumeric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryCapture {
    /// Operator.
    pub op: BinaryNumericOperator,
    /// Left operand.
    pub left: InstrId,
    /// Right operand.
    pub right: InstrId,
    /// Overflow checking.
    pub check_overflow: bool,
    /// Signedness.
    pub sign: Sign,
}

/// Operands of a [`InstructionKind::Call`].
#[derive(Debug, Clone, Copy)]
pub struct CallCapture<'a> {
    /// Dispatch flavor.
    pub kind: CallKind,
    /// Callee.
    pub method: &'a Arc<MethodReference>,
    /// Arguments including `this`.
    pub arguments: &'a [InstrId],
}

/// `ldloc v`
#[must_use]
pub fn match_ldloc(f: &Function, inst: InstrId) -> Option<VarId> {
    match f.kind(inst) {
        InstructionKind::LdLoc(v) => Some(*v),
        _ => None,
    }
}

/// `ldloc variable`
#[must_use]
pub fn match_ldloc_of(f: &Function, inst: InstrId, variable: VarId) -> bool {
    match_ldloc(f, inst) == Some(variable)
}

/// `ldloca v`
#[must_use]
pub fn match_ldloca(f: &Function, inst: InstrId) -> Option<VarId> {
    match f.kind(inst) {
        InstructionKind::LdLoca(v) => Some(*v),
        _ => None,
    }
}

/// `ldloc v` or `ldloca v`
#[must_use]
pub fn match_ldloc_or_ldloca(f: &Function, inst: InstrId) -> Option<VarId> {
    match_ldloc(f, inst).or_else(|| match_ldloca(f, inst))
}

/// `stloc v(value)`
#[must_use]
pub fn match_stloc(f: &Function, inst: InstrId) -> Option<(VarId, InstrId)> {
    match f.kind(inst) {
        InstructionKind::StLoc { variable, value } => Some((*variable, *value)),
        _ => None,
    }
}

/// `ldc.i4 n`
#[must_use]
pub fn match_ldc_i4(f: &Function, inst: InstrId) -> Option<i32> {
    match f.kind(inst) {
        InstructionKind::LdcI4(value) => Some(*value),
        _ => None,
    }
}

/// `ldc.i4 n` or `ldc.i8 n`, widened.
#[must_use]
pub fn match_ldc_integer(f: &Function, inst: InstrId) -> Option<i64> {
    match f.kind(inst) {
        InstructionKind::LdcI4(value) => Some(i64::from(*value)),
        InstructionKind::LdcI8(value) => Some(*value),
        _ => None,
    }
}

/// `ldnull`
#[must_use]
pub fn match_ldnull(f: &Function, inst: InstrId) -> bool {
    matches!(f.kind(inst), InstructionKind::LdNull)
}

/// `nop`
#[must_use]
pub fn match_nop(f: &Function, inst: InstrId) -> bool {
    matches!(f.kind(inst), InstructionKind::Nop)
}

/// `ldloc this`
#[must_use]
pub fn match_ldthis(f: &Function, inst: InstrId) -> bool {
    match_ldloc(f, inst).is_some_and(|v| f.variable(v).kind == VariableKind::This)
}

/// `ldobj T(target)`
#[must_use]
pub fn match_ldobj(f: &Function, inst: InstrId) -> Option<(InstrId, &Type)> {
    match f.kind(inst) {
        InstructionKind::LdObj { target, ty } => Some((*target, ty)),
        _ => None,
    }
}

/// `stobj T(target, value)`
#[must_use]
pub fn match_stobj(f: &Function, inst: InstrId) -> Option<(InstrId, InstrId, &Type)> {
    match f.kind(inst) {
        InstructionKind::StObj { target, value, ty } => Some((*target, *value, ty)),
        _ => None,
    }
}

/// `ldflda field(target)`
#[must_use]
pub fn match_ldflda(f: &Function, inst: InstrId) -> Option<(InstrId, &Arc<Field>)> {
    match f.kind(inst) {
        InstructionKind::LdFlda { target, field } => Some((*target, field)),
        _ => None,
    }
}

/// `ldsflda field`
#[must_use]
pub fn match_ldsflda(f: &Function, inst: InstrId) -> Option<&Arc<Field>> {
    match f.kind(inst) {
        InstructionKind::LdsFlda { field } => Some(field),
        _ => None,
    }
}

/// `ldobj(ldflda field(target))`, an instance field read.
#[must_use]
pub fn match_ldfld(f: &Function, inst: InstrId) -> Option<(InstrId, &Arc<Field>)> {
    let (address, _) = match_ldobj(f, inst)?;
    match_ldflda(f, address)
}

/// `call`/`callvirt`/`newobj`
#[must_use]
pub fn match_call(f: &Function, inst: InstrId) -> Option<CallCapture<'_>> {
    match f.kind(inst) {
        InstructionKind::Call {
            kind,
            method,
            arguments,
        } => Some(CallCapture {
            kind: *kind,
            method,
            arguments,
        }),
        _ => None,
    }
}

/// `call`/`callvirt` only, excluding object construction.
#[must_use]
pub fn match_invocation(f: &Function, inst: InstrId) -> Option<CallCapture<'_>> {
    match_call(f, inst).filter(|c| c.kind != CallKind::NewObj)
}

/// `br target`
#[must_use]
pub fn match_branch(f: &Function, inst: InstrId) -> Option<InstrId> {
    match f.kind(inst) {
        InstructionKind::Branch { target } => Some(*target),
        _ => None,
    }
}

/// `leave target(value)`
#[must_use]
pub fn match_leave(f: &Function, inst: InstrId) -> Option<(InstrId, InstrId)> {
    match f.kind(inst) {
        InstructionKind::Leave { target, value } => Some((*target, *value)),
        _ => None,
    }
}

/// `if (condition) true_inst else false_inst`
#[must_use]
pub fn match_if(f: &Function, inst: InstrId) -> Option<(InstrId, InstrId, InstrId)> {
    match f.kind(inst) {
        InstructionKind::IfInstruction {
            condition,
            true_inst,
            false_inst,
        } => Some((*condition, *true_inst, *false_inst)),
        _ => None,
    }
}

/// `logic.not(argument)`
#[must_use]
pub fn match_logic_not(f: &Function, inst: InstrId) -> Option<InstrId> {
    match f.kind(inst) {
        InstructionKind::LogicNot(argument) => Some(*argument),
        _ => None,
    }
}

/// `comp.kind(left, right)`
#[must_use]
pub fn match_comp(f: &Function, inst: InstrId) -> Option<(ComparisonKind, Sign, InstrId, InstrId)> {
    match f.kind(inst) {
        InstructionKind::Comp {
            kind,
            sign,
            left,
            right,
        } => Some((*kind, *sign, *left, *right)),
        _ => None,
    }
}

/// `comp.ne(left, right)` or `logic.not(comp.eq(left, right))`
#[must_use]
pub fn match_comp_not_equals(f: &Function, inst: InstrId) -> Option<(InstrId, InstrId)> {
    if let Some(inner) = match_logic_not(f, inst) {
        return match_comp(f, inner)
            .filter(|(kind, ..)| *kind == ComparisonKind::Equality)
            .map(|(_, _, l, r)| (l, r));
    }
    match_comp(f, inst)
        .filter(|(kind, ..)| *kind == ComparisonKind::Inequality)
        .map(|(_, _, l, r)| (l, r))
}

/// `isinst T(argument)`
#[must_use]
pub fn match_isinst(f: &Function, inst: InstrId) -> Option<(InstrId, &Type)> {
    match f.kind(inst) {
        InstructionKind::IsInst { argument, ty } => Some((*argument, ty)),
        _ => None,
    }
}

/// `binary.op(left, right)`
#[must_use]
pub fn match_binary(f: &Function, inst: InstrId) -> Option<BinaryCapture> {
    match f.kind(inst) {
        InstructionKind::BinaryNumeric {
            op,
            left,
            right,
            check_overflow,
            sign,
        } => Some(BinaryCapture {
            op: *op,
            left: *left,
            right: *right,
            check_overflow: *check_overflow,
            sign: *sign,
        }),
        _ => None,
    }
}

/// `conv T(argument)`: argument, target, overflow checking.
#[must_use]
pub fn match_conv(f: &Function, inst: InstrId) -> Option<(InstrId, PrimitiveKind, bool)> {
    match f.kind(inst) {
        InstructionKind::Conv {
            argument,
            target,
            check_overflow,
            ..
        } => Some((*argument, *target, *check_overflow)),
        _ => None,
    }
}

/// A block or container with no instructions, or a `nop`.
#[must_use]
pub fn is_empty_body(f: &Function, inst: InstrId) -> bool {
    match f.kind(inst) {
        InstructionKind::Nop => true,
        InstructionKind::Block {
            instructions,
            final_instruction,
            ..
        } => instructions.is_empty() && final_instruction.is_none(),
        _ => false,
    }
}

/// Unwraps single-instruction blocks: `Block { x }` yields `x`.
#[must_use]
pub fn unwrap_single(f: &Function, inst: InstrId) -> InstrId {
    match f.kind(inst) {
        InstructionKind::Block {
            instructions,
            final_instruction: None,
            ..
        } if instructions.len() == 1 => instructions[0],
        _ => inst,
    }
}

/// Returns `true` if `a` and `b` are the same operation on structurally equal operands.
///
/// Only pure shapes participate; anything containing an effect compares unequal,
/// since evaluating it twice would not produce the same value.
#[must_use]
pub fn matches_structurally(f: &Function, a: InstrId, b: InstrId) -> bool {
    if !f.is_pure(a) || !f.is_pure(b) {
        return false;
    }
    let same_node = match (f.kind(a), f.kind(b)) {
        (InstructionKind::LdcI4(x), InstructionKind::LdcI4(y)) => x == y,
        (InstructionKind::LdcI8(x), InstructionKind::LdcI8(y)) => x == y,
        (InstructionKind::LdStr(x), InstructionKind::LdStr(y)) => x == y,
        (InstructionKind::LdNull, InstructionKind::LdNull) => true,
        (InstructionKind::LdLoc(x), InstructionKind::LdLoc(y))
        | (InstructionKind::LdLoca(x), InstructionKind::LdLoca(y)) => x == y,
        (
            InstructionKind::LdFlda { field: x, .. },
            InstructionKind::LdFlda { field: y, .. },
        ) => x.token == y.token,
        (InstructionKind::LdsFlda { field: x }, InstructionKind::LdsFlda { field: y }) => {
            x.token == y.token
        }
        (InstructionKind::LdElema { ty: x, .. }, InstructionKind::LdElema { ty: y, .. }) => x == y,
        (
            InstructionKind::BinaryNumeric {
                op: xo,
                check_overflow: xc,
                sign: xs,
                ..
            },
            InstructionKind::BinaryNumeric {
                op: yo,
                check_overflow: yc,
                sign: ys,
                ..
            },
        ) => xo == yo && xc == yc && xs == ys,
        (
            InstructionKind::Conv {
                target: xt,
                check_overflow: xc,
                sign: xs,
                ..
            },
            InstructionKind::Conv {
                target: yt,
                check_overflow: yc,
                sign: ys,
                ..
            },
        ) => xt == yt && xc == yc && xs == ys,
        (InstructionKind::LogicNot(_), InstructionKind::LogicNot(_)) => true,
        (
            InstructionKind::Comp {
                kind: xk, sign: xs, ..
            },
            InstructionKind::Comp {
                kind: yk, sign: ys, ..
            },
        ) => xk == yk && xs == ys,
        _ => false,
    };
    if !same_node {
        return false;
    }
    let left = f.children(a);
    let right = f.children(b);
    left.len() == right.len()
        && left
            .iter()
            .zip(&right)
            .all(|(x, y)| matches_structurally(f, *x, *y))
}

/// Returns `true` if `variable` is read, written or address-taken inside `root`.
#[must_use]
pub fn is_used_within(f: &Function, variable: VarId, root: InstrId) -> bool {
    f.descendants(root).into_iter().any(|id| match f.kind(id) {
        InstructionKind::LdLoc(v) | InstructionKind::LdLoca(v) => *v == variable,
        InstructionKind::StLoc { variable: v, .. } | InstructionKind::Using { variable: v, .. } => {
            *v == variable
        }
        _ => false,
    })
}

/// Static type of the value produced by `inst`, [`Type::Unknown`] if it cannot be inferred.
#[must_use]
pub fn infer_type(f: &Function, inst: InstrId) -> Type {
    match f.kind(inst) {
        InstructionKind::LdcI4(_) => Type::INT32,
        InstructionKind::LdcI8(_) => PrimitiveKind::I8.into(),
        InstructionKind::LdcF(_) => PrimitiveKind::R8.into(),
        InstructionKind::LdStr(_) => PrimitiveKind::String.into(),
        InstructionKind::LdLoc(v) | InstructionKind::StLoc { variable: v, .. } => {
            f.variable(*v).ty.clone()
        }
        InstructionKind::LdLoca(v) => f.variable(*v).ty.clone().by_reference(),
        InstructionKind::LdObj { ty, .. }
        | InstructionKind::StObj { ty, .. }
        | InstructionKind::IsInst { ty, .. }
        | InstructionKind::UnboxAny { ty, .. }
        | InstructionKind::CompoundAssignment { ty, .. } => ty.clone(),
        InstructionKind::LdFlda { field, .. } | InstructionKind::LdsFlda { field } => {
            field.ty.clone().by_reference()
        }
        InstructionKind::LdElema { ty, .. } => ty.clone().by_reference(),
        InstructionKind::Comp { .. } | InstructionKind::LogicNot(_) => Type::BOOLEAN,
        InstructionKind::Conv { target, .. } => (*target).into(),
        InstructionKind::Call { kind, method, .. } => match kind {
            CallKind::NewObj => method.declaring_type.clone(),
            _ => method.signature.return_type.clone(),
        },
        InstructionKind::BinaryNumeric {
            op,
            left,
            right,
            sign,
            ..
        } => {
            let class = if op.is_shift() {
                OperatorClass::Shift
            } else if op.is_bitwise() {
                OperatorClass::Bitwise
            } else {
                OperatorClass::Arithmetic
            };
            let (l, r) = (infer_type(f, *left), infer_type(f, *right));
            binary_numeric_promotion(class, &l, &r)
                .map(|kind| match sign {
                    Sign::None => kind,
                    sign => kind.with_sign(*sign),
                })
                .map_or_else(
                    || {
                        PrimitiveKind::from_stack_type(f.result_type(inst), *sign)
                            .map_or(Type::Unknown, Type::Primitive)
                    },
                    Type::Primitive,
                )
        }
        InstructionKind::Block {
            final_instruction: Some(fin),
            ..
        } => infer_type(f, *fin),
        _ => Type::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typesystem::Token;

    fn field() -> Arc<Field> {
        Arc::new(Field {
            token: Token(0x0400_0001),
            name: "count".into(),
            declaring_type: Type::Unknown,
            ty: Type::INT32,
            is_static: false,
        })
    }

    #[test]
    fn test_match_ldfld_chain() {
        let mut f = Function::new("m", Type::Void);
        let this = f.add_variable(VariableKind::This, Type::OBJECT, "this", Some(0));
        let load = f.create(InstructionKind::LdLoc(this));
        let address = f.create(InstructionKind::LdFlda {
            target: load,
            field: field(),
        });
        let read = f.create(InstructionKind::LdObj {
            target: address,
            ty: Type::INT32,
        });

        let (target, fld) = match_ldfld(&f, read).unwrap();
        assert_eq!(target, load);
        assert_eq!(fld.name, "count");
        assert!(match_ldthis(&f, target));
        assert!(match_ldfld(&f, address).is_none());
    }

    #[test]
    fn test_comp_not_equals_both_shapes() {
        let mut f = Function::new("m", Type::Void);
        let v = f.add_variable(VariableKind::Local, Type::OBJECT, "v", Some(0));
        let l = f.create(InstructionKind::LdLoc(v));
        let r = f.create(InstructionKind::LdNull);
        let ne = f.create(InstructionKind::Comp {
            kind: ComparisonKind::Inequality,
            sign: Sign::None,
            left: l,
            right: r,
        });
        assert_eq!(match_comp_not_equals(&f, ne), Some((l, r)));

        let l2 = f.create(InstructionKind::LdLoc(v));
        let r2 = f.create(InstructionKind::LdNull);
        let eq = f.create(InstructionKind::Comp {
            kind: ComparisonKind::Equality,
            sign: Sign::None,
            left: l2,
            right: r2,
        });
        assert!(match_comp_not_equals(&f, eq).is_none());
        let not = f.create(InstructionKind::LogicNot(eq));
        assert_eq!(match_comp_not_equals(&f, not), Some((l2, r2)));
    }

    #[test]
    fn test_structural_equality() {
        let mut f = Function::new("m", Type::Void);
        let v = f.add_variable(VariableKind::Local, Type::OBJECT, "v", Some(0));
        let a1 = f.create(InstructionKind::LdLoc(v));
        let b1 = f.create(InstructionKind::LdFlda {
            target: a1,
            field: field(),
        });
        let a2 = f.create(InstructionKind::LdLoc(v));
        let b2 = f.create(InstructionKind::LdFlda {
            target: a2,
            field: field(),
        });
        let c = f.create(InstructionKind::LdcI4(1));
        assert!(matches_structurally(&f, b1, b2));
        assert!(!matches_structurally(&f, b1, c));
    }

    #[test]
    fn test_infer_binary_type() {
        let mut f = Function::new("m", Type::Void);
        let v = f.add_variable(VariableKind::Local, PrimitiveKind::U1.into(), "b", Some(0));
        let l = f.create(InstructionKind::LdLoc(v));
        let r = f.create(InstructionKind::LdcI4(1));
        let add = f.create(InstructionKind::BinaryNumeric {
            op: BinaryNumericOperator::Add,
            left: l,
            right: r,
            check_overflow: false,
            sign: Sign::None,
        });
        assert_eq!(infer_type(&f, add), Type::INT32);
        assert!(is_used_within(&f, v, add));
    }
}
