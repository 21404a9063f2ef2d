//! Shared helpers for the assignment transforms.
//!
//! The statement-level folds in [`super::assignment`] and the expression-level
//! folds in [`super::expressions`] recognize the same building blocks: a
//! binary operation, optionally wrapped in a small-integer `conv`, whose left
//! operand reads the location being assigned. The checks deciding whether such
//! a shape may become a [`InstructionKind::CompoundAssignment`] live here.

use std::sync::Arc;

use crate::{
    il::{
        patterns::{
            infer_type, match_binary, match_conv, match_invocation, match_ldc_i4,
            matches_structurally, BinaryCapture,
        },
        BinaryNumericOperator, CompoundEvaluation, Function, InstrId, InstructionKind,
    },
    typesystem::{PrimitiveKind, Property, Sign, Type, TypeSystem},
    Result,
};

/// A small-integer `conv` wrapped around a compound operation's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmallIntegerConv {
    /// Target kind of the conversion.
    pub target: PrimitiveKind,
    /// Overflow checking of the conversion.
    pub check_overflow: bool,
}

/// Returns `true` if storing `value` into a location of type `ty` could change
/// the value through implicit narrowing.
///
/// Only small integer locations truncate implicitly. False positives are
/// acceptable; a value whose type cannot be inferred counts as truncating.
#[must_use]
pub fn is_implicit_truncation(f: &Function, value: InstrId, ty: &Type) -> bool {
    let Some(kind) = ty.primitive().filter(|k| k.is_small_integer()) else {
        return false;
    };
    if let Some(constant) = match_ldc_i4(f, value) {
        return !kind
            .value_range()
            .is_some_and(|(lo, hi)| (lo..=hi).contains(&i64::from(constant)));
    }
    if let Some((_, target, _)) = match_conv(f, value) {
        return target != kind;
    }
    if matches!(f.kind(value), InstructionKind::Comp { .. }) {
        return false;
    }
    let inferred = infer_type(f, value);
    if inferred.is_unknown() {
        return true;
    }
    !(inferred.size() <= ty.size() && inferred.sign() == ty.sign())
}

/// Looks through a truncating `conv` to a small integer type.
///
/// Compilers emit such a conversion between the operation and the store for
/// compound assignments to `byte`, `short` and friends.
#[must_use]
pub fn unwrap_small_integer_conv(f: &Function, inst: InstrId) -> (InstrId, Option<SmallIntegerConv>) {
    match match_conv(f, inst) {
        Some((argument, target, check_overflow)) if target.is_small_integer() => (
            argument,
            Some(SmallIntegerConv {
                target,
                check_overflow,
            }),
        ),
        _ => (inst, None),
    }
}

/// Returns `true` if `binary` can be expressed as a compound assignment to a
/// location of type `ty` without changing its meaning.
#[must_use]
pub fn is_binary_compatible_with_type(f: &Function, binary: InstrId, ty: &Type) -> bool {
    let Some(capture) = match_binary(f, binary) else {
        return false;
    };
    if ty.is_enum()
        && !matches!(
            capture.op,
            BinaryNumericOperator::Add
                | BinaryNumericOperator::Sub
                | BinaryNumericOperator::BitAnd
                | BinaryNumericOperator::BitOr
                | BinaryNumericOperator::BitXor
        )
    {
        return false;
    }
    if capture.sign != Sign::None && ty.sign() != Sign::None && capture.sign != ty.sign() {
        return false;
    }
    f.result_type(binary) == ty.stack_type()
}

/// Combined operator compatibility and `conv` consistency check.
#[must_use]
pub fn validate_compound_assign(
    f: &Function,
    binary: InstrId,
    conv: Option<SmallIntegerConv>,
    ty: &Type,
) -> bool {
    if !is_binary_compatible_with_type(f, binary, ty) {
        return false;
    }
    match (conv, match_binary(f, binary)) {
        (None, _) => true,
        (Some(conv), Some(capture)) => {
            ty.primitive() == Some(conv.target) && conv.check_overflow == capture.check_overflow
        }
        (Some(_), None) => false,
    }
}

/// If `getter` and `setter` are calls to the accessors of one property with the
/// same receiver and index arguments, returns that property.
///
/// The shared arguments must be pure, since the compound form evaluates them once.
#[must_use]
pub fn matching_getter_and_setter_calls(
    f: &Function,
    ts: &dyn TypeSystem,
    getter: InstrId,
    setter: InstrId,
) -> Option<Arc<Property>> {
    let get = match_invocation(f, getter)?;
    let set = match_invocation(f, setter)?;
    let (get_method, property) = ts.accessor_property(get.method)?;
    let (set_method, set_property) = ts.accessor_property(set.method)?;
    if property.token != set_property.token
        || property.getter != Some(get_method.token)
        || property.setter != Some(set_method.token)
    {
        return None;
    }
    if set.arguments.len() != get.arguments.len() + 1 {
        return None;
    }
    let same_arguments = get
        .arguments
        .iter()
        .zip(set.arguments)
        .all(|(g, s)| f.is_pure(*g) && matches_structurally(f, *g, *s));
    same_arguments.then_some(property)
}

/// Returns `true` for `binary.add/sub(_, ldc.i4 1)`.
#[must_use]
pub fn is_increment_by_one(f: &Function, binary: &BinaryCapture) -> bool {
    matches!(
        binary.op,
        BinaryNumericOperator::Add | BinaryNumericOperator::Sub
    ) && match_ldc_i4(f, binary.right) == Some(1)
}

/// Builds `compound.op(target, binary.right)` from the binary operation `binary`.
///
/// `target` must be detached. The right operand is taken out of `binary`, which
/// is left behind with a `nop` in its place.
///
/// # Errors
///
/// Returns [`crate::Error::AnalysisFailed`] if `binary` is not a binary operation.
pub fn build_compound(
    f: &mut Function,
    binary: InstrId,
    target: InstrId,
    ty: Type,
    evaluates_to: CompoundEvaluation,
) -> Result<InstrId> {
    let capture = match_binary(f, binary).ok_or_else(|| {
        crate::Error::AnalysisFailed(format!("{:?} is not a binary operation", binary))
    })?;
    let range = f.range(binary);
    let value = f.detach(capture.right)?;
    Ok(f.create_at(
        InstructionKind::CompoundAssignment {
            op: capture.op,
            target,
            value,
            ty,
            check_overflow: capture.check_overflow,
            sign: capture.sign,
            evaluates_to,
        },
        range,
    ))
}

/// Offset used when recording events for `inst`.
#[must_use]
pub fn offset_of(f: &Function, inst: InstrId) -> u32 {
    f.range(inst).start
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        il::VariableKind,
        typesystem::{PrimitiveKind, Sign},
    };

    fn function() -> Function {
        Function::new("m", Type::Void)
    }

    #[test]
    fn test_truncation_of_constants() {
        let mut f = function();
        let small = f.create(InstructionKind::LdcI4(200));
        let large = f.create(InstructionKind::LdcI4(300));
        let byte = Type::Primitive(PrimitiveKind::U1);
        assert!(!is_implicit_truncation(&f, small, &byte));
        assert!(is_implicit_truncation(&f, large, &byte));
        assert!(is_implicit_truncation(&f, small, &Type::Primitive(PrimitiveKind::I1)));
        assert!(!is_implicit_truncation(&f, large, &Type::INT32));
    }

    #[test]
    fn test_truncation_of_inferred_values() {
        let mut f = function();
        let b = f.add_variable(VariableKind::Local, Type::Primitive(PrimitiveKind::U1), "b", Some(0));
        let i = f.add_variable(VariableKind::Local, Type::INT32, "i", Some(1));
        let unknown = f.add_variable(VariableKind::StackSlot, Type::Unknown, "S_0", None);
        let load_b = f.create(InstructionKind::LdLoc(b));
        let load_i = f.create(InstructionKind::LdLoc(i));
        let load_unknown = f.create(InstructionKind::LdLoc(unknown));
        let short = Type::Primitive(PrimitiveKind::U2);

        assert!(!is_implicit_truncation(&f, load_b, &short));
        assert!(is_implicit_truncation(&f, load_i, &short));
        assert!(is_implicit_truncation(&f, load_unknown, &short));
    }

    #[test]
    fn test_conv_and_comparison_do_not_truncate() {
        let mut f = function();
        let one = f.create(InstructionKind::LdcI4(1));
        let two = f.create(InstructionKind::LdcI4(2));
        let comp = f.create(InstructionKind::Comp {
            kind: crate::il::ComparisonKind::LessThan,
            sign: Sign::Signed,
            left: one,
            right: two,
        });
        assert!(!is_implicit_truncation(&f, comp, &Type::BOOLEAN));

        let value = f.create(InstructionKind::LdcI4(1000));
        let conv = f.create(InstructionKind::Conv {
            argument: value,
            target: PrimitiveKind::I2,
            check_overflow: false,
            sign: Sign::None,
        });
        assert!(!is_implicit_truncation(&f, conv, &Type::Primitive(PrimitiveKind::I2)));
        assert!(is_implicit_truncation(&f, conv, &Type::Primitive(PrimitiveKind::U1)));
    }

    #[test]
    fn test_binary_compatibility() {
        let mut f = function();
        let left = f.create(InstructionKind::LdcI4(1));
        let right = f.create(InstructionKind::LdcI4(2));
        let binary = f.create(InstructionKind::BinaryNumeric {
            op: BinaryNumericOperator::Mul,
            left,
            right,
            check_overflow: false,
            sign: Sign::None,
        });
        assert!(is_binary_compatible_with_type(&f, binary, &Type::INT32));
        assert!(!is_binary_compatible_with_type(
            &f,
            binary,
            &Type::Primitive(PrimitiveKind::I8)
        ));
    }
}
