//! C# operator and conversion rules.
//!
//! The expression builder asks two questions while lowering instructions:
//!
//! - Which type would C# pick for `a op b` given the operand types? ([`binary_numeric_promotion`])
//! - Does a value of type `from` convert to `to` without a cast? ([`is_implicit_conversion`])
//!
//! Whenever the answer disagrees with what the instruction computes, the
//! builder inserts explicit casts.

use crate::typesystem::{PrimitiveKind, Type, TypeSystem};

/// The operand class of a binary operator, which selects the promotion rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorClass {
    /// `+ - * / %`
    Arithmetic,
    /// `& | ^`, also defined on `bool`
    Bitwise,
    /// `<< >>`, result has the promoted type of the left operand
    Shift,
    /// `== != < <= > >=`
    Comparison,
}

/// Result type C# assigns to `left op right`, or `None` if the operator is not applicable.
///
/// For comparisons the returned type is the type both operands are compared in,
/// not `bool`.
#[must_use]
pub fn binary_numeric_promotion(
    class: OperatorClass,
    left: &Type,
    right: &Type,
) -> Option<PrimitiveKind> {
    use PrimitiveKind as P;

    let l = left.primitive()?;
    let r = right.primitive()?;

    if l == P::Boolean && r == P::Boolean {
        return match class {
            OperatorClass::Bitwise | OperatorClass::Comparison => Some(P::Boolean),
            _ => None,
        };
    }
    if !l.is_numeric() || !r.is_numeric() {
        return None;
    }

    if class == OperatorClass::Shift {
        if !is_implicit_numeric(r, P::I4) {
            return None;
        }
        return Some(unary_promotion(l));
    }

    let either = |k: P| l == k || r == k;
    let signed_operand = |k: P| matches!(k, P::I1 | P::I2 | P::I4 | P::I8 | P::I);

    Some(if either(P::R8) {
        P::R8
    } else if either(P::R4) {
        P::R4
    } else if either(P::U8) {
        if signed_operand(l) || signed_operand(r) {
            return None;
        }
        P::U8
    } else if either(P::I8) {
        P::I8
    } else if either(P::U) {
        if signed_operand(l) || signed_operand(r) {
            return None;
        }
        P::U
    } else if either(P::I) {
        P::I
    } else if either(P::U4) {
        if matches!(l, P::I1 | P::I2 | P::I4) || matches!(r, P::I1 | P::I2 | P::I4) {
            P::I8
        } else {
            P::U4
        }
    } else {
        P::I4
    })
}

/// The type C# promotes a single operand to before arithmetic.
#[must_use]
pub fn unary_promotion(kind: PrimitiveKind) -> PrimitiveKind {
    if kind.is_small_integer() {
        PrimitiveKind::I4
    } else {
        kind
    }
}

/// Implicit numeric conversions (ECMA-334, 10.2.3).
#[must_use]
pub fn is_implicit_numeric(from: PrimitiveKind, to: PrimitiveKind) -> bool {
    use PrimitiveKind as P;

    if from == to {
        return true;
    }
    match from {
        P::I1 => matches!(to, P::I2 | P::I4 | P::I8 | P::R4 | P::R8 | P::I),
        P::U1 => matches!(
            to,
            P::I2 | P::U2 | P::I4 | P::U4 | P::I8 | P::U8 | P::R4 | P::R8 | P::I | P::U
        ),
        P::I2 => matches!(to, P::I4 | P::I8 | P::R4 | P::R8 | P::I),
        P::U2 | P::Char => matches!(
            to,
            P::U2 | P::I4 | P::U4 | P::I8 | P::U8 | P::R4 | P::R8 | P::I | P::U
        ),
        P::I4 => matches!(to, P::I8 | P::R4 | P::R8 | P::I),
        P::U4 => matches!(to, P::I8 | P::U8 | P::R4 | P::R8 | P::U),
        P::I8 | P::U8 => matches!(to, P::R4 | P::R8),
        P::R4 => to == P::R8,
        P::I => matches!(to, P::I8 | P::R4 | P::R8),
        P::U => matches!(to, P::U8 | P::R4 | P::R8),
        _ => false,
    }
}

/// Returns `true` if `from` converts to `to` without an explicit cast.
///
/// Unknown types on either side are treated as compatible: without type
/// information there is nothing to base a cast on.
#[must_use]
pub fn is_implicit_conversion(ts: &dyn TypeSystem, from: &Type, to: &Type) -> bool {
    if from == to || from.is_unknown() || to.is_unknown() {
        return true;
    }
    match (from, to) {
        (Type::Primitive(f), Type::Primitive(t)) if f.is_numeric() && t.is_numeric() => {
            is_implicit_numeric(*f, *t)
        }
        // boxing and reference conversions to object
        (_, Type::Primitive(PrimitiveKind::Object)) => {
            !matches!(from, Type::Void | Type::ByReference(_) | Type::Pointer(_))
        }
        (Type::Definition(_), Type::Definition(_)) => ts.is_subtype(from, to),
        (Type::ByReference(f), Type::ByReference(t)) => f == t,
        _ => false,
    }
}
