//! Expressions annotated with their C# type.
//!
//! The expression builder works bottom-up: every converted child carries the
//! type C# would assign to it, and parents insert casts where that type does
//! not match what the instruction computes.

use crate::{
    ast::syntax::{BinaryOperator, Expression, ExpressionKind, Literal},
    il::{InstrId, VarId},
    typesystem::{binder::is_implicit_conversion, PrimitiveKind, Type, TypeSystem},
};

/// How a conversion was expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionKind {
    /// No syntax; C# converts implicitly.
    Implicit,
    /// `(T)e`
    Explicit,
    /// `e as T`
    TryCast,
    /// `(T)(object)e` style unboxing.
    Unboxing,
}

/// Where a converted expression came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// A literal.
    Constant,
    /// A variable read or write.
    Variable(VarId),
    /// `this` or `base`.
    This,
    /// An operator; `checked` if evaluated with overflow checks.
    Operator {
        /// Wrapped in `checked(..)`.
        checked: bool,
    },
    /// A conversion.
    Conversion(ConversionKind),
    /// A method call; `resolved` if the callee was found in the type system.
    Invocation {
        /// Callee resolved.
        resolved: bool,
    },
    /// A property getter or setter rendered as member access.
    PropertyAccess,
    /// A field or array element address.
    FieldAccess,
    /// `is`/`as` type test.
    TypeTest,
    /// Read through an address.
    Dereference,
    /// Error placeholder.
    Error,
}

/// An expression with its inferred type.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedExpression {
    /// The expression.
    pub expression: Expression,
    /// Its C# type; [`Type::Unknown`] when nothing could be inferred.
    pub ty: Type,
    /// How it was produced.
    pub provenance: Provenance,
}

impl ConvertedExpression {
    #[must_use]
    pub fn new(expression: Expression, ty: Type, provenance: Provenance) -> Self {
        ConvertedExpression {
            expression,
            ty,
            provenance,
        }
    }

    /// Placeholder for something that has no expression form.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ConvertedExpression::new(
            Expression::new(ExpressionKind::Error(message.into())),
            Type::Unknown,
            Provenance::Error,
        )
    }

    /// Records `inst` as an origin of the outermost expression.
    #[must_use]
    pub fn with_instruction(mut self, inst: InstrId) -> Self {
        self.expression.instructions.push(inst);
        self
    }

    /// Converts to `target`, inserting a cast unless C# converts implicitly.
    ///
    /// Integer literals that fit the target range are retyped without a cast,
    /// and `0`/`1` become `false`/`true` when the target is `bool`.
    #[must_use]
    pub fn convert_to(self, target: &Type, ts: &dyn TypeSystem) -> ConvertedExpression {
        if target.is_unknown() || matches!(target, Type::Void) || self.ty == *target {
            return self;
        }
        if let ExpressionKind::Primitive(Literal::Int32(value)) = self.expression.kind {
            if target.is_primitive(PrimitiveKind::Boolean) && (value == 0 || value == 1) {
                let expression = Expression {
                    kind: ExpressionKind::Primitive(Literal::Boolean(value == 1)),
                    instructions: self.expression.instructions,
                };
                return ConvertedExpression::new(expression, target.clone(), Provenance::Constant);
            }
            let fits = target
                .primitive()
                .filter(|kind| kind.is_integer())
                .and_then(PrimitiveKind::value_range)
                .is_some_and(|(min, max)| (min..=max).contains(&i64::from(value)));
            if fits {
                return ConvertedExpression::new(self.expression, target.clone(), Provenance::Constant);
            }
        }
        if matches!(self.expression.kind, ExpressionKind::Null) && target.is_reference_type() != Some(false)
        {
            return ConvertedExpression::new(self.expression, target.clone(), Provenance::Constant);
        }
        if is_implicit_conversion(ts, &self.ty, target) {
            return ConvertedExpression::new(
                self.expression,
                target.clone(),
                Provenance::Conversion(ConversionKind::Implicit),
            );
        }
        let cast = Expression::new(ExpressionKind::Cast {
            ty: target.clone(),
            expression: Box::new(self.expression),
        });
        ConvertedExpression::new(
            cast,
            target.clone(),
            Provenance::Conversion(ConversionKind::Explicit),
        )
    }

    /// Converts to a `bool` condition.
    ///
    /// Numbers compare against `0` and references against `null`.
    #[must_use]
    pub fn convert_to_boolean(self) -> ConvertedExpression {
        if self.ty.is_primitive(PrimitiveKind::Boolean) || self.ty.is_unknown() {
            return self;
        }
        let right = if self.ty.primitive().is_some_and(PrimitiveKind::is_numeric) {
            Expression::literal(Literal::Int32(0))
        } else if self.ty.is_reference_type() == Some(true) {
            Expression::new(ExpressionKind::Null)
        } else {
            return self;
        };
        ConvertedExpression::new(
            Expression::binary(BinaryOperator::Inequality, self.expression, right),
            Type::BOOLEAN,
            Provenance::Operator { checked: false },
        )
    }
}
