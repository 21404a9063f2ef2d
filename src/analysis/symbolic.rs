//! Symbolic evaluation of integer expressions relative to a state field.
//!
//! Compiler-generated state machines keep their phase in an integer field and
//! dispatch on it with chains of comparisons, often against a local copy or
//! an offset (`state - 2 < 3`). [`SymbolicEvaluationContext::eval`] abstracts
//! such expressions without executing them: the state field reads as
//! `State(0)`, subtracting constants shifts the offset, and comparisons
//! against constants turn into [`SymbolicValue::StateInSet`] over the set of
//! state values that make the comparison true.
//!
//! Evaluation never mutates the function and never fails; unrecognized shapes
//! produce [`SymbolicValue::Unknown`].

use std::collections::HashSet;

use crate::{
    il::{
        patterns::{match_binary, match_comp, match_ldc_i4, match_ldfld, match_ldloc, match_logic_not},
        BinaryNumericOperator, ComparisonKind, Function, InstrId, VarId, VariableKind,
    },
    typesystem::Token,
    utils::LongSet,
};

/// Abstract value of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolicValue {
    /// Nothing is known.
    Unknown,
    /// A known integer.
    IntegerConstant(i32),
    /// The state field plus a constant: `state + offset`.
    State(i32),
    /// The implicit receiver.
    This,
    /// A boolean that is true exactly when the state field is in the set.
    StateInSet(LongSet),
}

impl SymbolicValue {
    /// Interprets the value as a boolean condition on the state.
    ///
    /// `state + c` is true when it is nonzero, i.e. when the state is not `-c`.
    #[must_use]
    pub fn as_bool(self) -> SymbolicValue {
        match self {
            SymbolicValue::State(offset) => {
                SymbolicValue::StateInSet(LongSet::single(-i64::from(offset)).invert())
            }
            other => other,
        }
    }

    /// The state set, for [`SymbolicValue::StateInSet`].
    #[must_use]
    pub fn state_set(&self) -> Option<&LongSet> {
        match self {
            SymbolicValue::StateInSet(set) => Some(set),
            _ => None,
        }
    }
}

/// Evaluation context: the state field and the variables known to hold it.
#[derive(Debug, Clone)]
pub struct SymbolicEvaluationContext {
    state_field: Token,
    state_variables: HashSet<VarId>,
}

impl SymbolicEvaluationContext {
    /// Creates a context for the state machine whose state lives in `state_field`.
    #[must_use]
    pub fn new(state_field: Token) -> Self {
        SymbolicEvaluationContext {
            state_field,
            state_variables: HashSet::new(),
        }
    }

    /// The state field.
    #[must_use]
    pub fn state_field(&self) -> Token {
        self.state_field
    }

    /// Registers `variable` as holding a copy of the unmodified state.
    pub fn add_state_variable(&mut self, variable: VarId) {
        self.state_variables.insert(variable);
    }

    /// Returns `true` if `variable` was registered as a state copy.
    #[must_use]
    pub fn is_state_variable(&self, variable: VarId) -> bool {
        self.state_variables.contains(&variable)
    }

    /// Abstracts the value of `inst`.
    #[must_use]
    pub fn eval(&self, f: &Function, inst: InstrId) -> SymbolicValue {
        if let Some(binary) = match_binary(f, inst) {
            if binary.op == BinaryNumericOperator::Sub && !binary.check_overflow {
                let left = self.eval(f, binary.left);
                let right = self.eval(f, binary.right);
                return match (left, right) {
                    (
                        SymbolicValue::State(l),
                        SymbolicValue::IntegerConstant(r),
                    ) => SymbolicValue::State(l.wrapping_sub(r)),
                    (
                        SymbolicValue::IntegerConstant(l),
                        SymbolicValue::IntegerConstant(r),
                    ) => SymbolicValue::IntegerConstant(l.wrapping_sub(r)),
                    _ => SymbolicValue::Unknown,
                };
            }
            return SymbolicValue::Unknown;
        }
        if let Some((target, field)) = match_ldfld(f, inst) {
            if field.token == self.state_field && self.eval(f, target) == SymbolicValue::This {
                return SymbolicValue::State(0);
            }
            return SymbolicValue::Unknown;
        }
        if let Some(variable) = match_ldloc(f, inst) {
            if self.is_state_variable(variable) {
                return SymbolicValue::State(0);
            }
            if f.variable(variable).kind == VariableKind::This {
                return SymbolicValue::This;
            }
            return SymbolicValue::Unknown;
        }
        if let Some(value) = match_ldc_i4(f, inst) {
            return SymbolicValue::IntegerConstant(value);
        }
        if let Some((kind, _, left, right)) = match_comp(f, inst) {
            let (SymbolicValue::State(offset), SymbolicValue::IntegerConstant(constant)) =
                (self.eval(f, left), self.eval(f, right))
            else {
                return SymbolicValue::Unknown;
            };
            // Interval arithmetic in 64 bits so `< i32::MIN` yields an empty set.
            let constant = i64::from(constant);
            let true_values = match kind {
                ComparisonKind::Equality => LongSet::single(constant),
                ComparisonKind::Inequality => LongSet::single(constant).invert(),
                ComparisonKind::LessThan => LongSet::range(i64::from(i32::MIN), constant - 1),
                ComparisonKind::LessThanOrEqual => LongSet::range(i64::from(i32::MIN), constant),
                ComparisonKind::GreaterThan => LongSet::range(constant + 1, i64::from(i32::MAX)),
                ComparisonKind::GreaterThanOrEqual => {
                    LongSet::range(constant, i64::from(i32::MAX))
                }
            };
            return SymbolicValue::StateInSet(true_values.add_offset(-i64::from(offset)));
        }
        if let Some(argument) = match_logic_not(f, inst) {
            return match self.eval(f, argument).as_bool() {
                SymbolicValue::StateInSet(set) => SymbolicValue::StateInSet(set.invert()),
                _ => SymbolicValue::Unknown,
            };
        }
        SymbolicValue::Unknown
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        il::InstructionKind,
        typesystem::{Field, Sign, Type},
    };

    struct Fixture {
        f: Function,
        this: VarId,
        copy: VarId,
        field: Arc<Field>,
    }

    fn fixture() -> Fixture {
        let mut f = Function::new("MoveNext", Type::BOOLEAN);
        let this = f.add_variable(VariableKind::This, Type::OBJECT, "this", Some(0));
        let copy = f.add_variable(VariableKind::Local, Type::INT32, "num", Some(0));
        let field = Arc::new(Field {
            token: Token::from_parts(Token::FIELD, 1),
            name: "<>1__state".to_string(),
            declaring_type: Type::OBJECT,
            ty: Type::INT32,
            is_static: false,
        });
        Fixture { f, this, copy, field }
    }

    fn load_state(fx: &mut Fixture) -> InstrId {
        let this = fx.f.create(InstructionKind::LdLoc(fx.this));
        let address = fx.f.create(InstructionKind::LdFlda {
            target: this,
            field: Arc::clone(&fx.field),
        });
        fx.f.create(InstructionKind::LdObj {
            target: address,
            ty: Type::INT32,
        })
    }

    fn compare(fx: &mut Fixture, kind: ComparisonKind, left: InstrId, constant: i32) -> InstrId {
        let right = fx.f.create(InstructionKind::LdcI4(constant));
        fx.f.create(InstructionKind::Comp {
            kind,
            sign: Sign::Signed,
            left,
            right,
        })
    }

    #[test]
    fn test_state_field_and_copy() {
        let mut fx = fixture();
        let mut ctx = SymbolicEvaluationContext::new(fx.field.token);
        let field = load_state(&mut fx);
        let copy = fx.f.create(InstructionKind::LdLoc(fx.copy));
        assert_eq!(ctx.eval(&fx.f, field), SymbolicValue::State(0));
        assert_eq!(ctx.eval(&fx.f, copy), SymbolicValue::Unknown);
        ctx.add_state_variable(fx.copy);
        assert_eq!(ctx.eval(&fx.f, copy), SymbolicValue::State(0));
    }

    #[test]
    fn test_subtraction_shifts_offset() {
        let mut fx = fixture();
        let ctx = SymbolicEvaluationContext::new(fx.field.token);
        let state = load_state(&mut fx);
        let two = fx.f.create(InstructionKind::LdcI4(2));
        let sub = fx.f.create(InstructionKind::BinaryNumeric {
            op: BinaryNumericOperator::Sub,
            left: state,
            right: two,
            check_overflow: false,
            sign: Sign::None,
        });
        assert_eq!(ctx.eval(&fx.f, sub), SymbolicValue::State(-2));

        // (state - 2) < 3  <=>  state in [MIN+2, 4]
        let cmp = compare(&mut fx, ComparisonKind::LessThan, sub, 3);
        let set = ctx.eval(&fx.f, cmp);
        let set = set.state_set().unwrap();
        assert!(set.contains(4));
        assert!(!set.contains(5));
        assert!(set.contains(-100));
    }

    #[test]
    fn test_comparisons_produce_state_sets() {
        let mut fx = fixture();
        let ctx = SymbolicEvaluationContext::new(fx.field.token);
        let state = load_state(&mut fx);
        let eq = compare(&mut fx, ComparisonKind::Equality, state, 1);
        assert_eq!(
            ctx.eval(&fx.f, eq),
            SymbolicValue::StateInSet(LongSet::single(1))
        );

        let state = load_state(&mut fx);
        let not = {
            let cmp = compare(&mut fx, ComparisonKind::Equality, state, 1);
            fx.f.create(InstructionKind::LogicNot(cmp))
        };
        assert_eq!(
            ctx.eval(&fx.f, not),
            SymbolicValue::StateInSet(LongSet::single(1).invert())
        );

        let state = load_state(&mut fx);
        let never = compare(&mut fx, ComparisonKind::LessThan, state, i32::MIN);
        assert_eq!(
            ctx.eval(&fx.f, never),
            SymbolicValue::StateInSet(LongSet::empty())
        );
    }

    #[test]
    fn test_state_as_condition() {
        let mut fx = fixture();
        let ctx = SymbolicEvaluationContext::new(fx.field.token);
        let state = load_state(&mut fx);
        let not = fx.f.create(InstructionKind::LogicNot(state));
        // !state is true exactly when state == 0
        assert_eq!(
            ctx.eval(&fx.f, not),
            SymbolicValue::StateInSet(LongSet::single(0))
        );
    }

    #[test]
    fn test_unrecognized_is_unknown() {
        let mut fx = fixture();
        let ctx = SymbolicEvaluationContext::new(fx.field.token);
        let text = fx.f.create(InstructionKind::LdStr("x".into()));
        assert_eq!(ctx.eval(&fx.f, text), SymbolicValue::Unknown);

        let other_field = Arc::new(Field {
            token: Token::from_parts(Token::FIELD, 2),
            ..(*fx.field).clone()
        });
        let this = fx.f.create(InstructionKind::LdLoc(fx.this));
        let address = fx.f.create(InstructionKind::LdFlda {
            target: this,
            field: other_field,
        });
        let load = fx.f.create(InstructionKind::LdObj {
            target: address,
            ty: Type::INT32,
        });
        assert_eq!(ctx.eval(&fx.f, load), SymbolicValue::Unknown);
    }
}
