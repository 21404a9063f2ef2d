//! Instruction to expression conversion.
//!
//! [`ExpressionBuilder::convert`] maps one instruction subtree to a
//! [`ConvertedExpression`]. Children are converted first; the parent then
//! reconciles their C# types with what the instruction computes, inserting
//! casts where C# would otherwise pick a different operator or sign.
//!
//! Instructions without an expression form become an error placeholder
//! rather than failing the whole function.

use crate::{
    ast::{
        converted::{ConversionKind, ConvertedExpression, Provenance},
        syntax::{BinaryOperator, Expression, ExpressionKind, Literal, UnaryOperator},
    },
    il::{
        patterns::{match_isinst, match_ldc_i4, match_ldloc, match_ldnull},
        BinaryNumericOperator, BlockKind, CallKind, ComparisonKind, CompoundEvaluation, Function,
        InstrId, InstructionKind, VarId, VariableKind,
    },
    typesystem::{
        binder::{binary_numeric_promotion, OperatorClass},
        Field, MethodReference, PrimitiveKind, Sign, StackType, Type, TypeSystem,
    },
};

/// Converts instructions of one function to expressions.
pub struct ExpressionBuilder<'a> {
    f: &'a Function,
    ts: &'a dyn TypeSystem,
}

impl<'a> ExpressionBuilder<'a> {
    /// Creates a builder over `f`.
    #[must_use]
    pub fn new(f: &'a Function, ts: &'a dyn TypeSystem) -> Self {
        ExpressionBuilder { f, ts }
    }

    /// Converts `inst` and its subtree.
    #[must_use]
    pub fn convert(&self, inst: InstrId) -> ConvertedExpression {
        let f = self.f;
        match f.kind(inst) {
            InstructionKind::LdcI4(value) => ConvertedExpression::new(
                Expression::literal(Literal::Int32(*value)),
                Type::INT32,
                Provenance::Constant,
            )
            .with_instruction(inst),
            InstructionKind::LdcI8(value) => ConvertedExpression::new(
                Expression::literal(Literal::Int64(*value)),
                PrimitiveKind::I8.into(),
                Provenance::Constant,
            )
            .with_instruction(inst),
            InstructionKind::LdcF(value) => ConvertedExpression::new(
                Expression::literal(Literal::Float(*value)),
                PrimitiveKind::R8.into(),
                Provenance::Constant,
            )
            .with_instruction(inst),
            InstructionKind::LdStr(value) => ConvertedExpression::new(
                Expression::literal(Literal::String(value.clone())),
                PrimitiveKind::String.into(),
                Provenance::Constant,
            )
            .with_instruction(inst),
            InstructionKind::LdNull => ConvertedExpression::new(
                Expression::new(ExpressionKind::Null),
                Type::OBJECT,
                Provenance::Constant,
            )
            .with_instruction(inst),
            InstructionKind::LdLoc(variable) => {
                let var = f.variable(*variable);
                let loaded = self.variable(inst, *variable);
                if matches!(var.ty, Type::ByReference(_)) {
                    let expression = Expression::new(ExpressionKind::Direction(Box::new(
                        loaded.expression,
                    )));
                    return ConvertedExpression::new(expression, loaded.ty, loaded.provenance);
                }
                loaded
            }
            InstructionKind::LdLoca(variable) => {
                let loaded = self.variable(inst, *variable);
                ConvertedExpression::new(
                    Expression::new(ExpressionKind::Direction(Box::new(loaded.expression))),
                    loaded.ty.by_reference(),
                    loaded.provenance,
                )
            }
            InstructionKind::StLoc { variable, value } => {
                let var = f.variable(*variable);
                let left = Expression::identifier(var.name.clone());
                let right = self.convert(*value).convert_to(&var.ty, self.ts);
                ConvertedExpression::new(
                    Expression::assignment(None, left, right.expression),
                    var.ty.clone(),
                    Provenance::Variable(*variable),
                )
                .with_instruction(inst)
            }
            InstructionKind::LdObj { target, ty } => {
                let address = self.convert(*target);
                match self.strip_direction(address, ty) {
                    Ok(location) => location.convert_to(ty, self.ts).with_instruction(inst),
                    Err(address) => ConvertedExpression::new(
                        Expression::unary(UnaryOperator::Dereference, address.expression),
                        ty.clone(),
                        Provenance::Dereference,
                    )
                    .with_instruction(inst),
                }
            }
            InstructionKind::StObj { target, value, ty } => {
                let address = self.convert(*target);
                let left = match self.strip_direction(address, ty) {
                    Ok(location) => location.expression,
                    Err(address) => {
                        Expression::unary(UnaryOperator::Dereference, address.expression)
                    }
                };
                let right = self.convert(*value).convert_to(ty, self.ts);
                ConvertedExpression::new(
                    Expression::assignment(None, left, right.expression),
                    ty.clone(),
                    Provenance::Dereference,
                )
                .with_instruction(inst)
            }
            InstructionKind::LdFlda { target, field } => {
                let object = self.convert(*target);
                let object = match object.expression.kind {
                    ExpressionKind::Direction(inner) => *inner,
                    kind => Expression {
                        kind,
                        instructions: object.expression.instructions,
                    },
                };
                self.field_address(inst, object, field)
            }
            InstructionKind::LdsFlda { field } => {
                let owner = Expression::new(ExpressionKind::TypeReference(
                    field.declaring_type.clone(),
                ));
                self.field_address(inst, owner, field)
            }
            InstructionKind::LdElema { array, index, ty } => {
                let array = self.convert(*array);
                let index = self.convert(*index);
                let element = Expression::new(ExpressionKind::Index {
                    target: Box::new(array.expression),
                    index: Box::new(index.expression),
                })
                .with_instruction(inst);
                ConvertedExpression::new(
                    Expression::new(ExpressionKind::Direction(Box::new(element))),
                    ty.clone().by_reference(),
                    Provenance::FieldAccess,
                )
            }
            InstructionKind::BinaryNumeric {
                op,
                left,
                right,
                check_overflow,
                sign,
            } => self.binary_numeric(inst, *op, *left, *right, *check_overflow, *sign),
            InstructionKind::Comp {
                kind,
                sign,
                left,
                right,
            } => self.comparison(inst, *kind, *sign, *left, *right),
            InstructionKind::LogicNot(argument) => {
                let condition = self.convert_condition(*argument);
                ConvertedExpression::new(
                    Expression::unary(UnaryOperator::Not, condition.expression),
                    Type::BOOLEAN,
                    Provenance::Operator { checked: false },
                )
                .with_instruction(inst)
            }
            InstructionKind::Conv {
                argument,
                target,
                check_overflow,
                sign,
            } => self.conversion(inst, *argument, *target, *check_overflow, *sign),
            InstructionKind::Call {
                kind,
                method,
                arguments,
            } => self.call(inst, *kind, method, arguments),
            InstructionKind::IsInst { argument, ty } => {
                let operand = self.convert(*argument);
                ConvertedExpression::new(
                    Expression::new(ExpressionKind::As {
                        expression: Box::new(operand.expression),
                        ty: ty.clone(),
                    }),
                    ty.clone(),
                    Provenance::Conversion(ConversionKind::TryCast),
                )
                .with_instruction(inst)
            }
            InstructionKind::UnboxAny { argument, ty } => {
                let operand = self.convert(*argument);
                let boxed = if operand.ty.is_reference_type() == Some(true) {
                    operand.expression
                } else {
                    Expression::new(ExpressionKind::Cast {
                        ty: Type::OBJECT,
                        expression: Box::new(operand.expression),
                    })
                };
                ConvertedExpression::new(
                    Expression::new(ExpressionKind::Cast {
                        ty: ty.clone(),
                        expression: Box::new(boxed),
                    }),
                    ty.clone(),
                    Provenance::Conversion(ConversionKind::Unboxing),
                )
                .with_instruction(inst)
            }
            InstructionKind::CompoundAssignment {
                op,
                target,
                value,
                ty,
                check_overflow,
                evaluates_to,
                ..
            } => self.compound_assignment(
                inst,
                *op,
                *target,
                *value,
                ty,
                *check_overflow,
                *evaluates_to,
            ),
            InstructionKind::Block {
                kind: BlockKind::CallInlineAssign,
                instructions,
                final_instruction,
                ..
            } => match instructions.first() {
                Some(&assignment) => {
                    let ty = final_instruction
                        .map_or(Type::Unknown, |fin| self.convert(fin).ty);
                    let converted = self.convert(assignment);
                    ConvertedExpression::new(converted.expression, ty, converted.provenance)
                        .with_instruction(inst)
                }
                None => self.unsupported(inst),
            },
            _ => self.unsupported(inst),
        }
    }

    /// Converts `inst` for use as a condition.
    #[must_use]
    pub fn convert_condition(&self, inst: InstrId) -> ConvertedExpression {
        self.convert(inst).convert_to_boolean()
    }

    fn unsupported(&self, inst: InstrId) -> ConvertedExpression {
        let name = self.f.kind(inst).opcode_name();
        log::trace!("{}: no expression form for {}", self.f.name(), name);
        ConvertedExpression::error(format!("OpCode not supported: {}", name))
    }

    /// `this` or the variable name, annotated with `inst`.
    fn variable(&self, inst: InstrId, variable: VarId) -> ConvertedExpression {
        let var = self.f.variable(variable);
        if var.kind == VariableKind::This {
            return ConvertedExpression::new(
                Expression::new(ExpressionKind::This).with_instruction(inst),
                var.ty.clone(),
                Provenance::This,
            );
        }
        ConvertedExpression::new(
            Expression::identifier(var.name.clone()).with_instruction(inst),
            var.ty.clone(),
            Provenance::Variable(variable),
        )
    }

    /// `ref x` read or written as `T` is just `x`.
    ///
    /// Returns the address unchanged if it is not a `ref` expression or if its
    /// element type does not match `ty` in size and stack type.
    fn strip_direction(
        &self,
        address: ConvertedExpression,
        ty: &Type,
    ) -> Result<ConvertedExpression, ConvertedExpression> {
        let element = address.ty.element_type().cloned().unwrap_or(Type::Unknown);
        let compatible = element.is_unknown()
            || ty.is_unknown()
            || element == *ty
            || (element.stack_type() == ty.stack_type() && element.size() == ty.size());
        match address.expression.kind {
            ExpressionKind::Direction(inner) if compatible => Ok(ConvertedExpression::new(
                *inner,
                element,
                address.provenance,
            )),
            kind => Err(ConvertedExpression::new(
                Expression {
                    kind,
                    instructions: address.expression.instructions,
                },
                address.ty,
                address.provenance,
            )),
        }
    }

    fn field_address(&self, inst: InstrId, owner: Expression, field: &Field) -> ConvertedExpression {
        let member = Expression::member(owner, field.name.clone()).with_instruction(inst);
        ConvertedExpression::new(
            Expression::new(ExpressionKind::Direction(Box::new(member))),
            field.ty.clone().by_reference(),
            Provenance::FieldAccess,
        )
    }

    fn binary_numeric(
        &self,
        inst: InstrId,
        op: BinaryNumericOperator,
        left: InstrId,
        right: InstrId,
        check_overflow: bool,
        sign: Sign,
    ) -> ConvertedExpression {
        let class = if op.is_shift() {
            OperatorClass::Shift
        } else if op.is_bitwise() {
            OperatorClass::Bitwise
        } else {
            OperatorClass::Arithmetic
        };
        let mut l = self.convert(left);
        let mut r = self.convert(right);
        let stack = self.f.result_type(inst);

        let fits = binary_numeric_promotion(class, &l.ty, &r.ty).is_some_and(|kind| {
            kind.stack_type() == stack && (sign == Sign::None || kind.sign() == sign)
        });
        if !fits {
            if let Some(target) = PrimitiveKind::from_stack_type(stack, sign) {
                let target = Type::Primitive(target);
                l = l.convert_to(&target, self.ts);
                if !op.is_shift() {
                    r = r.convert_to(&target, self.ts);
                }
            }
        }
        let ty = binary_numeric_promotion(class, &l.ty, &r.ty)
            .or_else(|| PrimitiveKind::from_stack_type(stack, sign))
            .map_or(Type::Unknown, Type::Primitive);

        let mut expression = Expression::binary(op.into(), l.expression, r.expression);
        if check_overflow {
            expression = Expression::new(ExpressionKind::Checked(Box::new(expression)));
        }
        ConvertedExpression::new(
            expression,
            ty,
            Provenance::Operator {
                checked: check_overflow,
            },
        )
        .with_instruction(inst)
    }

    fn comparison(
        &self,
        inst: InstrId,
        kind: ComparisonKind,
        sign: Sign,
        left: InstrId,
        right: InstrId,
    ) -> ConvertedExpression {
        let f = self.f;
        let equality = matches!(kind, ComparisonKind::Equality | ComparisonKind::Inequality);

        // isinst T(x) == null  ->  !(x is T)
        if equality {
            let test = match (match_isinst(f, left), match_isinst(f, right)) {
                (Some((argument, ty)), _) if match_ldnull(f, right) => Some((left, argument, ty)),
                (_, Some((argument, ty))) if match_ldnull(f, left) => Some((right, argument, ty)),
                _ => None,
            };
            if let Some((isinst, argument, ty)) = test {
                let operand = self.convert(argument);
                let is = Expression::new(ExpressionKind::Is {
                    expression: Box::new(operand.expression),
                    ty: ty.clone(),
                })
                .with_instruction(isinst);
                let expression = if kind == ComparisonKind::Equality {
                    Expression::unary(UnaryOperator::Not, is)
                } else {
                    is
                };
                return ConvertedExpression::new(
                    expression.with_instruction(inst),
                    Type::BOOLEAN,
                    Provenance::TypeTest,
                );
            }
        }

        let mut l = self.convert(left);
        let mut r = self.convert(right);

        // b == 0  ->  !b,  b != 0  ->  b, with the constant on either side
        if equality {
            let folded = match (match_ldc_i4(f, left), match_ldc_i4(f, right)) {
                (_, Some(value @ (0 | 1))) if l.ty.is_primitive(PrimitiveKind::Boolean) => {
                    Some((value, true))
                }
                (Some(value @ (0 | 1)), _) if r.ty.is_primitive(PrimitiveKind::Boolean) => {
                    Some((value, false))
                }
                _ => None,
            };
            if let Some((value, bool_on_left)) = folded {
                let (operand, constant) = if bool_on_left { (l, right) } else { (r, left) };
                let keep = (value == 1) == (kind == ComparisonKind::Equality);
                if keep {
                    return operand.with_instruction(constant).with_instruction(inst);
                }
                return ConvertedExpression::new(
                    Expression::unary(UnaryOperator::Not, operand.expression)
                        .with_instruction(constant)
                        .with_instruction(inst),
                    Type::BOOLEAN,
                    Provenance::Operator { checked: false },
                );
            }
        }

        let stack = f.result_type(left);
        if stack.is_integer() || stack == StackType::F {
            let fits = binary_numeric_promotion(OperatorClass::Comparison, &l.ty, &r.ty)
                .is_some_and(|k| sign == Sign::None || !k.is_integer() || k.sign() == sign);
            if !fits {
                let operand_sign = if equality { Sign::None } else { sign };
                if let Some(target) = PrimitiveKind::from_stack_type(stack, operand_sign) {
                    let target = Type::Primitive(target);
                    l = l.convert_to(&target, self.ts);
                    r = r.convert_to(&target, self.ts);
                }
            }
        }

        ConvertedExpression::new(
            Expression::binary(kind.into(), l.expression, r.expression).with_instruction(inst),
            Type::BOOLEAN,
            Provenance::Operator { checked: false },
        )
    }

    fn conversion(
        &self,
        inst: InstrId,
        argument: InstrId,
        target: PrimitiveKind,
        check_overflow: bool,
        sign: Sign,
    ) -> ConvertedExpression {
        let mut operand = self.convert(argument);
        // Reinterpret the input first when the instruction reads it with the other sign.
        if sign != Sign::None && operand.ty.sign() != sign {
            if let Some(kind) = operand.ty.primitive().filter(|k| k.is_integer()) {
                operand = operand.convert_to(&Type::Primitive(kind.with_sign(sign)), self.ts);
            }
        }
        let target = Type::Primitive(target);
        if operand.ty == target && !check_overflow {
            return operand.with_instruction(inst);
        }
        let mut expression = Expression::new(ExpressionKind::Cast {
            ty: target.clone(),
            expression: Box::new(operand.expression),
        });
        if check_overflow {
            expression = Expression::new(ExpressionKind::Checked(Box::new(expression)));
        }
        ConvertedExpression::new(
            expression,
            target,
            Provenance::Conversion(ConversionKind::Explicit),
        )
        .with_instruction(inst)
    }

    /// The receiver of an instance call.
    ///
    /// A non-virtual call on `this` keeps its static dispatch as `base.M()`.
    fn receiver(&self, kind: CallKind, argument: InstrId) -> Expression {
        let f = self.f;
        let on_this = match_ldloc(f, argument)
            .is_some_and(|variable| f.variable(variable).kind == VariableKind::This);
        if kind == CallKind::Call && on_this {
            return Expression::new(ExpressionKind::Base).with_instruction(argument);
        }
        let converted = self.convert(argument);
        match converted.expression.kind {
            ExpressionKind::Direction(inner) => *inner,
            kind => Expression {
                kind,
                instructions: converted.expression.instructions,
            },
        }
    }

    fn call(
        &self,
        inst: InstrId,
        kind: CallKind,
        method: &MethodReference,
        arguments: &[InstrId],
    ) -> ConvertedExpression {
        let resolved = self.ts.resolve_method(method);
        let instance = method.signature.has_this && kind != CallKind::NewObj;
        let (target, rest) = match (instance, arguments.split_first()) {
            (true, Some((&first, rest))) => (self.receiver(kind, first), rest),
            _ => (
                Expression::new(ExpressionKind::TypeReference(method.declaring_type.clone())),
                arguments,
            ),
        };

        let parameter_types: Vec<Type> = match &resolved {
            Some(m) => m.parameters.iter().map(|p| p.ty.clone()).collect(),
            None => method.signature.parameters.clone(),
        };
        let mut converted: Vec<ConvertedExpression> = rest
            .iter()
            .enumerate()
            .map(|(i, &argument)| {
                let ty = parameter_types.get(i).cloned().unwrap_or(Type::Unknown);
                self.convert(argument).convert_to(&ty, self.ts)
            })
            .collect();

        if kind == CallKind::NewObj {
            return ConvertedExpression::new(
                Expression::new(ExpressionKind::ObjectCreate {
                    ty: method.declaring_type.clone(),
                    arguments: converted.into_iter().map(|c| c.expression).collect(),
                })
                .with_instruction(inst),
                method.declaring_type.clone(),
                Provenance::Invocation {
                    resolved: resolved.is_some(),
                },
            );
        }

        if let Some((accessor, property)) = self.ts.accessor_property(method) {
            if property.getter == Some(accessor.token) && converted.is_empty() {
                return ConvertedExpression::new(
                    Expression::member(target, property.name.clone()).with_instruction(inst),
                    property.ty.clone(),
                    Provenance::PropertyAccess,
                );
            }
            if property.setter == Some(accessor.token) && converted.len() == 1 {
                let value = converted.remove(0).convert_to(&property.ty, self.ts);
                let member = Expression::member(target, property.name.clone());
                return ConvertedExpression::new(
                    Expression::assignment(None, member, value.expression).with_instruction(inst),
                    property.ty.clone(),
                    Provenance::PropertyAccess,
                );
            }
        }

        let return_type = resolved
            .as_ref()
            .map_or_else(|| method.signature.return_type.clone(), |m| m.return_type.clone());
        ConvertedExpression::new(
            Expression::new(ExpressionKind::Invocation {
                target: Box::new(Expression::member(target, method.name.clone())),
                arguments: converted.into_iter().map(|c| c.expression).collect(),
            })
            .with_instruction(inst),
            return_type,
            Provenance::Invocation {
                resolved: resolved.is_some(),
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn compound_assignment(
        &self,
        inst: InstrId,
        op: BinaryNumericOperator,
        target: InstrId,
        value: InstrId,
        ty: &Type,
        check_overflow: bool,
        evaluates_to: CompoundEvaluation,
    ) -> ConvertedExpression {
        let location = self.convert(target);
        let by_one = matches!(op, BinaryNumericOperator::Add | BinaryNumericOperator::Sub)
            && match_ldc_i4(self.f, value) == Some(1);

        let mut expression = if by_one {
            Expression::new(ExpressionKind::Increment {
                increment: op == BinaryNumericOperator::Add,
                postfix: evaluates_to == CompoundEvaluation::OldValue,
                operand: Box::new(location.expression),
            })
        } else {
            let value = self.convert(value);
            let value = if op.is_shift() {
                value
            } else {
                value.convert_to(ty, self.ts)
            };
            Expression::assignment(
                Some(BinaryOperator::from(op)),
                location.expression,
                value.expression,
            )
        };
        if check_overflow {
            expression = Expression::new(ExpressionKind::Checked(Box::new(expression)));
        }
        ConvertedExpression::new(
            expression.with_instruction(inst),
            ty.clone(),
            Provenance::Operator {
                checked: check_overflow,
            },
        )
    }
}
