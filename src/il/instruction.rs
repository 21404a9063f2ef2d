//! Instruction kinds and the arena node that stores them.
//!
//! Every instruction is a variant of [`InstructionKind`]. Child instructions are
//! referenced by [`InstrId`] and exclusively owned by their parent; variables are
//! referenced by [`VarId`] and owned by the function's variable table.
//!
//! # Child Order
//!
//! [`InstructionKind::children`] yields children in evaluation order. Transforms
//! that care about ordering (inlining, definite assignment) rely on this.

use std::{fmt, sync::Arc};

use strum::IntoStaticStr;

use crate::{
    il::{InstructionFlags, VarId},
    typesystem::{Field, MethodReference, PrimitiveKind, Sign, Type},
    utils::LongSet,
};

/// Index of an instruction inside its [`crate::il::Function`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrId(pub(crate) u32);

impl InstrId {
    /// Dense arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Half-open range `start..end` of IL byte offsets an instruction was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ILRange {
    /// First byte offset.
    pub start: u32,
    /// One past the last byte offset.
    pub end: u32,
}

impl ILRange {
    /// Creates the range `start..end`.
    #[must_use]
    pub fn new(start: u32, end: u32) -> Self {
        ILRange { start, end }
    }

    /// Returns `true` for synthesized instructions without an IL origin.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Smallest range covering both; empty ranges are ignored.
    #[must_use]
    pub fn union(self, other: ILRange) -> ILRange {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => other,
            (_, true) => self,
            _ => ILRange::new(self.start.min(other.start), self.end.max(other.end)),
        }
    }
}

/// Arithmetic and bitwise operators of [`InstructionKind::BinaryNumeric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryNumericOperator {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    ShiftLeft,
    /// `>>`
    ShiftRight,
}

impl BinaryNumericOperator {
    /// Returns `true` for `<<` and `>>`.
    #[must_use]
    pub fn is_shift(self) -> bool {
        matches!(self, Self::ShiftLeft | Self::ShiftRight)
    }

    /// Returns `true` for `&`, `|` and `^`.
    #[must_use]
    pub fn is_bitwise(self) -> bool {
        matches!(self, Self::BitAnd | Self::BitOr | Self::BitXor)
    }
}

/// Comparison operators of [`InstructionKind::Comp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum ComparisonKind {
    /// `==`
    #[strum(serialize = "eq")]
    Equality,
    /// `!=`
    #[strum(serialize = "ne")]
    Inequality,
    /// `<`
    #[strum(serialize = "lt")]
    LessThan,
    /// `<=`
    #[strum(serialize = "le")]
    LessThanOrEqual,
    /// `>`
    #[strum(serialize = "gt")]
    GreaterThan,
    /// `>=`
    #[strum(serialize = "ge")]
    GreaterThanOrEqual,
}

impl ComparisonKind {
    /// The comparison with swapped operands (`a < b` is `b > a`).
    #[must_use]
    pub fn swap(self) -> Self {
        match self {
            Self::LessThan => Self::GreaterThan,
            Self::LessThanOrEqual => Self::GreaterThanOrEqual,
            Self::GreaterThan => Self::LessThan,
            Self::GreaterThanOrEqual => Self::LessThanOrEqual,
            other => other,
        }
    }

    /// The logical negation (`!(a < b)` is `a >= b` on integers).
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::Equality => Self::Inequality,
            Self::Inequality => Self::Equality,
            Self::LessThan => Self::GreaterThanOrEqual,
            Self::LessThanOrEqual => Self::GreaterThan,
            Self::GreaterThan => Self::LessThanOrEqual,
            Self::GreaterThanOrEqual => Self::LessThan,
        }
    }
}

/// Dispatch flavor of [`InstructionKind::Call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CallKind {
    /// Non-virtual call.
    Call,
    /// Virtual call.
    CallVirt,
    /// Object construction.
    NewObj,
}

/// Role of a [`InstructionKind::Block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Basic block inside a container, or the body of an `if`.
    ControlFlow,
    /// `{ call setter(..., stloc v(value)); final: ldloc v }`, an inline property assignment.
    CallInlineAssign,
}

/// Role of a [`InstructionKind::BlockContainer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// Function body, try body or finally handler.
    Normal,
    /// Loop body; branching to the entry block continues the loop.
    Loop,
}

/// Which value a [`InstructionKind::CompoundAssignment`] evaluates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompoundEvaluation {
    /// Value before the update (`x++`).
    OldValue,
    /// Value after the update (`++x`, `x += v`).
    NewValue,
}

/// The closed set of instruction kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// Does nothing; placeholder for removed children.
    Nop,
    /// 32-bit integer constant.
    LdcI4(i32),
    /// 64-bit integer constant.
    LdcI8(i64),
    /// Floating point constant.
    LdcF(f64),
    /// String literal.
    LdStr(String),
    /// Null reference.
    LdNull,
    /// Reads a variable.
    LdLoc(VarId),
    /// Takes the address of a variable.
    LdLoca(VarId),
    /// Writes a variable; evaluates to the stored value.
    StLoc {
        /// Destination.
        variable: VarId,
        /// Stored value.
        value: InstrId,
    },
    /// Reads through an address.
    LdObj {
        /// Address.
        target: InstrId,
        /// Type of the loaded value.
        ty: Type,
    },
    /// Writes through an address; evaluates to the stored value.
    StObj {
        /// Address.
        target: InstrId,
        /// Stored value.
        value: InstrId,
        /// Type of the stored value.
        ty: Type,
    },
    /// Address of an instance field.
    LdFlda {
        /// Object or address of the value type instance.
        target: InstrId,
        /// The field.
        field: Arc<Field>,
    },
    /// Address of a static field.
    LdsFlda {
        /// The field.
        field: Arc<Field>,
    },
    /// Address of an array element.
    LdElema {
        /// Array reference.
        array: InstrId,
        /// Element index.
        index: InstrId,
        /// Element type.
        ty: Type,
    },
    /// Arithmetic or bitwise operation.
    BinaryNumeric {
        /// Operator.
        op: BinaryNumericOperator,
        /// Left operand.
        left: InstrId,
        /// Right operand.
        right: InstrId,
        /// Throws on overflow.
        check_overflow: bool,
        /// Signedness of the operation where it matters.
        sign: Sign,
    },
    /// Comparison producing 0 or 1.
    Comp {
        /// Operator.
        kind: ComparisonKind,
        /// Signedness for ordered comparisons.
        sign: Sign,
        /// Left operand.
        left: InstrId,
        /// Right operand.
        right: InstrId,
    },
    /// Boolean negation.
    LogicNot(InstrId),
    /// Numeric conversion.
    Conv {
        /// Converted value.
        argument: InstrId,
        /// Target type.
        target: PrimitiveKind,
        /// Throws if the value does not fit.
        check_overflow: bool,
        /// How to interpret the input.
        sign: Sign,
    },
    /// Method call or object construction.
    Call {
        /// Dispatch flavor.
        kind: CallKind,
        /// Callee.
        method: Arc<MethodReference>,
        /// Arguments, including `this` for instance calls.
        arguments: Vec<InstrId>,
    },
    /// Type test returning the object or null.
    IsInst {
        /// Tested object.
        argument: InstrId,
        /// Tested type.
        ty: Type,
    },
    /// Unboxes or casts to the given type.
    UnboxAny {
        /// Boxed value.
        argument: InstrId,
        /// Target type.
        ty: Type,
    },
    /// Read-modify-write of `target` with `op value`.
    CompoundAssignment {
        /// Operator.
        op: BinaryNumericOperator,
        /// The location: `ldloc`, `ldobj(address)` or a getter call.
        target: InstrId,
        /// Right operand.
        value: InstrId,
        /// Type of the location.
        ty: Type,
        /// Throws on overflow.
        check_overflow: bool,
        /// Signedness of the operation.
        sign: Sign,
        /// Result of the expression.
        evaluates_to: CompoundEvaluation,
    },
    /// Conditional execution.
    IfInstruction {
        /// Condition.
        condition: InstrId,
        /// Executed if the condition is true.
        true_inst: InstrId,
        /// Executed otherwise; `Nop` if there is no else branch.
        false_inst: InstrId,
    },
    /// Jump to a block of the enclosing container.
    Branch {
        /// Target block.
        target: InstrId,
    },
    /// Exit a container, optionally with a value (function return).
    Leave {
        /// The container being left.
        target: InstrId,
        /// Return value, `Nop` for none.
        value: InstrId,
    },
    /// Raise an exception.
    Throw(InstrId),
    /// Ordered instruction list with an optional result.
    Block {
        /// Instructions in execution order.
        instructions: Vec<InstrId>,
        /// Result of the block when used as an expression.
        final_instruction: Option<InstrId>,
        /// Role.
        kind: BlockKind,
        /// Label, unique in the function; the IL offset for blocks read from IL.
        label: u32,
        /// Number of attached branches targeting this block.
        incoming_edges: u32,
    },
    /// Control-flow region; the first block is the entry point.
    BlockContainer {
        /// Blocks; `blocks[0]` is the entry.
        blocks: Vec<InstrId>,
        /// Role.
        kind: ContainerKind,
    },
    /// `try { .. } finally { .. }`
    TryFinally {
        /// Protected region container.
        try_block: InstrId,
        /// Handler container.
        finally_block: InstrId,
    },
    /// `using (variable = resource) body`
    Using {
        /// The resource variable.
        variable: VarId,
        /// Initializer.
        resource: InstrId,
        /// Body container.
        body: InstrId,
    },
    /// Multi-way branch on an integer.
    Switch {
        /// Switched value.
        value: InstrId,
        /// Sections; their label sets are disjoint.
        sections: Vec<InstrId>,
    },
    /// One arm of a [`InstructionKind::Switch`].
    SwitchSection {
        /// Values selecting this arm.
        labels: LongSet,
        /// Executed instruction, usually a branch.
        body: InstrId,
    },
}

impl InstructionKind {
    /// Short opcode name used in dumps and diagnostics.
    #[must_use]
    pub fn opcode_name(&self) -> &'static str {
        match self {
            InstructionKind::Nop => "nop",
            InstructionKind::LdcI4(_) => "ldc.i4",
            InstructionKind::LdcI8(_) => "ldc.i8",
            InstructionKind::LdcF(_) => "ldc.f",
            InstructionKind::LdStr(_) => "ldstr",
            InstructionKind::LdNull => "ldnull",
            InstructionKind::LdLoc(_) => "ldloc",
            InstructionKind::LdLoca(_) => "ldloca",
            InstructionKind::StLoc { .. } => "stloc",
            InstructionKind::LdObj { .. } => "ldobj",
            InstructionKind::StObj { .. } => "stobj",
            InstructionKind::LdFlda { .. } => "ldflda",
            InstructionKind::LdsFlda { .. } => "ldsflda",
            InstructionKind::LdElema { .. } => "ldelema",
            InstructionKind::BinaryNumeric { .. } => "binary",
            InstructionKind::Comp { .. } => "comp",
            InstructionKind::LogicNot(_) => "logic.not",
            InstructionKind::Conv { .. } => "conv",
            InstructionKind::Call { kind, .. } => kind.into(),
            InstructionKind::IsInst { .. } => "isinst",
            InstructionKind::UnboxAny { .. } => "unbox.any",
            InstructionKind::CompoundAssignment { .. } => "compound",
            InstructionKind::IfInstruction { .. } => "if",
            InstructionKind::Branch { .. } => "br",
            InstructionKind::Leave { .. } => "leave",
            InstructionKind::Throw(_) => "throw",
            InstructionKind::Block { .. } => "Block",
            InstructionKind::BlockContainer { .. } => "BlockContainer",
            InstructionKind::TryFinally { .. } => "try.finally",
            InstructionKind::Using { .. } => "using",
            InstructionKind::Switch { .. } => "switch",
            InstructionKind::SwitchSection { .. } => "case",
        }
    }

    /// Child instructions in evaluation order.
    #[must_use]
    pub fn children(&self) -> Vec<InstrId> {
        match self {
            InstructionKind::Nop
            | InstructionKind::LdcI4(_)
            | InstructionKind::LdcI8(_)
            | InstructionKind::LdcF(_)
            | InstructionKind::LdStr(_)
            | InstructionKind::LdNull
            | InstructionKind::LdLoc(_)
            | InstructionKind::LdLoca(_)
            | InstructionKind::LdsFlda { .. }
            | InstructionKind::Branch { .. } => Vec::new(),
            InstructionKind::StLoc { value, .. } => vec![*value],
            InstructionKind::LdObj { target, .. } | InstructionKind::LdFlda { target, .. } => {
                vec![*target]
            }
            InstructionKind::StObj { target, value, .. }
            | InstructionKind::CompoundAssignment { target, value, .. } => vec![*target, *value],
            InstructionKind::LdElema { array, index, .. } => vec![*array, *index],
            InstructionKind::BinaryNumeric { left, right, .. }
            | InstructionKind::Comp { left, right, .. } => vec![*left, *right],
            InstructionKind::LogicNot(argument)
            | InstructionKind::Throw(argument)
            | InstructionKind::Conv { argument, .. }
            | InstructionKind::IsInst { argument, .. }
            | InstructionKind::UnboxAny { argument, .. } => vec![*argument],
            InstructionKind::Call { arguments, .. } => arguments.clone(),
            InstructionKind::IfInstruction {
                condition,
                true_inst,
                false_inst,
            } => vec![*condition, *true_inst, *false_inst],
            InstructionKind::Leave { value, .. } => vec![*value],
            InstructionKind::Block {
                instructions,
                final_instruction,
                ..
            } => instructions
                .iter()
                .copied()
                .chain(*final_instruction)
                .collect(),
            InstructionKind::BlockContainer { blocks, .. } => blocks.clone(),
            InstructionKind::TryFinally {
                try_block,
                finally_block,
            } => vec![*try_block, *finally_block],
            InstructionKind::Using { resource, body, .. } => vec![*resource, *body],
            InstructionKind::Switch { value, sections } => {
                std::iter::once(*value).chain(sections.iter().copied()).collect()
            }
            InstructionKind::SwitchSection { body, .. } => vec![*body],
        }
    }

    /// Mutable access to the child slots, in the same order as [`InstructionKind::children`].
    pub(crate) fn children_mut(&mut self) -> Vec<&mut InstrId> {
        match self {
            InstructionKind::Nop
            | InstructionKind::LdcI4(_)
            | InstructionKind::LdcI8(_)
            | InstructionKind::LdcF(_)
            | InstructionKind::LdStr(_)
            | InstructionKind::LdNull
            | InstructionKind::LdLoc(_)
            | InstructionKind::LdLoca(_)
            | InstructionKind::LdsFlda { .. }
            | InstructionKind::Branch { .. } => Vec::new(),
            InstructionKind::StLoc { value, .. } => vec![value],
            InstructionKind::LdObj { target, .. } | InstructionKind::LdFlda { target, .. } => {
                vec![target]
            }
            InstructionKind::StObj { target, value, .. }
            | InstructionKind::CompoundAssignment { target, value, .. } => vec![target, value],
            InstructionKind::LdElema { array, index, .. } => vec![array, index],
            InstructionKind::BinaryNumeric { left, right, .. }
            | InstructionKind::Comp { left, right, .. } => vec![left, right],
            InstructionKind::LogicNot(argument)
            | InstructionKind::Throw(argument)
            | InstructionKind::Conv { argument, .. }
            | InstructionKind::IsInst { argument, .. }
            | InstructionKind::UnboxAny { argument, .. } => vec![argument],
            InstructionKind::Call { arguments, .. } => arguments.iter_mut().collect(),
            InstructionKind::IfInstruction {
                condition,
                true_inst,
                false_inst,
            } => vec![condition, true_inst, false_inst],
            InstructionKind::Leave { value, .. } => vec![value],
            InstructionKind::Block {
                instructions,
                final_instruction,
                ..
            } => instructions
                .iter_mut()
                .chain(final_instruction.as_mut())
                .collect(),
            InstructionKind::BlockContainer { blocks, .. } => blocks.iter_mut().collect(),
            InstructionKind::TryFinally {
                try_block,
                finally_block,
            } => vec![try_block, finally_block],
            InstructionKind::Using { resource, body, .. } => vec![resource, body],
            InstructionKind::Switch { value, sections } => {
                std::iter::once(value).chain(sections.iter_mut()).collect()
            }
            InstructionKind::SwitchSection { body, .. } => vec![body],
        }
    }

    /// Flags contributed by the instruction itself, excluding its children.
    #[must_use]
    pub fn direct_flags(&self) -> InstructionFlags {
        match self {
            InstructionKind::LdLoc(_) | InstructionKind::LdLoca(_) => {
                InstructionFlags::MAY_READ_LOCALS
            }
            InstructionKind::StLoc { .. } => InstructionFlags::MAY_WRITE_LOCALS,
            InstructionKind::LdObj { .. }
            | InstructionKind::StObj { .. }
            | InstructionKind::Call { .. }
            | InstructionKind::UnboxAny { .. }
            | InstructionKind::CompoundAssignment { .. } => {
                InstructionFlags::SIDE_EFFECT | InstructionFlags::MAY_THROW
            }
            InstructionKind::LdElema { .. } => InstructionFlags::MAY_THROW,
            InstructionKind::BinaryNumeric {
                op, check_overflow, ..
            } => {
                if *check_overflow
                    || matches!(op, BinaryNumericOperator::Div | BinaryNumericOperator::Rem)
                {
                    InstructionFlags::MAY_THROW
                } else {
                    InstructionFlags::empty()
                }
            }
            InstructionKind::Conv { check_overflow, .. } if *check_overflow => {
                InstructionFlags::MAY_THROW
            }
            InstructionKind::Branch { .. } | InstructionKind::Leave { .. } => {
                InstructionFlags::MAY_BRANCH | InstructionFlags::END_POINT_UNREACHABLE
            }
            InstructionKind::Throw(_) => {
                InstructionFlags::MAY_THROW | InstructionFlags::END_POINT_UNREACHABLE
            }
            InstructionKind::Using { .. } => {
                InstructionFlags::MAY_WRITE_LOCALS | InstructionFlags::SIDE_EFFECT
            }
            _ => InstructionFlags::empty(),
        }
    }
}

/// Arena node: an instruction plus its tree bookkeeping.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub(crate) kind: InstructionKind,
    pub(crate) parent: Option<InstrId>,
    pub(crate) range: ILRange,
    pub(crate) flags: InstructionFlags,
    pub(crate) connected: bool,
}

impl Instruction {
    pub(crate) fn new(kind: InstructionKind, range: ILRange) -> Self {
        Instruction {
            kind,
            parent: None,
            range,
            flags: InstructionFlags::empty(),
            connected: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_and_slots_agree() {
        let mut kind = InstructionKind::IfInstruction {
            condition: InstrId(1),
            true_inst: InstrId(2),
            false_inst: InstrId(3),
        };
        let children = kind.children();
        let slots: Vec<InstrId> = kind.children_mut().into_iter().map(|s| *s).collect();
        assert_eq!(children, slots);
        assert_eq!(children, vec![InstrId(1), InstrId(2), InstrId(3)]);
    }

    #[test]
    fn test_block_children_include_final() {
        let kind = InstructionKind::Block {
            instructions: vec![InstrId(4), InstrId(5)],
            final_instruction: Some(InstrId(6)),
            kind: BlockKind::CallInlineAssign,
            label: 0,
            incoming_edges: 0,
        };
        assert_eq!(kind.children(), vec![InstrId(4), InstrId(5), InstrId(6)]);
    }

    #[test]
    fn test_comparison_negate_and_swap() {
        assert_eq!(ComparisonKind::LessThan.negate(), ComparisonKind::GreaterThanOrEqual);
        assert_eq!(ComparisonKind::LessThan.swap(), ComparisonKind::GreaterThan);
        assert_eq!(ComparisonKind::Equality.swap(), ComparisonKind::Equality);
    }

    #[test]
    fn test_division_may_throw() {
        let div = InstructionKind::BinaryNumeric {
            op: BinaryNumericOperator::Div,
            left: InstrId(0),
            right: InstrId(1),
            check_overflow: false,
            sign: Sign::Signed,
        };
        assert!(div.direct_flags().contains(InstructionFlags::MAY_THROW));
        assert!(InstructionKind::LdcI4(1).direct_flags().is_pure());
    }
}
