//! The instruction tree every transform operates on.
//!
//! # Architecture
//!
//! A method body is a [`Function`]: an arena of [`Instruction`] nodes plus a
//! table of [`Variable`]s. The tree is rooted at a block container (the body);
//! containers own [`InstructionKind::Block`]s, blocks own instruction lists,
//! and every instruction exclusively owns its operands.
//!
//! # Key Components
//!
//! - [`Function`] - Arena, variable table and the single mutation API
//! - [`InstructionKind`] - Closed set of instruction kinds
//! - [`InstructionFlags`] - Cached effects of a subtree
//! - [`Variable`] - Parameters, locals and stack slots with live use lists
//! - [`patterns`] - Match helpers returning captured operands
//! - [`reader`] - Raw IL stream to instruction tree

mod display;
mod flags;
mod function;
mod instruction;
pub mod patterns;
pub mod reader;
mod variable;

pub use flags::InstructionFlags;
pub use function::Function;
pub use instruction::{
    BinaryNumericOperator, BlockKind, CallKind, ComparisonKind, CompoundEvaluation,
    ContainerKind, ILRange, InstrId, Instruction, InstructionKind,
};
pub use reader::{read_function, ExceptionRegion, OpCode, RawInstruction, RawMethodBody};
pub use variable::{VarId, Variable, VariableKind};
