//! # dotlift Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the dotlift library. Import this module to get quick access to the essential
//! types for decompiling method bodies.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotlift operations
pub use crate::Error;

/// The result type used throughout dotlift
pub use crate::Result;

pub use std::sync::Arc;

// ================================================================================================
// Main Entry Points
// ================================================================================================

pub use crate::{CancellationToken, DecompiledFunction, Decompiler};

pub use crate::compiler::{DecompilerSettings, EventKind, EventLog};

// ================================================================================================
// Input
// ================================================================================================

pub use crate::il::{
    read_function, ExceptionRegion, Function, InstrId, InstructionKind, OpCode, RawInstruction,
    RawMethodBody,
};

pub use crate::typesystem::{
    Field, MethodReference, PrimitiveKind, SimpleTypeSystem, Token, Type, TypeDefinition,
    TypeKind, TypeSystem,
};

// ================================================================================================
// Output
// ================================================================================================

pub use crate::ast::{
    BlockStatement, Expression, SequencePoint, SequencePoints, Statement, StatementKind,
};
