//! Types, members and the resolution interface.
//!
//! The decompiler core never reads metadata itself. Everything it needs to know
//! about types and members arrives through values in this module:
//!
//! - [`Type`] / [`PrimitiveKind`] / [`StackType`] - Type representation
//! - [`MethodReference`], [`Field`] - Operands of call and address instructions
//! - [`Method`], [`Property`] - Resolved definitions
//! - [`TypeSystem`] - Resolution and hierarchy queries, implemented by the host
//! - [`binder`] - C# promotion and implicit conversion rules
//!
//! [`SimpleTypeSystem`] is an in-memory implementation over an [`EntityTable`].

pub mod binder;
mod entities;
mod members;
mod resolver;
mod token;
mod types;

pub use entities::EntityTable;
pub use members::{Entity, Field, Method, MethodReference, MethodSignature, Parameter, Property};
pub use resolver::{SimpleTypeSystem, TypeSystem, DISPOSE_METHOD_NAME};
pub use token::Token;
pub use types::{
    PrimitiveKind, Sign, StackType, Type, TypeDefinition, TypeKind, DISPOSABLE_NAME,
    DISPOSABLE_NAMESPACE, NATIVE_INT_SIZE,
};
