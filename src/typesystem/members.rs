//! Methods, fields and properties.
//!
//! Instructions carry [`MethodReference`]s: the low-level handle read from the
//! instruction stream, holding the raw signature. Resolving one through the
//! [`crate::typesystem::TypeSystem`] yields a [`Method`] with parameter names
//! and the property it belongs to, if it is an accessor. Unresolvable
//! references are still usable: the expression builder falls back to the raw
//! signature.

use std::sync::Arc;

use crate::typesystem::{Token, Type};

/// The raw signature of a method reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// Instance method taking `this` as implicit first argument.
    pub has_this: bool,
    /// Declared parameter types, excluding `this`.
    pub parameters: Vec<Type>,
    /// Declared return type.
    pub return_type: Type,
}

/// A method as referenced by a call instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodReference {
    /// Identity of the referenced method.
    pub token: Token,
    /// Simple name, e.g. `get_Count` or `.ctor`.
    pub name: String,
    /// The type declaring the method.
    pub declaring_type: Type,
    /// The raw signature.
    pub signature: MethodSignature,
}

impl MethodReference {
    /// Creates a reference to a method.
    #[must_use]
    pub fn new(
        token: Token,
        declaring_type: Type,
        name: &str,
        has_this: bool,
        parameters: Vec<Type>,
        return_type: Type,
    ) -> Self {
        MethodReference {
            token,
            name: name.to_string(),
            declaring_type,
            signature: MethodSignature {
                has_this,
                parameters,
                return_type,
            },
        }
    }

    /// `Namespace.Type.Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.declaring_type.full_name(), self.name)
    }

    /// Returns `true` for instance constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor"
    }

    /// Number of arguments a call passes, including `this`.
    #[must_use]
    pub fn argument_count(&self) -> usize {
        self.signature.parameters.len() + usize::from(self.signature.has_this)
    }
}

/// A named, typed method parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    /// Declared name.
    pub name: String,
    /// Declared type.
    pub ty: Type,
}

/// A resolved method definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    /// Identity.
    pub token: Token,
    /// Simple name.
    pub name: String,
    /// Declaring type.
    pub declaring_type: Type,
    /// Parameters, excluding `this`.
    pub parameters: Vec<Parameter>,
    /// Return type.
    pub return_type: Type,
    /// `static` method.
    pub is_static: bool,
    /// Property this method is the getter or setter of.
    pub accessor_owner: Option<Token>,
}

/// A resolved property definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Identity.
    pub token: Token,
    /// Simple name.
    pub name: String,
    /// Declaring type.
    pub declaring_type: Type,
    /// Property type.
    pub ty: Type,
    /// Token of the getter method.
    pub getter: Option<Token>,
    /// Token of the setter method.
    pub setter: Option<Token>,
}

/// A field, as referenced by address instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    /// Identity.
    pub token: Token,
    /// Simple name.
    pub name: String,
    /// Declaring type.
    pub declaring_type: Type,
    /// Field type.
    pub ty: Type,
    /// `static` field.
    pub is_static: bool,
}

/// Any entity the type system can hand out by token.
#[derive(Debug, Clone)]
pub enum Entity {
    /// A method definition.
    Method(Arc<Method>),
    /// A property definition.
    Property(Arc<Property>),
    /// A field definition.
    Field(Arc<Field>),
}

impl Entity {
    /// Token of the wrapped entity.
    #[must_use]
    pub fn token(&self) -> Token {
        match self {
            Entity::Method(m) => m.token,
            Entity::Property(p) => p.token,
            Entity::Field(f) => f.token,
        }
    }
}
