//! Type representations used by the instruction tree and the expression builder.
//!
//! # Key Components
//!
//! - [`PrimitiveKind`] - The built-in CLI element types
//! - [`Sign`] - Signedness annotation of integer operations and types
//! - [`StackType`] - The evaluation-stack view of a type (everything narrower than 32 bits is `I4`)
//! - [`Type`] - A full type: primitive, user definition, by-reference or pointer
//!
//! Types compare by identity of their definition token; two [`TypeDefinition`]s
//! with the same token are the same type.

use std::{fmt, sync::Arc};

use strum::{EnumCount, EnumIter, IntoStaticStr};

use crate::typesystem::Token;

/// Namespace of `System.IDisposable`.
pub const DISPOSABLE_NAMESPACE: &str = "System";
/// Name of `System.IDisposable`.
pub const DISPOSABLE_NAME: &str = "IDisposable";

/// Size assumed for native integers and pointers.
pub const NATIVE_INT_SIZE: usize = 8;

/// Signedness of an integer type or of an operation on integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Sign {
    /// Not applicable (floats, references) or irrelevant (`add` without overflow check).
    #[default]
    None,
    /// Two's-complement signed.
    Signed,
    /// Unsigned.
    Unsigned,
}

/// Type of a value on the CIL evaluation stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum StackType {
    /// No type information.
    Unknown,
    /// No value.
    Void,
    /// 32-bit integer, also used for `bool`, `char` and all narrower integers.
    I4,
    /// 64-bit integer.
    I8,
    /// Native integer or unmanaged pointer.
    I,
    /// Floating point.
    F,
    /// Object reference or value type instance.
    O,
    /// Managed reference (`ref T`).
    Ref,
}

impl StackType {
    /// Returns `true` for `I4`, `I8` and `I`.
    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(self, StackType::I4 | StackType::I8 | StackType::I)
    }
}

impl fmt::Display for StackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &'static str = self.into();
        f.write_str(&name.to_ascii_lowercase())
    }
}

/// The built-in element types of the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
pub enum PrimitiveKind {
    /// System.Boolean
    Boolean,
    /// System.Char - Unicode 16-bit character
    Char,
    /// System.SByte
    I1,
    /// System.Byte
    U1,
    /// System.Int16
    I2,
    /// System.UInt16
    U2,
    /// System.Int32
    I4,
    /// System.UInt32
    U4,
    /// System.Int64
    I8,
    /// System.UInt64
    U8,
    /// System.Single
    R4,
    /// System.Double
    R8,
    /// System.IntPtr
    I,
    /// System.UIntPtr
    U,
    /// System.Object
    Object,
    /// System.String
    String,
}

impl PrimitiveKind {
    /// Size in bytes; references count as a native int.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            PrimitiveKind::Boolean | PrimitiveKind::I1 | PrimitiveKind::U1 => 1,
            PrimitiveKind::Char | PrimitiveKind::I2 | PrimitiveKind::U2 => 2,
            PrimitiveKind::I4 | PrimitiveKind::U4 | PrimitiveKind::R4 => 4,
            PrimitiveKind::I8 | PrimitiveKind::U8 | PrimitiveKind::R8 => 8,
            PrimitiveKind::I | PrimitiveKind::U | PrimitiveKind::Object | PrimitiveKind::String => {
                NATIVE_INT_SIZE
            }
        }
    }

    /// Signedness; floats count as signed, `bool` and references as none.
    #[must_use]
    pub fn sign(self) -> Sign {
        match self {
            PrimitiveKind::I1
            | PrimitiveKind::I2
            | PrimitiveKind::I4
            | PrimitiveKind::I8
            | PrimitiveKind::I
            | PrimitiveKind::R4
            | PrimitiveKind::R8 => Sign::Signed,
            PrimitiveKind::Char
            | PrimitiveKind::U1
            | PrimitiveKind::U2
            | PrimitiveKind::U4
            | PrimitiveKind::U8
            | PrimitiveKind::U => Sign::Unsigned,
            PrimitiveKind::Boolean | PrimitiveKind::Object | PrimitiveKind::String => Sign::None,
        }
    }

    /// The evaluation-stack type values of this kind are widened to.
    #[must_use]
    pub fn stack_type(self) -> StackType {
        match self {
            PrimitiveKind::Boolean
            | PrimitiveKind::Char
            | PrimitiveKind::I1
            | PrimitiveKind::U1
            | PrimitiveKind::I2
            | PrimitiveKind::U2
            | PrimitiveKind::I4
            | PrimitiveKind::U4 => StackType::I4,
            PrimitiveKind::I8 | PrimitiveKind::U8 => StackType::I8,
            PrimitiveKind::I | PrimitiveKind::U => StackType::I,
            PrimitiveKind::R4 | PrimitiveKind::R8 => StackType::F,
            PrimitiveKind::Object | PrimitiveKind::String => StackType::O,
        }
    }

    /// Returns `true` for types narrower than 32 bits that C# promotes to `int`.
    #[must_use]
    pub fn is_small_integer(self) -> bool {
        matches!(
            self,
            PrimitiveKind::Boolean
                | PrimitiveKind::Char
                | PrimitiveKind::I1
                | PrimitiveKind::U1
                | PrimitiveKind::I2
                | PrimitiveKind::U2
        )
    }

    /// Returns `true` for integer kinds including `char` but excluding `bool`.
    #[must_use]
    pub fn is_integer(self) -> bool {
        self != PrimitiveKind::Boolean && self.stack_type().is_integer()
    }

    /// Returns `true` for `float` and `double`.
    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, PrimitiveKind::R4 | PrimitiveKind::R8)
    }

    /// Returns `true` for arithmetic types.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Inclusive value range of integer kinds up to 32 bits.
    #[must_use]
    pub fn value_range(self) -> Option<(i64, i64)> {
        Some(match self {
            PrimitiveKind::Boolean => (0, 1),
            PrimitiveKind::I1 => (i64::from(i8::MIN), i64::from(i8::MAX)),
            PrimitiveKind::U1 => (0, i64::from(u8::MAX)),
            PrimitiveKind::I2 => (i64::from(i16::MIN), i64::from(i16::MAX)),
            PrimitiveKind::U2 | PrimitiveKind::Char => (0, i64::from(u16::MAX)),
            PrimitiveKind::I4 => (i64::from(i32::MIN), i64::from(i32::MAX)),
            PrimitiveKind::U4 => (0, i64::from(u32::MAX)),
            _ => return None,
        })
    }

    /// The canonical kind for a stack type and sign (`I4` + unsigned is `uint`).
    #[must_use]
    pub fn from_stack_type(stack: StackType, sign: Sign) -> Option<PrimitiveKind> {
        let unsigned = sign == Sign::Unsigned;
        Some(match stack {
            StackType::I4 if unsigned => PrimitiveKind::U4,
            StackType::I4 => PrimitiveKind::I4,
            StackType::I8 if unsigned => PrimitiveKind::U8,
            StackType::I8 => PrimitiveKind::I8,
            StackType::I if unsigned => PrimitiveKind::U,
            StackType::I => PrimitiveKind::I,
            StackType::F => PrimitiveKind::R8,
            StackType::O => PrimitiveKind::Object,
            StackType::Unknown | StackType::Void | StackType::Ref => return None,
        })
    }

    /// The same-width kind with the given sign, for integers.
    #[must_use]
    pub fn with_sign(self, sign: Sign) -> PrimitiveKind {
        use PrimitiveKind::{I1, I2, I4, I8, U1, U2, U4, U8, I, U};
        match (self, sign) {
            (U1, Sign::Signed) => I1,
            (I1, Sign::Unsigned) => U1,
            (U2 | PrimitiveKind::Char, Sign::Signed) => I2,
            (I2, Sign::Unsigned) => U2,
            (U4, Sign::Signed) => I4,
            (I4, Sign::Unsigned) => U4,
            (U8, Sign::Signed) => I8,
            (I8, Sign::Unsigned) => U8,
            (U, Sign::Signed) => I,
            (I, Sign::Unsigned) => U,
            (kind, _) => kind,
        }
    }

    /// Fully qualified runtime name.
    #[must_use]
    pub fn full_name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "System.Boolean",
            PrimitiveKind::Char => "System.Char",
            PrimitiveKind::I1 => "System.SByte",
            PrimitiveKind::U1 => "System.Byte",
            PrimitiveKind::I2 => "System.Int16",
            PrimitiveKind::U2 => "System.UInt16",
            PrimitiveKind::I4 => "System.Int32",
            PrimitiveKind::U4 => "System.UInt32",
            PrimitiveKind::I8 => "System.Int64",
            PrimitiveKind::U8 => "System.UInt64",
            PrimitiveKind::R4 => "System.Single",
            PrimitiveKind::R8 => "System.Double",
            PrimitiveKind::I => "System.IntPtr",
            PrimitiveKind::U => "System.UIntPtr",
            PrimitiveKind::Object => "System.Object",
            PrimitiveKind::String => "System.String",
        }
    }

    /// C# keyword.
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "bool",
            PrimitiveKind::Char => "char",
            PrimitiveKind::I1 => "sbyte",
            PrimitiveKind::U1 => "byte",
            PrimitiveKind::I2 => "short",
            PrimitiveKind::U2 => "ushort",
            PrimitiveKind::I4 => "int",
            PrimitiveKind::U4 => "uint",
            PrimitiveKind::I8 => "long",
            PrimitiveKind::U8 => "ulong",
            PrimitiveKind::R4 => "float",
            PrimitiveKind::R8 => "double",
            PrimitiveKind::I => "nint",
            PrimitiveKind::U => "nuint",
            PrimitiveKind::Object => "object",
            PrimitiveKind::String => "string",
        }
    }
}

/// Flavor of a user-defined type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Reference type.
    Class,
    /// Interface.
    Interface,
    /// Value type.
    Struct,
    /// Enumeration over the given integer kind.
    Enum(PrimitiveKind),
    /// Delegate.
    Delegate,
}

/// A user-defined type.
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    /// Identity of the type.
    pub token: Token,
    /// Namespace, empty for the global namespace.
    pub namespace: String,
    /// Simple name.
    pub name: String,
    /// Flavor.
    pub kind: TypeKind,
    /// Direct base class and implemented interfaces.
    pub base_types: Vec<Type>,
}

impl TypeDefinition {
    /// `Namespace.Name`, or just `Name` in the global namespace.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

impl PartialEq for TypeDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for TypeDefinition {}

impl std::hash::Hash for TypeDefinition {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

/// A type as seen by the decompiler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Type {
    /// Nothing is known about the type.
    #[default]
    Unknown,
    /// `void`
    Void,
    /// A built-in element type.
    Primitive(PrimitiveKind),
    /// A user-defined class, struct, interface, enum or delegate.
    Definition(Arc<TypeDefinition>),
    /// Managed reference `ref T`.
    ByReference(Box<Type>),
    /// Unmanaged pointer `T*`.
    Pointer(Box<Type>),
}

impl Type {
    /// Shorthand for `Type::Primitive(PrimitiveKind::I4)`.
    pub const INT32: Type = Type::Primitive(PrimitiveKind::I4);
    /// Shorthand for `Type::Primitive(PrimitiveKind::Boolean)`.
    pub const BOOLEAN: Type = Type::Primitive(PrimitiveKind::Boolean);
    /// Shorthand for `Type::Primitive(PrimitiveKind::Object)`.
    pub const OBJECT: Type = Type::Primitive(PrimitiveKind::Object);

    /// Creates a new user-defined type.
    #[must_use]
    pub fn definition(
        token: Token,
        namespace: &str,
        name: &str,
        kind: TypeKind,
        base_types: Vec<Type>,
    ) -> Type {
        Type::Definition(Arc::new(TypeDefinition {
            token,
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind,
            base_types,
        }))
    }

    /// `ref self`
    #[must_use]
    pub fn by_reference(self) -> Type {
        Type::ByReference(Box::new(self))
    }

    /// `self*`
    #[must_use]
    pub fn pointer(self) -> Type {
        Type::Pointer(Box::new(self))
    }

    /// Returns `true` for [`Type::Unknown`].
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown)
    }

    /// The primitive kind, looking through enums to their underlying type.
    #[must_use]
    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match self {
            Type::Primitive(kind) => Some(*kind),
            Type::Definition(def) => match def.kind {
                TypeKind::Enum(underlying) => Some(underlying),
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns `true` if this is exactly the given primitive (enums excluded).
    #[must_use]
    pub fn is_primitive(&self, kind: PrimitiveKind) -> bool {
        matches!(self, Type::Primitive(k) if *k == kind)
    }

    /// Returns `true` for enum definitions.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        matches!(self, Type::Definition(def) if matches!(def.kind, TypeKind::Enum(_)))
    }

    /// The underlying integer type for enums, `self` otherwise.
    #[must_use]
    pub fn enum_underlying(&self) -> Type {
        match self {
            Type::Definition(def) => match def.kind {
                TypeKind::Enum(underlying) => Type::Primitive(underlying),
                _ => self.clone(),
            },
            _ => self.clone(),
        }
    }

    /// Evaluation-stack representation.
    #[must_use]
    pub fn stack_type(&self) -> StackType {
        match self {
            Type::Unknown => StackType::Unknown,
            Type::Void => StackType::Void,
            Type::Primitive(kind) => kind.stack_type(),
            Type::Definition(def) => match def.kind {
                TypeKind::Enum(underlying) => underlying.stack_type(),
                _ => StackType::O,
            },
            Type::ByReference(_) => StackType::Ref,
            Type::Pointer(_) => StackType::I,
        }
    }

    /// Signedness; pointers are unsigned.
    #[must_use]
    pub fn sign(&self) -> Sign {
        match self {
            Type::Pointer(_) => Sign::Unsigned,
            _ => self.primitive().map_or(Sign::None, PrimitiveKind::sign),
        }
    }

    /// Size in bytes, `0` if unknown.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Type::Pointer(_) => NATIVE_INT_SIZE,
            _ => self.primitive().map_or(0, PrimitiveKind::size),
        }
    }

    /// Returns `true` for C# small integer types, including enums over them.
    #[must_use]
    pub fn is_small_integer(&self) -> bool {
        self.primitive().is_some_and(PrimitiveKind::is_small_integer)
    }

    /// Reference-type-ness: `Some(true)` for classes, `Some(false)` for value types, `None` if unknown.
    #[must_use]
    pub fn is_reference_type(&self) -> Option<bool> {
        match self {
            Type::Unknown => None,
            Type::Void | Type::ByReference(_) | Type::Pointer(_) => Some(false),
            Type::Primitive(kind) => Some(matches!(
                kind,
                PrimitiveKind::Object | PrimitiveKind::String
            )),
            Type::Definition(def) => Some(matches!(
                def.kind,
                TypeKind::Class | TypeKind::Interface | TypeKind::Delegate
            )),
        }
    }

    /// The pointee of by-reference and pointer types.
    #[must_use]
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::ByReference(inner) | Type::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    /// The definition of user-defined types.
    #[must_use]
    pub fn as_definition(&self) -> Option<&Arc<TypeDefinition>> {
        match self {
            Type::Definition(def) => Some(def),
            _ => None,
        }
    }

    /// Returns `true` if this is `System.IDisposable`.
    #[must_use]
    pub fn is_disposable_interface(&self) -> bool {
        matches!(self, Type::Definition(def)
            if def.namespace == DISPOSABLE_NAMESPACE && def.name == DISPOSABLE_NAME)
    }

    /// Fully qualified runtime name.
    #[must_use]
    pub fn full_name(&self) -> String {
        match self {
            Type::Unknown => "?".to_string(),
            Type::Void => "System.Void".to_string(),
            Type::Primitive(kind) => kind.full_name().to_string(),
            Type::Definition(def) => def.full_name(),
            Type::ByReference(inner) => format!("{}&", inner.full_name()),
            Type::Pointer(inner) => format!("{}*", inner.full_name()),
        }
    }
}

impl From<PrimitiveKind> for Type {
    fn from(kind: PrimitiveKind) -> Self {
        Type::Primitive(kind)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Unknown => f.write_str("?"),
            Type::Void => f.write_str("void"),
            Type::Primitive(kind) => f.write_str(kind.keyword()),
            Type::Definition(def) => f.write_str(&def.name),
            Type::ByReference(inner) => write!(f, "ref {}", inner),
            Type::Pointer(inner) => write!(f, "{}*", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_small_integers_widen_to_i4() {
        for kind in PrimitiveKind::iter().filter(|k| k.is_small_integer()) {
            assert_eq!(kind.stack_type(), StackType::I4, "{:?}", kind);
            assert!(kind.size() < 4);
        }
        assert_eq!(PrimitiveKind::COUNT, 16);
    }

    #[test]
    fn test_with_sign_keeps_width() {
        for kind in PrimitiveKind::iter().filter(|k| k.is_integer()) {
            assert_eq!(kind.with_sign(Sign::Signed).size(), kind.size());
            assert_eq!(kind.with_sign(Sign::Unsigned).sign(), Sign::Unsigned);
        }
    }

    #[test]
    fn test_enum_looks_through_to_underlying() {
        let color = Type::definition(
            Token::from_parts(Token::TYPE_DEF, 1),
            "App",
            "Color",
            TypeKind::Enum(PrimitiveKind::U1),
            vec![],
        );
        assert_eq!(color.stack_type(), StackType::I4);
        assert_eq!(color.sign(), Sign::Unsigned);
        assert!(color.is_small_integer());
        assert_eq!(color.enum_underlying(), Type::Primitive(PrimitiveKind::U1));
        assert_eq!(color.is_reference_type(), Some(false));
    }

    #[test]
    fn test_definitions_compare_by_token() {
        let token = Token::from_parts(Token::TYPE_DEF, 7);
        let a = Type::definition(token, "A", "X", TypeKind::Class, vec![]);
        let b = Type::definition(token, "B", "Y", TypeKind::Class, vec![]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonical_stack_kinds() {
        assert_eq!(
            PrimitiveKind::from_stack_type(StackType::I4, Sign::Unsigned),
            Some(PrimitiveKind::U4)
        );
        assert_eq!(
            PrimitiveKind::from_stack_type(StackType::I8, Sign::None),
            Some(PrimitiveKind::I8)
        );
        assert_eq!(PrimitiveKind::from_stack_type(StackType::Ref, Sign::None), None);
        assert_eq!(StackType::I4.to_string(), "i4");
    }
}
