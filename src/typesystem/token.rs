//! Metadata token identifying a type, method, field or property.

use std::fmt;

/// A metadata token: table id in the top byte, row index in the lower 24 bits.
///
/// Tokens are the identity used throughout the crate to compare entities: two
/// method references denote the same method if and only if their tokens match.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Table id of `TypeDef` tokens.
    pub const TYPE_DEF: u8 = 0x02;
    /// Table id of `Field` tokens.
    pub const FIELD: u8 = 0x04;
    /// Table id of `MethodDef` tokens.
    pub const METHOD_DEF: u8 = 0x06;
    /// Table id of `Property` tokens.
    pub const PROPERTY: u8 = 0x17;

    /// Creates a token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table id and a row index.
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns the table id.
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Returns the row index.
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns `true` for the nil token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
