//! Variables of a function: parameters, locals and evaluation-stack slots.

use std::fmt;

use crate::{il::InstrId, typesystem::Type};

/// Index of a [`Variable`] inside its [`crate::il::Function`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub(crate) u32);

impl VarId {
    /// Dense index, suitable for bit sets.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Storage class of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    /// Declared method parameter.
    Parameter,
    /// The implicit `this` parameter.
    This,
    /// Declared local variable.
    Local,
    /// Temporary introduced for a value that lived on the evaluation stack.
    StackSlot,
}

/// A variable together with the instructions that currently use it.
///
/// The use lists only contain instructions that are attached to the function
/// body. They are maintained by [`crate::il::Function`] as instructions are
/// connected and disconnected, so the counts are always exact.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Storage class.
    pub kind: VariableKind,
    /// Declared or inferred type.
    pub ty: Type,
    /// Display name.
    pub name: String,
    /// Parameter or local slot index, if the variable has one.
    pub index: Option<u16>,
    /// Whether the variable holds a meaningful value on function entry.
    ///
    /// `true` for parameters and for locals (which the runtime zero-initializes)
    /// until dead initializer removal proves the initial value is never observed.
    pub has_initial_value: bool,
    pub(crate) loads: Vec<InstrId>,
    pub(crate) stores: Vec<InstrId>,
    pub(crate) addresses: Vec<InstrId>,
}

impl Variable {
    pub(crate) fn new(kind: VariableKind, ty: Type, name: String, index: Option<u16>) -> Self {
        Variable {
            kind,
            ty,
            name,
            index,
            has_initial_value: !matches!(kind, VariableKind::StackSlot),
            loads: Vec::new(),
            stores: Vec::new(),
            addresses: Vec::new(),
        }
    }

    /// Attached `ldloc` instructions reading this variable.
    #[must_use]
    pub fn load_instructions(&self) -> &[InstrId] {
        &self.loads
    }

    /// Attached `stloc` and `using` instructions writing this variable.
    #[must_use]
    pub fn store_instructions(&self) -> &[InstrId] {
        &self.stores
    }

    /// Attached `ldloca` instructions taking the address of this variable.
    #[must_use]
    pub fn address_instructions(&self) -> &[InstrId] {
        &self.addresses
    }

    /// Number of loads.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.len()
    }

    /// Number of stores, counting the initial value as one.
    #[must_use]
    pub fn store_count(&self) -> usize {
        self.stores.len() + usize::from(self.has_initial_value)
    }

    /// Number of address-taking instructions.
    #[must_use]
    pub fn address_count(&self) -> usize {
        self.addresses.len()
    }

    /// Written exactly once and never through an address.
    #[must_use]
    pub fn is_single_definition(&self) -> bool {
        self.store_count() == 1 && self.address_count() == 0
    }
}
