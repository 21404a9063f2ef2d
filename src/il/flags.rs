//! Semantic flags summarizing what an instruction subtree may do.

use bitflags::bitflags;

bitflags! {
    /// Effects of an instruction, including the effects of all its descendants.
    ///
    /// Flags are recomputed for an instruction and all of its ancestors whenever
    /// a child slot changes, so reading them is always up to date.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstructionFlags: u8 {
        /// Reads a local variable, parameter or stack slot.
        const MAY_READ_LOCALS = 0x01;
        /// Writes a local variable, parameter or stack slot.
        const MAY_WRITE_LOCALS = 0x02;
        /// Reads or writes memory, or calls unknown code.
        const SIDE_EFFECT = 0x04;
        /// May raise an exception.
        const MAY_THROW = 0x08;
        /// May transfer control to another block or out of a container.
        const MAY_BRANCH = 0x10;
        /// Control never reaches the point after the instruction.
        const END_POINT_UNREACHABLE = 0x20;
    }
}

impl InstructionFlags {
    /// Flags that make an instruction observable.
    pub const IMPURE: InstructionFlags = InstructionFlags::MAY_WRITE_LOCALS
        .union(InstructionFlags::SIDE_EFFECT)
        .union(InstructionFlags::MAY_THROW)
        .union(InstructionFlags::MAY_BRANCH);

    /// Returns `true` if evaluating the instruction has no observable effect, so it
    /// can be duplicated, dropped or reordered with other pure instructions.
    #[must_use]
    pub fn is_pure(self) -> bool {
        !self.intersects(Self::IMPURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purity() {
        assert!(InstructionFlags::empty().is_pure());
        assert!(InstructionFlags::MAY_READ_LOCALS.is_pure());
        assert!(!InstructionFlags::MAY_WRITE_LOCALS.is_pure());
        assert!(!(InstructionFlags::MAY_READ_LOCALS | InstructionFlags::MAY_THROW).is_pure());
    }
}
