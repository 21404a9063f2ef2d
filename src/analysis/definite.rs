//! Definite assignment: which variables' initial values can be observed.
//!
//! The analysis walks the instruction tree once in evaluation order, carrying
//! the set of variables that may still hold their initial value. A load of a
//! variable in that set observes the initial value. Stores remove the variable
//! from the set; control-flow joins take the union ("possibly uninitialized"
//! wins). Block containers iterate their blocks to a fixed point, since loops
//! can carry an uninitialized variable back to an earlier block.
//!
//! The unreachable state is represented by `None`: code after a branch, leave
//! or throw does not contribute to any join.

use std::collections::HashMap;

use crate::{
    il::{Function, InstrId, InstructionKind, VarId},
    utils::{BitSet, CancellationToken},
    Result,
};

/// Possibly-uninitialized variables, `None` for unreachable code.
type State = Option<BitSet>;

fn join(into: &mut State, other: State) -> bool {
    match (into.as_mut(), other) {
        (_, None) => false,
        (None, Some(other)) => {
            *into = Some(other);
            true
        }
        (Some(current), Some(other)) => current.union_with(&other),
    }
}

/// Result of the definite assignment analysis.
#[derive(Debug, Clone)]
pub struct DefiniteAssignment {
    initial_value_used: BitSet,
}

impl DefiniteAssignment {
    /// Runs the analysis over the whole function body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Cancelled`] if `cancel` fires while iterating containers.
    pub fn analyze(f: &Function, cancel: &CancellationToken) -> Result<Self> {
        let count = f.variable_count();
        let mut visitor = Visitor {
            f,
            cancel,
            used: BitSet::new(count),
            block_in: HashMap::new(),
            exits: HashMap::new(),
            dirty: false,
        };
        let mut state = Some(BitSet::full(count));
        visitor.visit(f.body(), &mut state)?;
        Ok(DefiniteAssignment {
            initial_value_used: visitor.used,
        })
    }

    /// Returns `true` if some path reads `variable` before any store to it.
    #[must_use]
    pub fn is_initial_value_used(&self, variable: VarId) -> bool {
        self.initial_value_used.contains(variable.index())
    }

    /// Variables whose initial value is observed.
    pub fn initial_value_used(&self) -> impl Iterator<Item = VarId> + '_ {
        self.initial_value_used.iter().map(|i| VarId(i as u32))
    }
}

struct Visitor<'a> {
    f: &'a Function,
    cancel: &'a CancellationToken,
    used: BitSet,
    block_in: HashMap<InstrId, BitSet>,
    exits: HashMap<InstrId, BitSet>,
    dirty: bool,
}

impl Visitor<'_> {
    fn read(&mut self, variable: VarId, state: &State) {
        if let Some(uninit) = state {
            if uninit.contains(variable.index()) {
                self.used.insert(variable.index());
            }
        }
    }

    fn write(variable: VarId, state: &mut State) {
        if let Some(uninit) = state {
            uninit.remove(variable.index());
        }
    }

    fn jump(map: &mut HashMap<InstrId, BitSet>, target: InstrId, state: State) -> bool {
        let Some(state) = state else {
            return false;
        };
        match map.get_mut(&target) {
            Some(existing) => existing.union_with(&state),
            None => {
                map.insert(target, state);
                true
            }
        }
    }

    fn visit(&mut self, id: InstrId, state: &mut State) -> Result<()> {
        let f = self.f;
        match f.kind(id) {
            InstructionKind::LdLoc(v) => self.read(*v, state),
            InstructionKind::LdLoca(v) => {
                // The callee may read through the address before writing.
                self.read(*v, state);
                Self::write(*v, state);
            }
            InstructionKind::StLoc { variable, value } => {
                self.visit(*value, state)?;
                Self::write(*variable, state);
            }
            InstructionKind::Using {
                variable,
                resource,
                body,
            } => {
                self.visit(*resource, state)?;
                Self::write(*variable, state);
                self.visit(*body, state)?;
            }
            InstructionKind::IfInstruction {
                condition,
                true_inst,
                false_inst,
            } => {
                self.visit(*condition, state)?;
                let mut other = state.clone();
                self.visit(*true_inst, state)?;
                self.visit(*false_inst, &mut other)?;
                join(state, other);
            }
            InstructionKind::Branch { target } => {
                if Self::jump(&mut self.block_in, *target, state.take()) {
                    self.dirty = true;
                }
            }
            InstructionKind::Leave { target, value } => {
                self.visit(*value, state)?;
                Self::jump(&mut self.exits, *target, state.take());
            }
            InstructionKind::Throw(argument) => {
                self.visit(*argument, state)?;
                *state = None;
            }
            InstructionKind::BlockContainer { blocks, .. } => {
                self.visit_container(id, blocks, state)?;
            }
            InstructionKind::TryFinally {
                try_block,
                finally_block,
            } => {
                // Any point of the try may throw into the finally; stores only
                // shrink the set, so the state on entry covers all of them.
                let mut on_throw = state.clone();
                self.visit(*try_block, state)?;
                self.visit(*finally_block, &mut on_throw)?;
                self.visit(*finally_block, state)?;
            }
            InstructionKind::Switch { value, sections } => {
                self.visit(*value, state)?;
                let entry = state.take();
                for section in sections {
                    let mut section_state = entry.clone();
                    self.visit(*section, &mut section_state)?;
                    join(state, section_state);
                }
            }
            _ => {
                for child in f.children(id) {
                    self.visit(child, state)?;
                }
            }
        }
        Ok(())
    }

    fn visit_container(&mut self, container: InstrId, blocks: &[InstrId], state: &mut State) -> Result<()> {
        let Some(&entry) = blocks.first() else {
            *state = None;
            return Ok(());
        };
        Self::jump(&mut self.block_in, entry, state.take());
        self.exits.remove(&container);
        let outer_dirty = self.dirty;

        loop {
            self.cancel.check()?;
            self.dirty = false;
            for &block in blocks {
                let Some(input) = self.block_in.get(&block).cloned() else {
                    continue;
                };
                let mut block_state = Some(input);
                for child in self.f.children(block) {
                    self.visit(child, &mut block_state)?;
                }
            }
            if !self.dirty {
                break;
            }
        }

        for block in blocks {
            self.block_in.remove(block);
        }
        self.dirty = outer_dirty;
        *state = self.exits.remove(&container);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        il::{ComparisonKind, ContainerKind, VariableKind},
        typesystem::{Sign, Type},
    };

    struct Body {
        f: Function,
        block: InstrId,
    }

    fn body() -> Body {
        let mut f = Function::new("m", Type::INT32);
        let block = f.create_block_with_label(0);
        let container = f.body();
        f.add_block(container, block).unwrap();
        Body { f, block }
    }

    fn store(f: &mut Function, v: VarId, value: i32) -> InstrId {
        let value = f.create(InstructionKind::LdcI4(value));
        f.create(InstructionKind::StLoc { variable: v, value })
    }

    fn ret(f: &mut Function, v: VarId) -> InstrId {
        let load = f.create(InstructionKind::LdLoc(v));
        let body = f.body();
        f.create(InstructionKind::Leave {
            target: body,
            value: load,
        })
    }

    #[test]
    fn test_store_before_load_hides_initial_value() {
        let mut b = body();
        let x = b.f.add_variable(VariableKind::Local, Type::INT32, "x", Some(0));
        let s = store(&mut b.f, x, 1);
        let r = ret(&mut b.f, x);
        b.f.push_instruction(b.block, s).unwrap();
        b.f.push_instruction(b.block, r).unwrap();

        let result = DefiniteAssignment::analyze(&b.f, &CancellationToken::new()).unwrap();
        assert!(!result.is_initial_value_used(x));
    }

    #[test]
    fn test_store_on_one_branch_only() {
        let mut b = body();
        let p = b.f.add_variable(VariableKind::Parameter, Type::INT32, "p", Some(0));
        let x = b.f.add_variable(VariableKind::Local, Type::INT32, "x", Some(0));
        let cond = {
            let left = b.f.create(InstructionKind::LdLoc(p));
            let right = b.f.create(InstructionKind::LdcI4(0));
            b.f.create(InstructionKind::Comp {
                kind: ComparisonKind::Equality,
                sign: Sign::None,
                left,
                right,
            })
        };
        let then = store(&mut b.f, x, 1);
        let nop = b.f.create(InstructionKind::Nop);
        let branch_if = b.f.create(InstructionKind::IfInstruction {
            condition: cond,
            true_inst: then,
            false_inst: nop,
        });
        let r = ret(&mut b.f, x);
        b.f.push_instruction(b.block, branch_if).unwrap();
        b.f.push_instruction(b.block, r).unwrap();

        let result = DefiniteAssignment::analyze(&b.f, &CancellationToken::new()).unwrap();
        assert!(result.is_initial_value_used(x));
        assert!(result.is_initial_value_used(p));
    }

    #[test]
    fn test_loop_carries_uninitialized_value_back() {
        // loop { use x; x = 1; br entry }
        let mut b = body();
        let x = b.f.add_variable(VariableKind::Local, Type::INT32, "x", Some(0));
        let y = b.f.add_variable(VariableKind::Local, Type::INT32, "y", Some(1));
        let lp = b.f.create_container(ContainerKind::Loop);
        let head = b.f.create_block_with_label(0x10);
        b.f.add_block(lp, head).unwrap();
        let read = {
            let load = b.f.create(InstructionKind::LdLoc(x));
            b.f.create(InstructionKind::StLoc {
                variable: y,
                value: load,
            })
        };
        let write = store(&mut b.f, x, 1);
        let back = b.f.create(InstructionKind::Branch { target: head });
        b.f.push_instruction(head, read).unwrap();
        b.f.push_instruction(head, write).unwrap();
        b.f.push_instruction(head, back).unwrap();
        b.f.push_instruction(b.block, lp).unwrap();

        let result = DefiniteAssignment::analyze(&b.f, &CancellationToken::new()).unwrap();
        assert!(result.is_initial_value_used(x));
        assert!(!result.is_initial_value_used(y));
    }

    #[test]
    fn test_code_after_throw_is_unreachable() {
        let mut b = body();
        let x = b.f.add_variable(VariableKind::Local, Type::INT32, "x", Some(0));
        let null = b.f.create(InstructionKind::LdNull);
        let throw = b.f.create(InstructionKind::Throw(null));
        let r = ret(&mut b.f, x);
        b.f.push_instruction(b.block, throw).unwrap();
        b.f.push_instruction(b.block, r).unwrap();

        let result = DefiniteAssignment::analyze(&b.f, &CancellationToken::new()).unwrap();
        assert!(!result.is_initial_value_used(x));
    }

    #[test]
    fn test_cancelled() {
        let b = body();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            DefiniteAssignment::analyze(&b.f, &cancel),
            Err(crate::Error::Cancelled)
        ));
    }
}
