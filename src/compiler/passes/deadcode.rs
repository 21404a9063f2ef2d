//! Dead initializer and dead store removal.
//!
//! [`RemoveDeadVariableInit`] clears [`crate::il::Variable::has_initial_value`]
//! for locals whose initial value no path can observe. Transforms that require
//! a single definition (inlining, `using` recovery) only see such locals as
//! written once.
//!
//! [`RemoveDeadStores`] deletes every store to a local or stack slot that is
//! never read and never has its address taken. A stored value with an effect
//! survives as an expression statement. Removing a store of `ldloc w` may leave
//! `w` unread in turn, so variables are processed from a work list.

use std::collections::VecDeque;

use crate::{
    analysis::DefiniteAssignment,
    compiler::{passes::utils::offset_of, EventKind, FunctionTransform, TransformContext},
    il::{patterns::match_ldloc, Function, InstrId, InstructionKind, VarId, VariableKind},
    Result,
};

/// Drops initial values that are always overwritten before they are read.
#[derive(Debug, Default)]
pub struct RemoveDeadVariableInit;

impl RemoveDeadVariableInit {
    /// Creates the transform.
    #[must_use]
    pub fn new() -> Self {
        RemoveDeadVariableInit
    }
}

impl FunctionTransform for RemoveDeadVariableInit {
    fn name(&self) -> &'static str {
        "remove-dead-variable-init"
    }

    fn run(&self, f: &mut Function, ctx: &TransformContext<'_>) -> Result<bool> {
        if !ctx.settings.remove_dead_initializers {
            return Ok(false);
        }
        let analysis = DefiniteAssignment::analyze(f, ctx.cancel)?;
        let dead: Vec<VarId> = f
            .variables()
            .filter(|(id, v)| {
                v.has_initial_value
                    && !matches!(v.kind, VariableKind::Parameter | VariableKind::This)
                    && !analysis.is_initial_value_used(*id)
            })
            .map(|(id, _)| id)
            .collect();

        for &variable in &dead {
            f.variable_mut(variable).has_initial_value = false;
            ctx.events
                .record(EventKind::InitializerRemoved)
                .function(ctx.function_name())
                .pass(self.name())
                .message(format!("{} is assigned before use", f.variable(variable).name));
        }
        log::debug!("{}: {} dead initializers", f.name(), dead.len());
        Ok(!dead.is_empty())
    }
}

/// Removes stores to variables that are never read.
#[derive(Debug, Default)]
pub struct RemoveDeadStores;

impl RemoveDeadStores {
    /// Creates the transform.
    #[must_use]
    pub fn new() -> Self {
        RemoveDeadStores
    }

    fn is_dead(f: &Function, variable: VarId) -> bool {
        let v = f.variable(variable);
        matches!(v.kind, VariableKind::Local | VariableKind::StackSlot)
            && v.load_count() == 0
            && v.address_count() == 0
    }

    /// Removes one store; returns the variable its value loaded, if any.
    fn remove_store(f: &mut Function, store: InstrId) -> Result<Option<VarId>> {
        let InstructionKind::StLoc { value, .. } = *f.kind(store) else {
            return Ok(None);
        };
        let Some(parent) = f.parent(store) else {
            return Ok(None);
        };
        let loaded = match_ldloc(f, value);
        let statement_index = match f.kind(parent) {
            InstructionKind::Block { instructions, .. } => {
                instructions.iter().position(|&i| i == store)
            }
            _ => None,
        };
        match statement_index {
            Some(index) if f.is_pure(value) => {
                f.remove_instruction(parent, index)?;
            }
            _ => {
                // Keeps the value for its effect, or for its result when the
                // store itself was used as an expression.
                let value = f.detach(value)?;
                f.replace_with(store, value)?;
            }
        }
        Ok(loaded)
    }
}

impl FunctionTransform for RemoveDeadStores {
    fn name(&self) -> &'static str {
        "remove-dead-stores"
    }

    fn run(&self, f: &mut Function, ctx: &TransformContext<'_>) -> Result<bool> {
        if !ctx.settings.remove_dead_stores {
            return Ok(false);
        }
        let mut queue: VecDeque<VarId> = f.variables().map(|(id, _)| id).collect();
        let mut removed = 0usize;
        while let Some(variable) = queue.pop_front() {
            ctx.check_cancelled()?;
            if !Self::is_dead(f, variable) {
                continue;
            }
            let stores: Vec<InstrId> = f
                .variable(variable)
                .store_instructions()
                .iter()
                .copied()
                .filter(|&s| matches!(f.kind(s), InstructionKind::StLoc { .. }))
                .collect();
            for store in stores {
                let offset = offset_of(f, store);
                if let Some(next) = Self::remove_store(f, store)? {
                    queue.push_back(next);
                }
                removed += 1;
                ctx.record(EventKind::StoreRemoved, self.name(), offset)
                    .message(format!("store to {}", f.variable(variable).name));
            }
        }
        log::debug!("{}: {} dead stores removed", f.name(), removed);
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::{DecompilerSettings, EventLog},
        test::FunctionBuilder,
        typesystem::{SimpleTypeSystem, Type},
        utils::CancellationToken,
    };

    fn run(transform: &dyn FunctionTransform, f: &mut Function) -> (bool, EventLog) {
        let ts = SimpleTypeSystem::new();
        let settings = DecompilerSettings::default();
        let events = EventLog::new();
        let cancel = CancellationToken::new();
        let changed = {
            let ctx = TransformContext::new("m", &ts, &settings, &events, &cancel);
            transform.run(f, &ctx).unwrap()
        };
        (changed, events)
    }

    #[test]
    fn test_initializer_removed_when_stored_first() {
        // stloc x(1); call Use(ldloc x); call Use(ldloc y)
        let mut b = FunctionBuilder::new("m", Type::Void);
        let x = b.local("x", Type::INT32);
        let y = b.local("y", Type::INT32);
        let p = b.param("p", Type::INT32);
        let one = b.ldc(1);
        b.stloc(x, one);
        for v in [x, y, p] {
            let load = b.ldloc(v);
            let call = b.call_static("Use", vec![Type::INT32], Type::Void, vec![load]);
            b.push(call);
        }
        let (mut f, _) = b.finish();

        let (changed, events) = run(&RemoveDeadVariableInit::new(), &mut f);
        assert!(changed);
        assert!(!f.variable(x).has_initial_value);
        assert!(f.variable(y).has_initial_value);
        assert!(f.variable(p).has_initial_value);
        assert_eq!(events.count_kind(EventKind::InitializerRemoved), 1);
    }

    #[test]
    fn test_pure_dead_store_is_deleted() {
        let mut b = FunctionBuilder::new("m", Type::Void);
        let x = b.local("x", Type::INT32);
        let one = b.ldc(1);
        b.stloc(x, one);
        let (mut f, block) = b.finish();

        let (changed, events) = run(&RemoveDeadStores::new(), &mut f);
        assert!(changed);
        assert!(f.block_instructions(block).is_empty());
        assert_eq!(f.variable(x).store_instructions().len(), 0);
        assert!(events.has(EventKind::StoreRemoved));
    }

    #[test]
    fn test_impure_value_kept_for_effect() {
        let mut b = FunctionBuilder::new("m", Type::Void);
        let x = b.local("x", Type::INT32);
        let call = b.call_static("Next", vec![], Type::INT32, vec![]);
        b.stloc(x, call);
        let (mut f, block) = b.finish();

        assert!(run(&RemoveDeadStores::new(), &mut f).0);
        let statements = f.block_instructions(block);
        assert_eq!(statements.len(), 1);
        assert!(matches!(f.kind(statements[0]), InstructionKind::Call { .. }));
    }

    #[test]
    fn test_work_list_reaches_upstream_variables() {
        // stloc a(call Next()); stloc b(ldloc a)   -- b unread, then a unread
        let mut b = FunctionBuilder::new("m", Type::Void);
        let first = b.local("a", Type::INT32);
        let second = b.local("b", Type::INT32);
        let call = b.call_static("Next", vec![], Type::INT32, vec![]);
        b.stloc(first, call);
        let load = b.ldloc(first);
        b.stloc(second, load);
        let (mut f, block) = b.finish();

        let (_, events) = run(&RemoveDeadStores::new(), &mut f);
        assert_eq!(events.count_kind(EventKind::StoreRemoved), 2);
        let statements = f.block_instructions(block);
        assert_eq!(statements.len(), 1);
        assert!(matches!(f.kind(statements[0]), InstructionKind::Call { .. }));
        assert_eq!(f.variable(first).store_instructions().len(), 0);
    }

    #[test]
    fn test_nested_store_keeps_its_value() {
        // call Use(stloc x(ldc 5))
        let mut b = FunctionBuilder::new("m", Type::Void);
        let x = b.local("x", Type::INT32);
        let five = b.ldc(5);
        let store = b.stloc_expr(x, five);
        let call = b.call_static("Use", vec![Type::INT32], Type::Void, vec![store]);
        b.push(call);
        let (mut f, block) = b.finish();

        assert!(run(&RemoveDeadStores::new(), &mut f).0);
        let call = f.block_instructions(block)[0];
        let argument = f.children(call)[0];
        assert_eq!(f.kind(argument), &InstructionKind::LdcI4(5));
    }

    #[test]
    fn test_read_and_addressed_variables_are_kept() {
        let mut b = FunctionBuilder::new("m", Type::Void);
        let read = b.local("r", Type::INT32);
        let addressed = b.local("a", Type::INT32);
        let one = b.ldc(1);
        b.stloc(read, one);
        let two = b.ldc(2);
        b.stloc(addressed, two);
        let load = b.ldloc(read);
        let address = b.ldloca(addressed);
        let call = b.call_static(
            "Use",
            vec![Type::INT32, Type::INT32.by_reference()],
            Type::Void,
            vec![load, address],
        );
        b.push(call);
        let (mut f, block) = b.finish();

        assert!(!run(&RemoveDeadStores::new(), &mut f).0);
        assert_eq!(f.block_instructions(block).len(), 3);
    }
}
