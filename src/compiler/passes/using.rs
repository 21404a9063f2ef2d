//! Recovery of `using` statements from `try`/`finally` pairs.
//!
//! ```text
//! stloc obj(resource)
//! try {
//!     BODY
//! } finally {
//!     if (comp.ne(ldloc obj, ldnull)) { callvirt Dispose(ldloc obj) }
//!     leave finally
//! }
//! -->
//! using (obj = resource) { BODY }
//! ```
//!
//! Each candidate position goes through a small state machine: it starts out
//! as [`Candidate::Scanning`], becomes [`Candidate::Paired`] when a store is
//! directly followed by a `try`/`finally`, and ends either folded or rejected.
//! A rejected pair stays an ordinary `try`/`finally`; there is no retry.

use crate::{
    compiler::{BlockContext, BlockTransform, EventKind, TransformContext},
    il::{
        patterns::{
            match_comp_not_equals, match_if, match_invocation, match_isinst, match_ldloc_of,
            match_ldloc_or_ldloca, match_ldnull, match_leave, match_nop, match_stloc,
            unwrap_single,
        },
        CallKind, Function, InstrId, InstructionKind, VarId,
    },
    typesystem::TypeSystem,
    Result,
};

/// Where the scan over one block position stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidate {
    /// No store/`try` pair at this position.
    Scanning,
    /// `stloc variable(value)` directly followed by `try_finally`.
    Paired {
        store: InstrId,
        variable: VarId,
        value: InstrId,
        try_finally: InstrId,
    },
}

/// Accepted shapes of the finally handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisposeShape {
    /// `if (obj != null) obj.Dispose()`
    Direct,
    /// `obj.Dispose()` on a value type.
    Unconditional,
    /// `tmp = obj as IDisposable; if (tmp != null) tmp.Dispose()`
    Cast,
}

/// Folds `stloc v(..); try { .. } finally { dispose v }` into `using`.
#[derive(Debug, Default)]
pub struct UsingTransform;

impl UsingTransform {
    /// Creates the transform.
    #[must_use]
    pub fn new() -> Self {
        UsingTransform
    }

    fn candidate(f: &Function, block: InstrId, pos: usize) -> Candidate {
        let statements = f.block_instructions(block);
        let (Some(&store), Some(&try_finally)) = (
            pos.checked_sub(1).and_then(|p| statements.get(p)),
            statements.get(pos),
        ) else {
            return Candidate::Scanning;
        };
        if !matches!(f.kind(try_finally), InstructionKind::TryFinally { .. }) {
            return Candidate::Scanning;
        }
        match match_stloc(f, store) {
            Some((variable, value)) => Candidate::Paired {
                store,
                variable,
                value,
                try_finally,
            },
            None => Candidate::Scanning,
        }
    }

    /// Checks the resource variable; returns the matched finally shape.
    fn validate(
        f: &Function,
        ts: &dyn TypeSystem,
        store: InstrId,
        variable: VarId,
        value: InstrId,
        try_finally: InstrId,
    ) -> Option<DisposeShape> {
        let var = f.variable(variable);
        if !ts.is_disposable(&var.ty) {
            return None;
        }
        if var
            .load_instructions()
            .iter()
            .chain(var.address_instructions())
            .any(|&use_site| !f.is_descendant_of(use_site, try_finally))
        {
            return None;
        }
        if var.store_count() != 1 || var.store_instructions() != [store] {
            return None;
        }
        let InstructionKind::TryFinally { finally_block, .. } = *f.kind(try_finally) else {
            return None;
        };
        match_dispose_block(f, ts, finally_block, variable, match_ldnull(f, value))
    }

    fn fold(
        f: &mut Function,
        block: InstrId,
        pos: usize,
        store: InstrId,
        variable: VarId,
        value: InstrId,
        try_finally: InstrId,
    ) -> Result<InstrId> {
        let InstructionKind::TryFinally { try_block, .. } = *f.kind(try_finally) else {
            return Err(crate::Error::AnalysisFailed(format!(
                "{:?} is not a try/finally",
                try_finally
            )));
        };
        let range = f.range(store).union(f.range(try_finally));
        let resource = f.detach(value)?;
        let body = f.detach(try_block)?;
        f.remove_instruction(block, pos)?;
        let using = f.create_at(
            InstructionKind::Using {
                variable,
                resource,
                body,
            },
            range,
        );
        f.set_instruction(block, pos - 1, using)?;
        Ok(using)
    }
}

/// Matches the entry block of the finally `container` against the accepted
/// dispose shapes for `variable`.
fn match_dispose_block(
    f: &Function,
    ts: &dyn TypeSystem,
    container: InstrId,
    variable: VarId,
    using_null: bool,
) -> Option<DisposeShape> {
    let entry = f.entry_block(container)?;
    let statements = f.block_instructions(entry);
    if !(2..=3).contains(&statements.len()) || f.incoming_edge_count(entry) != 1 {
        return None;
    }
    let (check, leave) = (statements[statements.len() - 2], statements[statements.len() - 1]);
    let (leave_target, leave_value) = match_leave(f, leave)?;
    if leave_target != container || !match_nop(f, leave_value) {
        return None;
    }

    let mut disposed = variable;
    let mut is_reference = f.variable(variable).ty.is_reference_type() != Some(false);
    let mut shape = DisposeShape::Direct;
    if statements.len() == 3 {
        let (temp, cast) = match_stloc(f, statements[0])?;
        let (load, ty) = match_isinst(f, cast)?;
        if !match_ldloc_of(f, load, variable) || !ty.is_disposable_interface() {
            return None;
        }
        let temp_var = f.variable(temp);
        if temp_var.store_count() != 1 || temp_var.load_count() != 2 {
            return None;
        }
        disposed = temp;
        is_reference = true;
        shape = DisposeShape::Cast;
    }

    let call = if is_reference {
        let (condition, then, otherwise) = match_if(f, check)?;
        if !match_nop(f, otherwise) {
            return None;
        }
        let (left, right) = match_comp_not_equals(f, condition)?;
        if !match_ldloc_of(f, left, disposed) || !match_ldnull(f, right) {
            return None;
        }
        if !matches!(f.kind(then), InstructionKind::Block { .. })
            || f.block_instructions(then).len() != 1
        {
            return None;
        }
        unwrap_single(f, then)
    } else {
        shape = DisposeShape::Unconditional;
        check
    };

    let invocation = match_invocation(f, call)?;
    if invocation.kind != CallKind::CallVirt
        || !ts.is_dispose_method(invocation.method)
        || invocation.arguments.len() != 1
    {
        return None;
    }
    let argument = invocation.arguments[0];
    let disposes_variable = match_ldloc_or_ldloca(f, argument) == Some(disposed);
    (disposes_variable || (using_null && match_ldnull(f, argument))).then_some(shape)
}

impl BlockTransform for UsingTransform {
    fn name(&self) -> &'static str {
        "using-transform"
    }

    fn run(
        &self,
        f: &mut Function,
        block: InstrId,
        ctx: &TransformContext<'_>,
        _block_ctx: BlockContext<'_>,
    ) -> Result<bool> {
        if !ctx.settings.using_statement {
            return Ok(false);
        }
        let mut changed = false;
        let mut pos = f.block_instructions(block).len();
        while pos > 1 {
            pos -= 1;
            ctx.check_cancelled()?;
            let Candidate::Paired {
                store,
                variable,
                value,
                try_finally,
            } = Self::candidate(f, block, pos)
            else {
                continue;
            };
            let Some(shape) = Self::validate(f, ctx.type_system, store, variable, value, try_finally)
            else {
                log::trace!(
                    "try/finally at IL_{:04x} in {} is not a using",
                    f.range(try_finally).start,
                    f.name()
                );
                continue;
            };
            let using = Self::fold(f, block, pos, store, variable, value, try_finally)?;
            ctx.record(EventKind::UsingRecovered, self.name(), f.range(using).start)
                .message(format!(
                    "using ({}) with {:?} dispose",
                    f.variable(variable).name,
                    shape
                ));
            changed = true;
            pos = pos.min(f.block_instructions(block).len());
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::ControlFlowGraph,
        compiler::{DecompilerSettings, EventLog},
        il::ContainerKind,
        test::{Fixture, FunctionBuilder},
        typesystem::Type,
        utils::CancellationToken,
    };

    fn run(fixture: &Fixture, f: &mut Function, block: InstrId) -> (bool, EventLog) {
        let settings = DecompilerSettings::default();
        let events = EventLog::new();
        let cancel = CancellationToken::new();
        let body = f.body();
        let cfg = ControlFlowGraph::build(f, body, &cancel).unwrap();
        let node = cfg.node_of(block).unwrap();
        let changed = {
            let ctx = TransformContext::new("m", &fixture.ts, &settings, &events, &cancel);
            UsingTransform::new()
                .run(f, block, &ctx, BlockContext { cfg: &cfg, node })
                .unwrap()
        };
        (changed, events)
    }

    /// `stloc v(resource); try { call Work(ldloc v) } finally { <finally> }`
    fn using_candidate(
        ty: &Type,
        null_resource: bool,
        finally: impl FnOnce(&mut FunctionBuilder, VarId) -> Vec<InstrId>,
    ) -> (Function, InstrId, VarId) {
        let mut b = FunctionBuilder::new("m", Type::Void);
        let v = b.local("v", ty.clone());
        b.no_initial_value(v);
        let resource = if null_resource {
            b.ldnull()
        } else {
            b.call_static("Open", vec![], ty.clone(), vec![])
        };
        b.stloc(v, resource);
        let load = b.ldloc(v);
        let work = b.call_static("Work", vec![ty.clone()], Type::Void, vec![load]);
        let finally_statements = finally(&mut b, v);
        let try_finally = b.try_finally(vec![work], finally_statements);
        b.push(try_finally);
        let (f, block) = b.finish();
        (f, block, v)
    }

    fn guarded_dispose(fixture: &Fixture, b: &mut FunctionBuilder, v: VarId) -> Vec<InstrId> {
        let load = b.ldloc(v);
        let call = b.call(&fixture.dispose, CallKind::CallVirt, vec![load]);
        let body = b.block_of(vec![call]);
        let left = b.ldloc(v);
        let null = b.ldnull();
        let cond = b.comp_ne(left, null);
        vec![b.if_then(cond, body)]
    }

    fn assert_using(f: &Function, block: InstrId, v: VarId) {
        let statements = f.block_instructions(block);
        assert_eq!(statements.len(), 1);
        let InstructionKind::Using { variable, body, .. } = *f.kind(statements[0]) else {
            panic!("expected using, got {:?}", f.kind(statements[0]));
        };
        assert_eq!(variable, v);
        assert!(matches!(
            f.kind(body),
            InstructionKind::BlockContainer {
                kind: ContainerKind::Normal,
                ..
            }
        ));
        assert_eq!(f.variable(v).store_count(), 1);
    }

    #[test]
    fn test_direct_dispose() {
        let fixture = Fixture::new();
        let ty = fixture.disposable_class.clone();
        let (mut f, block, v) =
            using_candidate(&ty, false, |b, v| guarded_dispose(&fixture, b, v));
        let (changed, events) = run(&fixture, &mut f, block);
        assert!(changed);
        assert!(events.has(EventKind::UsingRecovered));
        assert_using(&f, block, v);
    }

    #[test]
    fn test_unconditional_dispose_on_struct() {
        let fixture = Fixture::new();
        let ty = fixture.disposable_struct.clone();
        let (mut f, block, v) = using_candidate(&ty, false, |b, v| {
            let address = b.ldloca(v);
            vec![b.call(&fixture.dispose, CallKind::CallVirt, vec![address])]
        });
        let (changed, _) = run(&fixture, &mut f, block);
        assert!(changed);
        assert_using(&f, block, v);
    }

    #[test]
    fn test_cast_then_dispose() {
        let fixture = Fixture::new();
        let ty = fixture.disposable_class.clone();
        let (mut f, block, v) = using_candidate(&ty, false, |b, v| {
            let temp = b.local("d", fixture.disposable.clone());
            b.no_initial_value(temp);
            let load = b.ldloc(v);
            let cast = b.isinst(load, fixture.disposable.clone());
            let store = b.stloc_expr(temp, cast);
            let mut statements = vec![store];
            statements.extend(guarded_dispose(&fixture, b, temp));
            statements
        });
        let (changed, _) = run(&fixture, &mut f, block);
        assert!(changed);
        assert_using(&f, block, v);
    }

    #[test]
    fn test_null_resource_disposing_null_literal() {
        let fixture = Fixture::new();
        let ty = fixture.disposable_class.clone();
        let (mut f, block, v) = using_candidate(&ty, true, |b, v| {
            let null_arg = b.ldnull();
            let call = b.call(&fixture.dispose, CallKind::CallVirt, vec![null_arg]);
            let body = b.block_of(vec![call]);
            let left = b.ldloc(v);
            let null = b.ldnull();
            let cond = b.comp_ne(left, null);
            vec![b.if_then(cond, body)]
        });
        let (changed, _) = run(&fixture, &mut f, block);
        assert!(changed);
        assert_using(&f, block, v);
        let InstructionKind::Using { resource, .. } = *f.kind(f.block_instructions(block)[0]) else {
            unreachable!();
        };
        assert!(match_ldnull(&f, resource));
    }

    #[test]
    fn test_null_literal_requires_null_resource() {
        let fixture = Fixture::new();
        let ty = fixture.disposable_class.clone();
        let (mut f, block, _) = using_candidate(&ty, false, |b, v| {
            let null_arg = b.ldnull();
            let call = b.call(&fixture.dispose, CallKind::CallVirt, vec![null_arg]);
            let body = b.block_of(vec![call]);
            let left = b.ldloc(v);
            let null = b.ldnull();
            let cond = b.comp_ne(left, null);
            vec![b.if_then(cond, body)]
        });
        let (changed, _) = run(&fixture, &mut f, block);
        assert!(!changed);
        assert_eq!(f.block_instructions(block).len(), 2);
    }

    #[test]
    fn test_wrong_method_is_rejected() {
        let fixture = Fixture::new();
        let ty = fixture.disposable_class.clone();
        let (mut f, block, _) = using_candidate(&ty, false, |b, v| {
            let load = b.ldloc(v);
            let close = b.instance_method(&ty, "Close", vec![], Type::Void);
            let call = b.call(&close, CallKind::CallVirt, vec![load]);
            let body = b.block_of(vec![call]);
            let left = b.ldloc(v);
            let null = b.ldnull();
            let cond = b.comp_ne(left, null);
            vec![b.if_then(cond, body)]
        });
        let (changed, _) = run(&fixture, &mut f, block);
        assert!(!changed);
    }

    #[test]
    fn test_extra_argument_is_rejected() {
        let fixture = Fixture::new();
        let ty = fixture.disposable_class.clone();
        let (mut f, block, _) = using_candidate(&ty, false, |b, v| {
            let load = b.ldloc(v);
            let extra = b.ldc(1);
            let call = b.call(&fixture.dispose, CallKind::CallVirt, vec![load, extra]);
            let body = b.block_of(vec![call]);
            let left = b.ldloc(v);
            let null = b.ldnull();
            let cond = b.comp_ne(left, null);
            vec![b.if_then(cond, body)]
        });
        let (changed, _) = run(&fixture, &mut f, block);
        assert!(!changed);
    }

    #[test]
    fn test_load_outside_try_is_rejected() {
        let fixture = Fixture::new();
        let ty = fixture.disposable_class.clone();
        let mut b = FunctionBuilder::new("m", Type::Void);
        let v = b.local("v", ty.clone());
        b.no_initial_value(v);
        let resource = b.call_static("Open", vec![], ty.clone(), vec![]);
        b.stloc(v, resource);
        let work = b.call_static("Work", vec![], Type::Void, vec![]);
        let finally = guarded_dispose(&fixture, &mut b, v);
        let try_finally = b.try_finally(vec![work], finally);
        b.push(try_finally);
        let after = b.ldloc(v);
        let escape = b.call_static("Keep", vec![ty.clone()], Type::Void, vec![after]);
        b.push(escape);
        let (mut f, block) = b.finish();

        let (changed, _) = run(&fixture, &mut f, block);
        assert!(!changed);
    }

    #[test]
    fn test_non_disposable_is_rejected() {
        let fixture = Fixture::new();
        let ty = fixture.counter.clone();
        let (mut f, block, _) =
            using_candidate(&ty, false, |b, v| guarded_dispose(&fixture, b, v));
        let (changed, _) = run(&fixture, &mut f, block);
        assert!(!changed);
    }

    #[test]
    fn test_disabled_setting() {
        let fixture = Fixture::new();
        let ty = fixture.disposable_class.clone();
        let (mut f, block, _) =
            using_candidate(&ty, false, |b, v| guarded_dispose(&fixture, b, v));
        let settings = DecompilerSettings::default().with_using_statement(false);
        let events = EventLog::new();
        let cancel = CancellationToken::new();
        let body = f.body();
        let cfg = ControlFlowGraph::build(&f, body, &cancel).unwrap();
        let node = cfg.node_of(block).unwrap();
        let ctx = TransformContext::new("m", &fixture.ts, &settings, &events, &cancel);
        assert!(!UsingTransform::new()
            .run(&mut f, block, &ctx, BlockContext { cfg: &cfg, node })
            .unwrap());
    }
}
