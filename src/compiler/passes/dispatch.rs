//! State dispatch chains to `switch`.
//!
//! Compiler-generated state machines open with a chain of state tests:
//!
//! ```text
//! stloc num(ldfld <>1__state(ldloc this))      stloc num(ldfld <>1__state(ldloc this))
//! if (comp.eq(ldloc num, ldc.i4 0)) br A   -->  switch (ldloc num) {
//! if (comp.eq(ldloc num, ldc.i4 1)) br B          case [0]: br A
//! br C                                            case [1]: br B
//!                                                 case [..-1, 2..]: br C }
//! ```
//!
//! The chain is evaluated with [`StateDispatch`]; the rewrite only happens when
//! every state value is accounted for.

use crate::{
    analysis::{StateDispatch, SymbolicEvaluationContext},
    compiler::{passes::utils::offset_of, BlockContext, BlockTransform, EventKind, TransformContext},
    il::{
        patterns::{match_branch, match_ldfld, match_ldloc, match_stloc},
        Function, InstrId, InstructionKind, VariableKind,
    },
    typesystem::Token,
    Result,
};

/// Suffix of the field compilers use to hold a state machine's phase.
const STATE_FIELD_SUFFIX: &str = "__state";

/// Fewer targets than this read better as `if`/`goto`.
const MIN_TARGETS: usize = 3;

/// Rewrites a complete state dispatch chain into an [`InstructionKind::Switch`].
#[derive(Debug, Default)]
pub struct StateDispatchSwitch;

impl StateDispatchSwitch {
    /// Creates the transform.
    #[must_use]
    pub fn new() -> Self {
        StateDispatchSwitch
    }

    /// The first `this.<>N__state` read in `block`, with its field token.
    fn state_read(f: &Function, block: InstrId) -> Option<(InstrId, Token)> {
        f.descendants(block).into_iter().find_map(|inst| {
            let (target, field) = match_ldfld(f, inst)?;
            let on_this = match_ldloc(f, target)
                .is_some_and(|v| f.variable(v).kind == VariableKind::This);
            (on_this && field.name.ends_with(STATE_FIELD_SUFFIX)).then_some((inst, field.token))
        })
    }
}

impl BlockTransform for StateDispatchSwitch {
    fn name(&self) -> &'static str {
        "state-dispatch"
    }

    fn run(
        &self,
        f: &mut Function,
        block: InstrId,
        ctx: &TransformContext<'_>,
        _block_ctx: BlockContext<'_>,
    ) -> Result<bool> {
        if !ctx.settings.state_dispatch {
            return Ok(false);
        }
        let Some((read, field)) = Self::state_read(f, block) else {
            return Ok(false);
        };
        let mut symbolic = SymbolicEvaluationContext::new(field);
        let dispatch = StateDispatch::analyze(f, block, &mut symbolic);
        if !dispatch.complete {
            return Ok(false);
        }
        let statements = f.block_instructions(block).to_vec();
        let Some(&last) = statements.last() else {
            return Ok(false);
        };
        if match_branch(f, last).is_none() {
            return Ok(false);
        }

        let mut targets: Vec<InstrId> = Vec::new();
        for arm in &dispatch.arms {
            if !targets.contains(&arm.target) {
                targets.push(arm.target);
            }
        }
        if targets.len() < MIN_TARGETS {
            return Ok(false);
        }

        let prologue = statements
            .iter()
            .take_while(|&&inst| {
                match_stloc(f, inst).is_some_and(|(v, _)| symbolic.is_state_variable(v))
            })
            .count();
        let chain = &statements[prologue..];
        let Some(&first) = chain.first() else {
            return Ok(false);
        };
        let range = chain
            .iter()
            .fold(f.range(first), |range, &inst| range.union(f.range(inst)));
        let offset = offset_of(f, first);

        let read_range = f.range(read);
        let value = match statements[..prologue].first().and_then(|&s| match_stloc(f, s)) {
            Some((variable, _)) => f.create_at(InstructionKind::LdLoc(variable), read_range),
            None => f.clone_subtree(read),
        };
        let mut sections = Vec::with_capacity(targets.len());
        for &target in &targets {
            let branch = f.create(InstructionKind::Branch { target });
            sections.push(f.create(InstructionKind::SwitchSection {
                labels: dispatch.states_for(target),
                body: branch,
            }));
        }

        for _ in prologue..statements.len() {
            f.remove_instruction(block, prologue)?;
        }
        let switch = f.create_at(InstructionKind::Switch { value, sections }, range);
        f.push_instruction(block, switch)?;

        ctx.record(EventKind::SwitchDetected, self.name(), offset)
            .message(format!("{} state arms", targets.len()));
        log::trace!("state dispatch at IL_{:04x} in {}", offset, f.name());
        Ok(true)
    }
}
