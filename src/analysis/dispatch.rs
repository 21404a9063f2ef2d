//! Recovery of state dispatch chains.
//!
//! A state machine's dispatch block tests the state with a chain of
//! conditional branches:
//!
//! ```text
//! stloc num(ldobj(ldflda <>1__state(ldloc this)))
//! if (comp.eq(ldloc num, ldc.i4 0)) br IL_0020
//! if (comp.eq(ldloc num, ldc.i4 1)) br IL_0040
//! br IL_0060
//! ```
//!
//! [`StateDispatch::analyze`] evaluates each condition with the
//! [`SymbolicEvaluationContext`] and records which state values reach which
//! block. States taken by an earlier condition are removed from later ones, so
//! the arms are pairwise disjoint.

use crate::{
    analysis::{SymbolicEvaluationContext, SymbolicValue},
    il::{
        patterns::{is_empty_body, match_branch, match_if, match_stloc, unwrap_single},
        Function, InstrId,
    },
    utils::LongSet,
};

/// One outgoing arm of a dispatch block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchArm {
    /// Target block.
    pub target: InstrId,
    /// State values that branch to `target` through this arm.
    pub states: LongSet,
}

/// Result of analyzing a dispatch block.
#[derive(Debug, Clone)]
pub struct StateDispatch {
    /// Arms in the order the block tests them.
    pub arms: Vec<DispatchArm>,
    /// State values not yet assigned to an arm.
    pub remaining: LongSet,
    /// `true` if the chain ended in an unconditional branch, so every state is covered.
    pub complete: bool,
}

impl StateDispatch {
    /// Analyzes the instructions of `block`.
    ///
    /// Leading `stloc v(state)` copies register `v` as a state variable in
    /// `context`. The walk stops at the first instruction that is neither a
    /// state copy, a recognized conditional branch nor the final branch.
    #[must_use]
    pub fn analyze(
        f: &Function,
        block: InstrId,
        context: &mut SymbolicEvaluationContext,
    ) -> StateDispatch {
        let mut dispatch = StateDispatch {
            arms: Vec::new(),
            remaining: LongSet::range(i64::from(i32::MIN), i64::from(i32::MAX)),
            complete: false,
        };
        let mut in_prologue = true;

        for &inst in f.block_instructions(block) {
            if in_prologue {
                if let Some((variable, value)) = match_stloc(f, inst) {
                    if context.eval(f, value) == SymbolicValue::State(0) {
                        context.add_state_variable(variable);
                        continue;
                    }
                }
                in_prologue = false;
            }

            if let Some(target) = match_branch(f, inst) {
                let states = std::mem::take(&mut dispatch.remaining);
                dispatch.push_arm(target, states);
                dispatch.complete = true;
                break;
            }

            let Some((condition, true_inst, false_inst)) = match_if(f, inst) else {
                break;
            };
            let Some(target) = match_branch(f, unwrap_single(f, true_inst)) else {
                break;
            };
            if !is_empty_body(f, false_inst) {
                break;
            }
            let SymbolicValue::StateInSet(taken) = context.eval(f, condition).as_bool() else {
                log::trace!("dispatch in {:?} stops at unrecognized condition", block);
                break;
            };
            let states = dispatch.remaining.intersect(&taken);
            dispatch.remaining = dispatch.remaining.except(&taken);
            dispatch.push_arm(target, states);
        }
        dispatch
    }

    fn push_arm(&mut self, target: InstrId, states: LongSet) {
        if states.is_empty() {
            return;
        }
        self.arms.push(DispatchArm { target, states });
    }

    /// The block a given state value branches to, if the analysis determined it.
    #[must_use]
    pub fn target_of(&self, state: i64) -> Option<InstrId> {
        self.arms
            .iter()
            .find(|arm| arm.states.contains(state))
            .map(|arm| arm.target)
    }

    /// All states that reach `target` through any arm.
    #[must_use]
    pub fn states_for(&self, target: InstrId) -> LongSet {
        self.arms
            .iter()
            .filter(|arm| arm.target == target)
            .fold(LongSet::empty(), |acc, arm| acc.union(&arm.states))
    }
}
