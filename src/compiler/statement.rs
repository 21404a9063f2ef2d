//! Position-wise execution of statement transforms.

use crate::{
    compiler::{BlockContext, BlockTransform, StatementTransform, TransformContext},
    il::{Function, InstrId},
    Result,
};

/// Upper bound on transform applications per block statement, guarding
/// against two transforms undoing each other forever.
const MAX_STEPS_PER_STATEMENT: usize = 64;

/// Runs [`StatementTransform`]s over every position of a block.
///
/// Positions are scanned from the last statement to the first. At each
/// position the transforms are tried in registration order; when one reports
/// a change, all transforms are tried again at the same position (clamped to
/// the new block length), because the rewritten statement may now match an
/// earlier transform. Scanning backwards means a statement is only examined
/// after everything following it has been simplified, which is what inlining
/// into the next statement needs.
pub struct StatementTransformEngine {
    transforms: Vec<Box<dyn StatementTransform>>,
}

impl Default for StatementTransformEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementTransformEngine {
    /// Creates an engine without transforms.
    #[must_use]
    pub fn new() -> Self {
        StatementTransformEngine {
            transforms: Vec::new(),
        }
    }

    /// Appends a transform.
    #[must_use]
    pub fn with(mut self, transform: impl StatementTransform + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    /// Names of the registered transforms, in order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.transforms.iter().map(|t| t.name())
    }

    /// Runs all transforms over `block`.
    ///
    /// # Errors
    ///
    /// Propagates transform failures and cancellation.
    pub fn run_block(
        &self,
        f: &mut Function,
        block: InstrId,
        ctx: &TransformContext<'_>,
    ) -> Result<bool> {
        let mut changed = false;
        let mut pos = f.block_instructions(block).len();
        let mut budget = (pos + 1) * MAX_STEPS_PER_STATEMENT;

        while pos > 0 {
            pos -= 1;
            ctx.check_cancelled()?;

            let mut index = 0;
            while index < self.transforms.len() {
                let len = f.block_instructions(block).len();
                if len == 0 {
                    return Ok(changed);
                }
                pos = pos.min(len - 1);

                let transform = &self.transforms[index];
                if !transform.run(f, block, pos, ctx)? {
                    index += 1;
                    continue;
                }
                changed = true;
                log::trace!("{} applied at {:?}[{}]", transform.name(), block, pos);

                budget = budget.saturating_sub(1);
                if budget == 0 {
                    log::warn!(
                        "statement transforms in {} did not settle on block {:?}",
                        f.name(),
                        block
                    );
                    return Ok(changed);
                }
                index = 0;
            }
        }
        Ok(changed)
    }
}

impl BlockTransform for StatementTransformEngine {
    fn name(&self) -> &'static str {
        "statement-transforms"
    }

    fn run(
        &self,
        f: &mut Function,
        block: InstrId,
        ctx: &TransformContext<'_>,
        _block_ctx: BlockContext<'_>,
    ) -> Result<bool> {
        self.run_block(f, block, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::{DecompilerSettings, EventLog},
        il::InstructionKind,
        typesystem::{SimpleTypeSystem, Type},
        utils::CancellationToken,
    };

    /// Removes `nop` statements one at a time.
    struct DropNop;

    impl StatementTransform for DropNop {
        fn name(&self) -> &'static str {
            "drop-nop"
        }

        fn run(
            &self,
            f: &mut Function,
            block: InstrId,
            pos: usize,
            _ctx: &TransformContext<'_>,
        ) -> Result<bool> {
            let inst = f.block_instructions(block)[pos];
            if matches!(f.kind(inst), InstructionKind::Nop) {
                f.remove_instruction(block, pos)?;
                return Ok(true);
            }
            Ok(false)
        }
    }

    /// Never settles: flips an `ldc.i4` between 0 and 1.
    struct Flip;

    impl StatementTransform for Flip {
        fn name(&self) -> &'static str {
            "flip"
        }

        fn run(
            &self,
            f: &mut Function,
            block: InstrId,
            pos: usize,
            _ctx: &TransformContext<'_>,
        ) -> Result<bool> {
            let inst = f.block_instructions(block)[pos];
            let InstructionKind::LdcI4(value) = f.kind(inst) else {
                return Ok(false);
            };
            let flipped = f.create(InstructionKind::LdcI4(1 - *value));
            f.set_instruction(block, pos, flipped)?;
            Ok(true)
        }
    }

    fn block_of(kinds: Vec<InstructionKind>) -> (Function, InstrId) {
        let mut f = Function::new("m", Type::Void);
        let block = f.create_block();
        let body = f.body();
        f.add_block(body, block).unwrap();
        for kind in kinds {
            let inst = f.create(kind);
            f.push_instruction(block, inst).unwrap();
        }
        (f, block)
    }

    fn run(engine: &StatementTransformEngine, f: &mut Function, block: InstrId) -> bool {
        let ts = SimpleTypeSystem::new();
        let settings = DecompilerSettings::default();
        let events = EventLog::new();
        let cancel = CancellationToken::new();
        let ctx = TransformContext::new("m", &ts, &settings, &events, &cancel);
        engine.run_block(f, block, &ctx).unwrap()
    }

    #[test]
    fn test_removal_clamps_position() {
        let (mut f, block) = block_of(vec![
            InstructionKind::LdcI4(1),
            InstructionKind::Nop,
            InstructionKind::Nop,
        ]);
        let engine = StatementTransformEngine::new().with(DropNop);
        assert!(run(&engine, &mut f, block));
        assert_eq!(f.block_instructions(block).len(), 1);
    }

    #[test]
    fn test_no_match_reports_unchanged() {
        let (mut f, block) = block_of(vec![InstructionKind::LdcI4(1)]);
        let engine = StatementTransformEngine::new().with(DropNop);
        assert!(!run(&engine, &mut f, block));
    }

    #[test]
    fn test_oscillating_transform_is_bounded() {
        let (mut f, block) = block_of(vec![InstructionKind::LdcI4(0)]);
        let engine = StatementTransformEngine::new().with(Flip);
        assert!(run(&engine, &mut f, block));
    }
}
