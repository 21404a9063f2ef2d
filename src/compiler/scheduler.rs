//! Pass scheduler for orchestrating transform execution on one function.
//!
//! The `PassScheduler` runs transforms in three stages:
//!
//! 1. **Prepare**: function-wide analyses that later stages rely on
//!    (dead initializer removal, so single definitions are visible)
//! 2. **Blocks**: the block transform engine, re-run while transforms request it
//! 3. **Cleanup**: dead store removal and a final initializer pass
//!
//! Stages run once. Only the block stage repeats, and only when a transform
//! asked for it through [`TransformContext::request_rerun`], bounded by
//! [`DecompilerSettings::max_reruns`].

use crate::{
    compiler::{
        passes::{
            BlockMerging, ConditionDetection, ExpressionTransforms, InliningTransform,
            LoopDetection, RemoveDeadStores, RemoveDeadVariableInit, StateDispatchSwitch,
            TransformAssignment, UsingTransform,
        },
        BlockTransformEngine, DecompilerSettings, EventKind, FunctionTransform,
        StatementTransformEngine, TransformContext,
    },
    il::Function,
    Result,
};

/// Orchestrates transform execution in a staged pipeline.
pub struct PassScheduler {
    /// Maximum extra runs of the block stage.
    max_reruns: usize,
    /// Stage 1: preparation.
    pub prepare: Vec<Box<dyn FunctionTransform>>,
    /// Stage 2: block transforms, re-run on request.
    pub blocks: Vec<Box<dyn FunctionTransform>>,
    /// Stage 3: cleanup.
    pub cleanup: Vec<Box<dyn FunctionTransform>>,
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new(DecompilerSettings::default().max_reruns)
    }
}

impl PassScheduler {
    /// Creates an empty scheduler.
    ///
    /// # Arguments
    ///
    /// * `max_reruns` - Maximum extra runs of the block stage.
    #[must_use]
    pub fn new(max_reruns: usize) -> Self {
        Self {
            max_reruns,
            prepare: Vec::new(),
            blocks: Vec::new(),
            cleanup: Vec::new(),
        }
    }

    /// Creates the standard pipeline.
    ///
    /// Every transform is registered; the settings are consulted again at run
    /// time, so a disabled feature only makes its transform report no match.
    #[must_use]
    pub fn standard(settings: &DecompilerSettings) -> Self {
        let statements = StatementTransformEngine::new()
            .with(InliningTransform::new())
            .with(ExpressionTransforms::new())
            .with(TransformAssignment::new());
        let engine = BlockTransformEngine::new("blocks")
            .pre_order(LoopDetection::new())
            .post_order(StateDispatchSwitch::new())
            .post_order(ConditionDetection::new())
            .post_order(BlockMerging::new())
            .post_order(statements)
            .post_order(UsingTransform::new());

        let mut scheduler = Self::new(settings.max_reruns);
        scheduler.prepare.push(Box::new(RemoveDeadVariableInit::new()));
        scheduler.blocks.push(Box::new(engine));
        scheduler.cleanup.push(Box::new(RemoveDeadStores::new()));
        scheduler.cleanup.push(Box::new(RemoveDeadVariableInit::new()));
        scheduler
    }

    /// Maximum extra runs of the block stage.
    #[must_use]
    pub fn max_reruns(&self) -> usize {
        self.max_reruns
    }

    /// Runs all passes of a stage once.
    ///
    /// Returns `true` if any pass made changes.
    fn run_stage(
        name: &str,
        passes: &[Box<dyn FunctionTransform>],
        f: &mut Function,
        ctx: &TransformContext<'_>,
    ) -> Result<bool> {
        if passes.is_empty() {
            return Ok(false);
        }
        ctx.record(EventKind::StageStarted, name, 0)
            .message(format!("{} passes", passes.len()));

        let mut changed = false;
        for pass in passes {
            ctx.check_cancelled()?;
            if pass.run(f, ctx)? {
                log::debug!("{}/{} changed {}", name, pass.name(), f.name());
                changed = true;
            }
        }

        ctx.record(EventKind::StageCompleted, name, 0)
            .message(if changed { "changed" } else { "unchanged" });
        Ok(changed)
    }

    /// Runs the complete pipeline on `f`.
    ///
    /// # Returns
    ///
    /// The number of times the block stage ran.
    ///
    /// # Errors
    ///
    /// Returns the first transform failure, or [`crate::Error::Cancelled`].
    pub fn run(&self, f: &mut Function, ctx: &TransformContext<'_>) -> Result<usize> {
        Self::run_stage("prepare", &self.prepare, f, ctx)?;

        let mut runs = 0;
        // A request left over from the prepare stage has nothing to re-run.
        ctx.take_rerun();
        loop {
            runs += 1;
            Self::run_stage("blocks", &self.blocks, f, ctx)?;
            if !ctx.take_rerun() {
                break;
            }
            if runs > self.max_reruns {
                log::warn!(
                    "{}: re-run limit of {} reached, stopping",
                    f.name(),
                    self.max_reruns
                );
                ctx.events
                    .record(EventKind::Warning)
                    .function(ctx.function_name())
                    .message(format!("re-run limit of {} reached", self.max_reruns));
                break;
            }
            ctx.record(EventKind::RerunRequested, "blocks", 0)
                .message(format!("run {}", runs + 1));
        }

        Self::run_stage("cleanup", &self.cleanup, f, ctx)?;
        Ok(runs)
    }
}
