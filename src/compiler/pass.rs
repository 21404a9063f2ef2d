//! Transform traits.
//!
//! Transforms come in three granularities, matching the places the scheduler
//! invokes them:
//!
//! - [`BlockTransform`]: one block, visited in dominator-tree order by the
//!   [`crate::compiler::BlockTransformEngine`]
//! - [`StatementTransform`]: one position inside a block's instruction list,
//!   driven by the [`crate::compiler::StatementTransformEngine`]
//! - [`FunctionTransform`]: the whole function at once
//!
//! All transforms are stateless with respect to the function they run on and
//! must be `Send + Sync`, so one pipeline instance can serve parallel workers.
//! A pattern that does not match is never an error: transforms report
//! `Ok(false)` and leave the tree untouched.

use crate::{
    compiler::{BlockContext, TransformContext},
    il::{Function, InstrId},
    Result,
};

/// A transform applied to a single block.
pub trait BlockTransform: Send + Sync {
    /// Unique name for logging and event attribution.
    fn name(&self) -> &'static str;

    /// Runs the transform on `block`.
    ///
    /// Returns `true` if the tree was changed.
    ///
    /// # Arguments
    ///
    /// * `f` - The function owning `block`.
    /// * `block` - The block to transform; connected when called.
    /// * `ctx` - Shared pipeline context.
    /// * `block_ctx` - The block's place in the (possibly stale) dominator tree.
    ///
    /// # Errors
    ///
    /// Returns an error on internal consistency failures or cancellation.
    fn run(
        &self,
        f: &mut Function,
        block: InstrId,
        ctx: &TransformContext<'_>,
        block_ctx: BlockContext<'_>,
    ) -> Result<bool>;
}

/// A transform applied at one position of a block's instruction list.
pub trait StatementTransform: Send + Sync {
    /// Unique name for logging and event attribution.
    fn name(&self) -> &'static str;

    /// Tries to rewrite the statement at `pos` of `block`.
    ///
    /// A transform may remove or insert statements around `pos`; the engine
    /// clamps the position before it continues.
    ///
    /// # Arguments
    ///
    /// * `f` - The function owning `block`.
    /// * `block` - The block being scanned.
    /// * `pos` - Index of the current statement.
    /// * `ctx` - Shared pipeline context.
    ///
    /// # Errors
    ///
    /// Returns an error on internal consistency failures.
    fn run(
        &self,
        f: &mut Function,
        block: InstrId,
        pos: usize,
        ctx: &TransformContext<'_>,
    ) -> Result<bool>;
}

/// A transform over the whole function.
pub trait FunctionTransform: Send + Sync {
    /// Unique name for logging and event attribution.
    fn name(&self) -> &'static str;

    /// Runs the transform.
    ///
    /// # Errors
    ///
    /// Returns an error on internal consistency failures or cancellation.
    fn run(&self, f: &mut Function, ctx: &TransformContext<'_>) -> Result<bool>;
}
