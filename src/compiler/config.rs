//! Settings controlling which transforms the pipeline runs.

/// Configuration for the decompiler pipeline.
///
/// Every transform consults these settings through its
/// [`crate::compiler::TransformContext`]; a disabled feature makes the
/// corresponding transform report no match.
#[derive(Debug, Clone)]
pub struct DecompilerSettings {
    /// Recover `using` statements from try/finally (default: true).
    pub using_statement: bool,

    /// Fold stores into their uses as inline assignments (default: true).
    pub inline_assignment: bool,

    /// Synthesize compound assignments such as `x += v` (default: true).
    pub compound_assignment: bool,

    /// Recover `x++`/`x--` from their expanded forms (default: true).
    pub post_increment: bool,

    /// Inline single-use stack slots into their use (default: true).
    pub inlining: bool,

    /// Remove stores to variables that are never read (default: true).
    pub remove_dead_stores: bool,

    /// Drop initial values that are always overwritten before use (default: true).
    pub remove_dead_initializers: bool,

    /// Wrap natural loops in loop containers (default: true).
    pub loop_detection: bool,

    /// Turn compiler state-machine dispatch chains into `switch` (default: true).
    pub state_dispatch: bool,

    /// Maximum number of extra runs of the block stage when transforms
    /// request one (default: 8).
    pub max_reruns: usize,

    /// Decompile multiple functions in parallel (default: true).
    pub parallel: bool,
}

impl Default for DecompilerSettings {
    fn default() -> Self {
        Self {
            using_statement: true,
            inline_assignment: true,
            compound_assignment: true,
            post_increment: true,
            inlining: true,
            remove_dead_stores: true,
            remove_dead_initializers: true,
            loop_detection: true,
            state_dispatch: true,
            max_reruns: 8,
            parallel: true,
        }
    }
}

impl DecompilerSettings {
    /// Creates settings with every transform enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates settings with every transform disabled.
    ///
    /// The pipeline then only builds the statement tree from the raw
    /// instruction tree, which is useful to inspect reader output.
    #[must_use]
    pub fn raw() -> Self {
        Self {
            using_statement: false,
            inline_assignment: false,
            compound_assignment: false,
            post_increment: false,
            inlining: false,
            remove_dead_stores: false,
            remove_dead_initializers: false,
            loop_detection: false,
            state_dispatch: false,
            max_reruns: 0,
            ..Self::default()
        }
    }

    /// Enables or disables using-statement recovery.
    #[must_use]
    pub fn with_using_statement(mut self, enable: bool) -> Self {
        self.using_statement = enable;
        self
    }

    /// Enables or disables inline assignments.
    #[must_use]
    pub fn with_inline_assignment(mut self, enable: bool) -> Self {
        self.inline_assignment = enable;
        self
    }

    /// Enables or disables compound assignments.
    #[must_use]
    pub fn with_compound_assignment(mut self, enable: bool) -> Self {
        self.compound_assignment = enable;
        self
    }

    /// Enables or disables post-increment recovery.
    #[must_use]
    pub fn with_post_increment(mut self, enable: bool) -> Self {
        self.post_increment = enable;
        self
    }

    /// Enables or disables stack slot inlining.
    #[must_use]
    pub fn with_inlining(mut self, enable: bool) -> Self {
        self.inlining = enable;
        self
    }

    /// Enables or disables dead store removal.
    #[must_use]
    pub fn with_remove_dead_stores(mut self, enable: bool) -> Self {
        self.remove_dead_stores = enable;
        self
    }

    /// Enables or disables dead initializer removal.
    #[must_use]
    pub fn with_remove_dead_initializers(mut self, enable: bool) -> Self {
        self.remove_dead_initializers = enable;
        self
    }

    /// Enables or disables loop detection.
    #[must_use]
    pub fn with_loop_detection(mut self, enable: bool) -> Self {
        self.loop_detection = enable;
        self
    }

    /// Enables or disables state dispatch recovery.
    #[must_use]
    pub fn with_state_dispatch(mut self, enable: bool) -> Self {
        self.state_dispatch = enable;
        self
    }

    /// Sets the maximum number of block stage re-runs.
    ///
    /// # Arguments
    ///
    /// * `max` - Extra runs allowed after the first; `0` disables re-runs.
    ///
    /// # Returns
    ///
    /// The modified settings (builder pattern).
    #[must_use]
    pub fn with_max_reruns(mut self, max: usize) -> Self {
        self.max_reruns = max;
        self
    }

    /// Enables or disables parallel decompilation of multiple functions.
    #[must_use]
    pub fn with_parallel(mut self, enable: bool) -> Self {
        self.parallel = enable;
        self
    }

    /// Returns true if any instruction-tree transform is enabled.
    #[must_use]
    pub fn any_transform_enabled(&self) -> bool {
        self.using_statement
            || self.inline_assignment
            || self.compound_assignment
            || self.post_increment
            || self.inlining
            || self.remove_dead_stores
            || self.remove_dead_initializers
            || self.loop_detection
            || self.state_dispatch
    }
}
