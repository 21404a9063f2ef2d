//! Per-function state shared by all transforms of one pipeline run.

use std::cell::Cell;

use crate::{
    analysis::ControlFlowGraph,
    compiler::{DecompilerSettings, EventBuilder, EventKind, EventLog},
    typesystem::TypeSystem,
    utils::{graph::NodeId, CancellationToken},
    Result,
};

/// Shared context handed to every transform.
///
/// The context is created once per function and lives for the whole pipeline
/// run. It is deliberately not `Sync`: one function is always transformed by a
/// single thread, and the re-run flag is a plain [`Cell`].
pub struct TransformContext<'a> {
    /// Resolution and hierarchy queries.
    pub type_system: &'a dyn TypeSystem,
    /// Enabled transforms and limits.
    pub settings: &'a DecompilerSettings,
    /// Destination for transformation and diagnostic events.
    pub events: &'a EventLog,
    /// Cooperative cancellation.
    pub cancel: &'a CancellationToken,
    function: String,
    rerun: Cell<bool>,
}

impl<'a> TransformContext<'a> {
    /// Creates a context for transforming the function named `function`.
    ///
    /// # Arguments
    ///
    /// * `function` - Name used to attribute recorded events.
    /// * `type_system` - Resolution service.
    /// * `settings` - Enabled transforms.
    /// * `events` - Event destination.
    /// * `cancel` - Cancellation signal polled by long-running loops.
    #[must_use]
    pub fn new(
        function: &str,
        type_system: &'a dyn TypeSystem,
        settings: &'a DecompilerSettings,
        events: &'a EventLog,
        cancel: &'a CancellationToken,
    ) -> Self {
        TransformContext {
            type_system,
            settings,
            events,
            cancel,
            function: function.to_string(),
            rerun: Cell::new(false),
        }
    }

    /// Name of the function being transformed.
    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.function
    }

    /// Asks the scheduler to run the current stage once more.
    ///
    /// Transforms call this when their change may enable matches at positions
    /// the current run has already passed.
    pub fn request_rerun(&self) {
        self.rerun.set(true);
    }

    /// Returns whether a re-run was requested and clears the request.
    pub fn take_rerun(&self) -> bool {
        self.rerun.replace(false)
    }

    /// Returns whether a re-run is pending, without clearing it.
    #[must_use]
    pub fn rerun_requested(&self) -> bool {
        self.rerun.get()
    }

    /// Starts an event attributed to the current function and pass.
    pub fn record(&self, kind: EventKind, pass: &str, offset: u32) -> EventBuilder<'_> {
        self.events
            .record(kind)
            .at(&self.function, offset)
            .pass(pass)
    }

    /// Polls the cancellation token.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Cancelled`] once cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        self.cancel.check()
    }
}

/// Position of a block inside the dominator tree of its container.
///
/// The graph is a snapshot taken when the engine started on the container;
/// blocks added since have no node, and removed blocks keep theirs.
#[derive(Clone, Copy)]
pub struct BlockContext<'g> {
    /// Snapshot of the container's control flow.
    pub cfg: &'g ControlFlowGraph,
    /// The block's node in `cfg`.
    pub node: NodeId,
}
