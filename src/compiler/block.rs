//! Dominator-ordered execution of block transforms.
//!
//! For every container of a function the engine builds a
//! [`ControlFlowGraph`] and walks its dominator tree once. At each node it
//! runs the pre-order transforms, then descends into the dominated children,
//! then runs the post-order transforms:
//!
//! ```text
//! visit(B):
//!     pre(B)
//!     for C in dominator_children(B): visit(C)
//!     post(B)
//! ```
//!
//! Containers are processed innermost first, so a nested region (a finally
//! handler, a loop body) is in final form before the blocks around it are
//! examined. The graph is a snapshot of the container before the walk started;
//! blocks that a transform detached or moved are skipped when their turn comes.

use crate::{
    analysis::ControlFlowGraph,
    compiler::{BlockContext, BlockTransform, FunctionTransform, TransformContext},
    il::{Function, InstrId, InstructionKind},
    utils::graph::NodeId,
    Result,
};

/// Runs ordered lists of [`BlockTransform`]s over every block of a function.
#[derive(Default)]
pub struct BlockTransformEngine {
    name: &'static str,
    pre_order: Vec<Box<dyn BlockTransform>>,
    post_order: Vec<Box<dyn BlockTransform>>,
}

impl BlockTransformEngine {
    /// Creates an engine without transforms.
    ///
    /// # Arguments
    ///
    /// * `name` - Stage name used in events.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        BlockTransformEngine {
            name,
            pre_order: Vec::new(),
            post_order: Vec::new(),
        }
    }

    /// Appends a transform that runs before the block's dominated children.
    #[must_use]
    pub fn pre_order(mut self, transform: impl BlockTransform + 'static) -> Self {
        self.pre_order.push(Box::new(transform));
        self
    }

    /// Appends a transform that runs after the block's dominated children.
    #[must_use]
    pub fn post_order(mut self, transform: impl BlockTransform + 'static) -> Self {
        self.post_order.push(Box::new(transform));
        self
    }

    /// Number of registered transforms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pre_order.len() + self.post_order.len()
    }

    /// Returns `true` if no transforms are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the transforms over the blocks of one container.
    ///
    /// # Arguments
    ///
    /// * `f` - The function owning `container`.
    /// * `container` - A connected block container.
    /// * `ctx` - Shared pipeline context.
    ///
    /// # Returns
    ///
    /// `true` if any transform changed the tree.
    ///
    /// # Errors
    ///
    /// Returns graph construction failures, transform failures and cancellation.
    pub fn run_on_container(
        &self,
        f: &mut Function,
        container: InstrId,
        ctx: &TransformContext<'_>,
    ) -> Result<bool> {
        let cfg = ControlFlowGraph::build(f, container, ctx.cancel)?;
        let mut changed = false;

        // Iterative walk; deep dominator chains must not exhaust the stack.
        let mut stack: Vec<(NodeId, bool)> = vec![(cfg.entry(), false)];
        while let Some((node, children_done)) = stack.pop() {
            ctx.check_cancelled()?;
            let block = cfg.block(node);
            let live = f.is_connected(block) && f.parent(block) == Some(container);
            let block_ctx = BlockContext { cfg: &cfg, node };

            if children_done {
                if live {
                    for transform in &self.post_order {
                        changed |= self.apply(&**transform, f, block, ctx, block_ctx)?;
                    }
                }
                continue;
            }

            if live {
                for transform in &self.pre_order {
                    changed |= self.apply(&**transform, f, block, ctx, block_ctx)?;
                }
            }
            stack.push((node, true));
            for &child in cfg.dominator_children(node).iter().rev() {
                stack.push((child, false));
            }
        }
        Ok(changed)
    }

    fn apply(
        &self,
        transform: &dyn BlockTransform,
        f: &mut Function,
        block: InstrId,
        ctx: &TransformContext<'_>,
        block_ctx: BlockContext<'_>,
    ) -> Result<bool> {
        // An earlier transform on this block may have detached it.
        if !f.is_connected(block) {
            return Ok(false);
        }
        let changed = transform.run(f, block, ctx, block_ctx)?;
        if changed {
            log::trace!(
                "{}/{} changed block {:?} in {}",
                self.name,
                transform.name(),
                block,
                f.name()
            );
        }
        Ok(changed)
    }
}

impl FunctionTransform for BlockTransformEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&self, f: &mut Function, ctx: &TransformContext<'_>) -> Result<bool> {
        let containers: Vec<InstrId> = f
            .descendants_postorder(f.body())
            .into_iter()
            .filter(|&id| matches!(f.kind(id), InstructionKind::BlockContainer { .. }))
            .collect();

        let mut changed = false;
        for container in containers {
            if !f.is_connected(container) || f.container_blocks(container).is_empty() {
                continue;
            }
            changed |= self.run_on_container(f, container, ctx)?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        compiler::{DecompilerSettings, EventLog},
        typesystem::{SimpleTypeSystem, Type},
        utils::CancellationToken,
    };

    /// Records `(tag, label)` for every visited block.
    struct Recorder {
        tag: &'static str,
        visits: &'static Mutex<Vec<(&'static str, u32)>>,
    }

    impl BlockTransform for Recorder {
        fn name(&self) -> &'static str {
            self.tag
        }

        fn run(
            &self,
            f: &mut Function,
            block: InstrId,
            _ctx: &TransformContext<'_>,
            _block_ctx: BlockContext<'_>,
        ) -> Result<bool> {
            let label = f.block_label(block).unwrap_or(u32::MAX);
            self.visits.lock().unwrap().push((self.tag, label));
            Ok(false)
        }
    }

    /// 0 -> {1, 2}; 1 -> 3; 2 -> 3
    fn diamond() -> Function {
        let mut f = Function::new("m", Type::Void);
        let body = f.body();
        let blocks: Vec<InstrId> = (0..4).map(|i| f.create_block_with_label(i)).collect();
        for b in &blocks {
            f.add_block(body, *b).unwrap();
        }
        for (from, to) in [(0, 1), (0, 2), (1, 3), (2, 3)] {
            let br = f.create(InstructionKind::Branch { target: blocks[to] });
            f.push_instruction(blocks[from], br).unwrap();
        }
        f
    }

    #[test]
    fn test_dominator_order() {
        static VISITS: Mutex<Vec<(&'static str, u32)>> = Mutex::new(Vec::new());
        let engine = BlockTransformEngine::new("test")
            .pre_order(Recorder {
                tag: "pre",
                visits: &VISITS,
            })
            .post_order(Recorder {
                tag: "post",
                visits: &VISITS,
            });

        let mut f = diamond();
        let ts = SimpleTypeSystem::new();
        let settings = DecompilerSettings::default();
        let events = EventLog::new();
        let cancel = CancellationToken::new();
        let ctx = TransformContext::new("m", &ts, &settings, &events, &cancel);
        engine.run(&mut f, &ctx).unwrap();

        let visits = VISITS.lock().unwrap().clone();
        let position = |tag: &str, label: u32| {
            visits
                .iter()
                .position(|v| *v == (tag, label))
                .unwrap()
        };
        assert_eq!(visits.len(), 8);
        assert_eq!(visits[0], ("pre", 0));
        assert_eq!(*visits.last().unwrap(), ("post", 0));
        for child in 1..4 {
            assert!(position("pre", 0) < position("pre", child));
            assert!(position("post", child) < position("post", 0));
        }
    }

    #[test]
    fn test_cancelled_engine_stops() {
        let engine = BlockTransformEngine::new("test");
        let mut f = diamond();
        let ts = SimpleTypeSystem::new();
        let settings = DecompilerSettings::default();
        let events = EventLog::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = TransformContext::new("m", &ts, &settings, &events, &cancel);
        assert!(matches!(
            engine.run(&mut f, &ctx),
            Err(crate::Error::Cancelled)
        ));
    }
}
