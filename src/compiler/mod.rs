//! Transform infrastructure for rebuilding structured code from the IL tree.
//!
//! This module provides the middle layer between analysis and AST construction:
//!
//! - [`crate::analysis`] - CFG, dominators, definite assignment
//! - [`compiler`](self) - Transforms rewriting the instruction tree in place
//! - [`crate::ast`] - Statement tree and sequence points
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Transform Pipeline                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  TransformContext            Per-function shared state           │
//! │    ├─ TypeSystem              (resolution, disposal queries)     │
//! │    ├─ DecompilerSettings      (enabled transforms, limits)       │
//! │    ├─ EventLog                (what changed, where)              │
//! │    └─ re-run flag             (explicit re-run requests)         │
//! │                                                                  │
//! │  PassScheduler               Staged execution                    │
//! │    ├─ Stage 1: Prepare        (dead initializers)                │
//! │    ├─ Stage 2: Blocks         (re-run while requested)           │
//! │    └─ Stage 3: Cleanup        (dead stores, initializers)        │
//! │                                                                  │
//! │  BlockTransformEngine        Dominator-ordered block visits      │
//! │    ├─ ConditionDetection      (if from conditional branches)     │
//! │    ├─ BlockMerging            (single-edge successors)           │
//! │    ├─ StatementTransformEngine                                   │
//! │    │    ├─ InliningTransform                                     │
//! │    │    ├─ ExpressionTransforms                                  │
//! │    │    └─ TransformAssignment                                   │
//! │    └─ UsingTransform          (try/finally to using)             │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod block;
mod config;
mod context;
mod events;
mod pass;
pub mod passes;
mod scheduler;
mod statement;

pub use block::BlockTransformEngine;
pub use config::DecompilerSettings;
pub use context::{BlockContext, TransformContext};
pub use events::{DerivedStats, Event, EventBuilder, EventKind, EventLog};
pub use pass::{BlockTransform, FunctionTransform, StatementTransform};
pub use passes::{
    BlockMerging, ConditionDetection, ExpressionTransforms, InliningTransform, RemoveDeadStores,
    RemoveDeadVariableInit, TransformAssignment, UsingTransform,
};
pub use scheduler::PassScheduler;
pub use statement::StatementTransformEngine;
