//! Built-in transforms.
//!
//! - Statement transforms: [`InliningTransform`], [`ExpressionTransforms`],
//!   [`TransformAssignment`]
//! - Block transforms: [`LoopDetection`], [`StateDispatchSwitch`], [`ConditionDetection`],
//!   [`BlockMerging`], [`UsingTransform`]
//! - Function transforms: [`RemoveDeadVariableInit`], [`RemoveDeadStores`]

mod assignment;
mod controlflow;
mod deadcode;
mod dispatch;
mod expressions;
mod inlining;
mod loops;
mod using;
pub mod utils;

pub use assignment::TransformAssignment;
pub use controlflow::{BlockMerging, ConditionDetection};
pub use deadcode::{RemoveDeadStores, RemoveDeadVariableInit};
pub use dispatch::StateDispatchSwitch;
pub use expressions::ExpressionTransforms;
pub use inlining::InliningTransform;
pub use loops::LoopDetection;
pub use using::UsingTransform;
