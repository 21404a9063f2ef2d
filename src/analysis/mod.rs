//! Read-only analyses over the instruction tree.
//!
//! Nothing in this module mutates a [`crate::il::Function`]; transforms in
//! [`crate::compiler`] query these analyses and apply the changes themselves.
//!
//! # Key Components
//!
//! - [`ControlFlowGraph`] - Blocks of one container with their dominator tree
//! - [`SymbolicEvaluationContext`] / [`SymbolicValue`] - Abstract evaluation against a state field
//! - [`StateDispatch`] - Which state values reach which block of a dispatch chain
//! - [`DefiniteAssignment`] - Variables whose initial value is observable
//!
//! # Usage
//!
//! ```rust,ignore
//! use dotlift::analysis::ControlFlowGraph;
//!
//! let cfg = ControlFlowGraph::build(&function, function.body(), &cancel)?;
//! for &child in cfg.dominator_children(cfg.entry()) {
//!     println!("{:?} is dominated by the entry block", cfg.block(child));
//! }
//! ```

mod cfg;
mod definite;
mod dispatch;
mod symbolic;

pub use cfg::ControlFlowGraph;
pub use definite::DefiniteAssignment;
pub use dispatch::{DispatchArm, StateDispatch};
pub use symbolic::{SymbolicEvaluationContext, SymbolicValue};
