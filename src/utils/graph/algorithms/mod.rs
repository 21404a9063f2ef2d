//! Graph algorithms used by control-flow analysis.

mod dominators;
mod traversal;

pub use dominators::{compute_dominators, DominatorTree};
pub use traversal::{postorder, reverse_postorder};
