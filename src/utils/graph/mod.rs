//! Generic directed graph infrastructure.
//!
//! The control-flow graph of a block container is a small, index-addressed
//! graph whose nodes are numbered in reverse post-order. This module provides
//! the pieces needed to build it and to compute its dominator tree:
//!
//! - [`NodeId`] - Strongly typed node index
//! - [`GraphBase`], [`Successors`], [`Predecessors`] - Traits the algorithms are written against
//! - [`DirectedGraph`] - Adjacency-list graph with per-node payload
//! - [`algorithms`] - Traversal orders and the dominator tree
//!
//! # Architecture
//!
//! Algorithms take `&impl Successors` (and `Predecessors` where needed) rather
//! than a concrete graph type, so tests can run them on hand-built graphs
//! without going through the instruction tree.

pub mod algorithms;
mod directed;
mod node;
mod traits;

pub use algorithms::{compute_dominators, postorder, reverse_postorder, DominatorTree};
pub use directed::DirectedGraph;
pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, Successors};
