//! Shared building blocks: bit sets, interval sets, graphs and cancellation.

mod bitset;
pub mod graph;
mod longset;
mod synchronization;

pub use bitset::BitSet;
pub use longset::{LongInterval, LongSet};
pub use synchronization::CancellationToken;
