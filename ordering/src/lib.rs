//! Implements a total ordering engine for a DAG-based block lattice. Every
//! proposer grows its own chain of blocks, and each block acks a set of
//! earlier blocks by hash, so that all chains together weave a DAG. The
//! engine consumes that DAG in any arrival order respecting the ack relation
//! and converts it into one deterministic sequence of delivery sets: two
//! honest nodes observing the same DAG deliver exactly the same blocks in
//! exactly the same order, no matter how their local networks interleaved the
//! arrivals.
//!
//! Deliverability is decided by a three-graded pairwise comparison between
//! the current candidate of each chain, parameterized per round by the depth
//! `k` and the threshold `phi`. Round configurations are appended through
//! [`TotalOrdering::append_config`] and take over at round boundaries, where
//! the engine flushes the closing round so that no block is stranded by a
//! parameter change.

mod cache;
mod candidate;
mod config;
mod engine;
mod global;
#[cfg(test)]
mod testing;

pub use config::LatticeConfig;
pub use engine::{DeliveryMode, Error, TotalOrdering};
pub use latticeorder_types::{Block, ChainCount, ChainIndex, ChainMap, Hasher, Position, Round};

/// Sentinel entry of an acking height vector: the chain has not acked the
/// candidate deeply enough to matter yet.
pub(crate) const INFINITY: u64 = u64::MAX;
