//! Shared vocabulary for the block-lattice total ordering engine: block and
//! position types, per-chain containers, and the hasher abstraction.

use codec::Codec;
use std::{fmt::Debug, hash::Hash as StdHash};

mod block;
mod chains;

pub use block::{Block, Position};
pub use chains::{ChainCount, ChainIndex, ChainMap};

/// A hasher, used for creating identifiers for blocks.
pub trait Hasher: Eq + Clone + Send + Sync + Debug + 'static {
    /// A hash, as an identifier for a block.
    type Hash: AsRef<[u8]> + Eq + Ord + Copy + Clone + Send + Sync + Debug + StdHash + Codec;

    fn hash(s: &[u8]) -> Self::Hash;
}

/// The number of a round for which one configuration of the lattice is in force.
pub type Round = u64;
