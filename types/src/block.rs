use crate::{Hasher, Round};
use codec::{Decode, Encode};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// The coordinates of a block within the lattice: the chain it extends, its
/// height on that chain, and the round whose configuration governs it.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Encode, Decode)]
pub struct Position {
    pub chain_id: u32,
    pub height: u64,
    pub round: Round,
}

impl Position {
    pub fn new(chain_id: u32, height: u64, round: Round) -> Self {
        Position {
            chain_id,
            height,
            round,
        }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "(#{} by {} in round {})", self.height, self.chain_id, self.round)
    }
}

/// A block as seen by the ordering engine. Signatures and payload are
/// validated upstream; only the hash, the position and the ack list matter
/// here, the rest is carried through.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Encode, Decode)]
pub struct Block<H: Hasher> {
    pub hash: H::Hash,
    pub parent_hash: H::Hash,
    pub proposer_id: H::Hash,
    pub position: Position,
    /// Hashes of the blocks this block references, sorted ascending.
    pub acks: Vec<H::Hash>,
}

impl<H: Hasher> Block<H> {
    pub fn height(&self) -> u64 {
        self.position.height
    }

    pub fn round(&self) -> Round {
        self.position.round
    }
}
