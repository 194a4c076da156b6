use latticeorder_types::Hasher;
use std::{collections::hash_map::DefaultHasher, hash::Hasher as StdHasher};

/// Test hasher producing 16-byte identifiers by running the standard
/// library's hasher once per salted half. Not cryptographic, but wide enough
/// that test lattices never collide.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Hasher128;

impl Hasher for Hasher128 {
    type Hash = [u8; 16];

    fn hash(x: &[u8]) -> Self::Hash {
        let mut output = [0; 16];
        for (salt, half) in output.chunks_exact_mut(8).enumerate() {
            let mut hasher = DefaultHasher::new();
            hasher.write_u8(salt as u8);
            hasher.write(x);
            half.copy_from_slice(&hasher.finish().to_le_bytes());
        }
        output
    }
}

pub type Hash128 = <Hasher128 as Hasher>::Hash;
