/// The index of a chain, i.e. of the proposer owning it.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ChainIndex(pub u32);

/// The number of chains in the lattice.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ChainCount(pub u32);

/// A container keeping at most one value per chain.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ChainMap<T>(Vec<Option<T>>);

impl<T> ChainMap<T> {
    /// An empty map over the given number of chains.
    pub fn with_size(count: ChainCount) -> Self {
        let mut slots = Vec::with_capacity(count.0 as usize);
        for _ in 0..count.0 {
            slots.push(None);
        }
        ChainMap(slots)
    }

    pub fn get(&self, chain: ChainIndex) -> Option<&T> {
        self.0.get(chain.0 as usize).and_then(|slot| slot.as_ref())
    }

    pub fn insert(&mut self, chain: ChainIndex, value: T) {
        self.0[chain.0 as usize] = Some(value)
    }

    pub fn remove(&mut self, chain: ChainIndex) -> Option<T> {
        self.0.get_mut(chain.0 as usize).and_then(|slot| slot.take())
    }

    /// The number of chains holding a value.
    pub fn item_count(&self) -> usize {
        self.0.iter().filter(|slot| slot.is_some()).count()
    }
}
