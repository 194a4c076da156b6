use crate::{cache::ObjectCache, Hasher, INFINITY};
use std::collections::BTreeSet;

/// Compact summary of which heights of one chain have acked a candidate: the
/// lowest acking height and the length of the consecutive run starting there.
/// Heights arriving above a gap are deferred and absorbed once the gap fills.
/// The covered range never shrinks.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct HeightRecord {
    min_height: u64,
    count: u64,
    deferred: BTreeSet<u64>,
}

impl HeightRecord {
    pub(crate) fn record_ack(&mut self, height: u64) {
        if self.count == 0 {
            self.min_height = height;
            self.count = 1;
            self.absorb();
            return;
        }
        if height >= self.min_height && height < self.min_height + self.count {
            return;
        }
        if height < self.min_height {
            // The run restarts at the new minimum; previously covered heights
            // re-enter through the deferred set.
            for covered in self.min_height..self.min_height + self.count {
                self.deferred.insert(covered);
            }
            self.min_height = height;
            self.count = 1;
        } else if height == self.min_height + self.count {
            self.count += 1;
        } else {
            self.deferred.insert(height);
            return;
        }
        self.absorb();
    }

    fn absorb(&mut self) {
        while self.deferred.remove(&(self.min_height + self.count)) {
            self.count += 1;
        }
    }

    pub(crate) fn min_height(&self) -> u64 {
        self.min_height
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether the consecutive run reaches at least the given height.
    pub(crate) fn covers(&self, height: u64) -> bool {
        self.count != 0 && self.min_height + self.count - 1 >= height
    }

    pub(crate) fn reset(&mut self) {
        self.min_height = 0;
        self.count = 0;
        self.deferred.clear();
    }

    /// Overwrite the record with a single consecutive run. Used for summaries
    /// derived from sources that are consecutive by construction.
    pub(crate) fn set_run(&mut self, min_height: u64, count: u64) {
        self.min_height = min_height;
        self.count = count;
        self.deferred.clear();
    }
}

/// A set of chains as a packed bitmap with a popcount cache.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct ChainSet {
    words: Vec<u64>,
    count: u32,
}

impl ChainSet {
    pub(crate) fn with_chains(num_chains: u32) -> Self {
        ChainSet {
            words: vec![0; (num_chains as usize + 63) / 64],
            count: 0,
        }
    }

    pub(crate) fn set(&mut self, chain: usize, member: bool) {
        let mask = 1u64 << (chain % 64);
        let word = &mut self.words[chain / 64];
        if member && *word & mask == 0 {
            *word |= mask;
            self.count += 1;
        } else if !member && *word & mask != 0 {
            *word &= !mask;
            self.count -= 1;
        }
    }

    pub(crate) fn count(&self) -> u32 {
        self.count
    }

    pub(crate) fn reset(&mut self) {
        for word in &mut self.words {
            *word = 0;
        }
        self.count = 0;
    }
}

/// On which chains one candidate beats another, graded into the three-valued
/// preceding relation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct WinRecord {
    wins: ChainSet,
}

impl WinRecord {
    pub(crate) fn with_chains(num_chains: u32) -> Self {
        WinRecord {
            wins: ChainSet::with_chains(num_chains),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.wins.reset();
    }

    fn set(&mut self, chain: usize, won: bool) {
        self.wins.set(chain, won);
    }

    pub(crate) fn count(&self) -> u32 {
        self.wins.count()
    }

    /// Grade the comparison: 1 when the win count is decisive, -1 when the
    /// other candidate has effectively won, 0 when still undecided. The
    /// undecided band widens by however many chains are missing from the
    /// global ack set.
    pub(crate) fn grade(&self, num_chains: u32, phi: u64, global_ack_set_size: u64) -> i32 {
        let count = u64::from(self.count());
        if count >= phi {
            return 1;
        }
        match phi.checked_sub(u64::from(num_chains) - global_ack_set_size) {
            Some(bound) if count >= bound => -1,
            _ => 0,
        }
    }
}

/// Acking state of one candidate block across all chains: the per-chain
/// height records, the cached acking height vector derived from them, the
/// cached ack set, and the win records against the other candidates.
pub(crate) struct CandidateInfo<H: Hasher> {
    hash: H::Hash,
    acked_status: Vec<HeightRecord>,
    cached_height_vector: Vec<u64>,
    ack_set: ChainSet,
    win_records: Vec<Option<WinRecord>>,
}

impl<H: Hasher> CandidateInfo<H> {
    pub(crate) fn new(hash: H::Hash, cache: &mut ObjectCache<H>) -> Self {
        let num_chains = cache.num_chains() as usize;
        let mut win_records = Vec::with_capacity(num_chains);
        win_records.resize_with(num_chains, || None);
        CandidateInfo {
            hash,
            acked_status: cache.request_height_records(),
            cached_height_vector: cache.request_height_vector(),
            ack_set: cache.request_chain_set(),
            win_records,
        }
    }

    pub(crate) fn hash(&self) -> H::Hash {
        self.hash
    }

    pub(crate) fn record_ack(&mut self, chain: usize, height: u64) {
        self.acked_status[chain].record_ack(height);
    }

    #[cfg(test)]
    pub(crate) fn status(&self, chain: usize) -> &HeightRecord {
        &self.acked_status[chain]
    }

    /// Recompute the cached height vector entries of the dirty chains against
    /// the global vector. A chain maps to its lowest acking height, or to
    /// `INFINITY` when it has not acked the candidate at all or its acks start
    /// more than k heights past the global front.
    pub(crate) fn update_height_vector(
        &mut self,
        global: &[HeightRecord],
        k: u64,
        dirty_chains: &[usize],
    ) {
        for &chain in dirty_chains {
            let local = &self.acked_status[chain];
            let entry = if local.is_empty() || local.min_height() > global[chain].min_height() + k
            {
                INFINITY
            } else {
                local.min_height()
            };
            self.cached_height_vector[chain] = entry;
        }
    }

    /// Recompute the cached ack set over the dirty chains: a chain endorses
    /// the candidate when its consecutive acking run overlaps the k-interval
    /// at the global front.
    pub(crate) fn update_ack_set(&mut self, global: &[HeightRecord], k: u64, dirty_chains: &[usize]) {
        for &chain in dirty_chains {
            let endorsing = self.acked_status[chain].covers(global[chain].min_height() + k);
            self.ack_set.set(chain, endorsing);
        }
    }

    pub(crate) fn ack_set_size(&self) -> u64 {
        u64::from(self.ack_set.count())
    }

    pub(crate) fn height_vector(&self) -> &[u64] {
        &self.cached_height_vector
    }

    /// Refresh the win record against the candidate of `other_chain` over the
    /// dirty chains. A chain is won when this candidate's entry is finite and
    /// strictly below the other's.
    pub(crate) fn update_win_record(
        &mut self,
        other_chain: usize,
        other_height_vector: &[u64],
        dirty_chains: &[usize],
        cache: &mut ObjectCache<H>,
    ) {
        let record = self.win_records[other_chain].get_or_insert_with(|| cache.request_win_record());
        for &chain in dirty_chains {
            let height = self.cached_height_vector[chain];
            record.set(chain, height != INFINITY && other_height_vector[chain] > height);
        }
    }

    pub(crate) fn win_record(&self, other_chain: usize) -> &WinRecord {
        self.win_records[other_chain]
            .as_ref()
            .expect("win records are refreshed before they are read")
    }

    /// Drop the win record against a delivered candidate's chain.
    pub(crate) fn clear_win_record(&mut self, other_chain: usize, cache: &mut ObjectCache<H>) {
        if let Some(record) = self.win_records[other_chain].take() {
            cache.recycle_win_record(record);
        }
    }

    /// Return all owned buffers to the cache.
    pub(crate) fn recycle(self, cache: &mut ObjectCache<H>) {
        let CandidateInfo {
            hash: _,
            acked_status,
            cached_height_vector,
            ack_set,
            win_records,
        } = self;
        cache.recycle_height_records(acked_status);
        cache.recycle_height_vector(cached_height_vector);
        cache.recycle_chain_set(ack_set);
        for record in win_records.into_iter().flatten() {
            cache.recycle_win_record(record);
        }
    }
}
