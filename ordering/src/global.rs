use crate::{candidate::HeightRecord, Hasher};
use std::collections::VecDeque;

/// All pending blocks grouped by chain and sorted by height, together with a
/// candidate-shaped summary of the per-chain fronts. The summary is what each
/// candidate's height vector is clipped against; the queues drive candidate
/// promotion and flushing.
pub(crate) struct GlobalVector<H: Hasher> {
    chains: Vec<VecDeque<H::Hash>>,
    front_heights: Vec<u64>,
    summary: Vec<HeightRecord>,
}

impl<H: Hasher> GlobalVector<H> {
    pub(crate) fn new(num_chains: u32) -> Self {
        let num_chains = num_chains as usize;
        let mut chains = Vec::with_capacity(num_chains);
        chains.resize_with(num_chains, VecDeque::new);
        let mut summary = Vec::with_capacity(num_chains);
        summary.resize_with(num_chains, HeightRecord::default);
        GlobalVector {
            chains,
            front_heights: vec![0; num_chains],
            summary,
        }
    }

    /// Whether a block at the given height extends the chain's pending run.
    /// An empty chain accepts any height: its first block is either genesis
    /// or the resume point of a synced engine.
    pub(crate) fn is_appendable(&self, chain: usize, height: u64) -> bool {
        let queue = &self.chains[chain];
        queue.is_empty() || height == self.front_heights[chain] + queue.len() as u64
    }

    pub(crate) fn append(&mut self, chain: usize, height: u64, hash: H::Hash) {
        if self.chains[chain].is_empty() {
            self.front_heights[chain] = height;
        }
        self.chains[chain].push_back(hash);
    }

    pub(crate) fn front(&self, chain: usize) -> Option<(u64, &H::Hash)> {
        self.chains[chain]
            .front()
            .map(|hash| (self.front_heights[chain], hash))
    }

    /// Remove the front of a chain; delivery always consumes fronts.
    pub(crate) fn pop_front(&mut self, chain: usize) -> Option<H::Hash> {
        let hash = self.chains[chain].pop_front();
        if hash.is_some() {
            self.front_heights[chain] += 1;
        }
        hash
    }

    /// Pending blocks of a chain with their heights, front first.
    pub(crate) fn blocks(&self, chain: usize) -> impl Iterator<Item = (u64, &H::Hash)> {
        let front_height = self.front_heights[chain];
        self.chains[chain]
            .iter()
            .enumerate()
            .map(move |(offset, hash)| (front_height + offset as u64, hash))
    }

    pub(crate) fn num_chains(&self) -> usize {
        self.chains.len()
    }

    /// Refresh the summary entries of the dirty chains. Pending heights are
    /// consecutive per chain, so each entry is a single run at the front.
    pub(crate) fn update_summary(&mut self, dirty_chains: &[usize]) {
        for &chain in dirty_chains {
            self.summary[chain].set_run(self.front_heights[chain], self.chains[chain].len() as u64);
        }
    }

    pub(crate) fn summary(&self) -> &[HeightRecord] {
        &self.summary
    }

    /// The number of chains whose pending run is deep enough to matter under
    /// the given k, i.e. the global ack set size.
    pub(crate) fn ack_set_size(&self, k: u64) -> u64 {
        self.summary.iter().filter(|record| record.count() > k).count() as u64
    }

    /// Reshape for a new chain count at a round switch. Chains dropped by the
    /// new configuration must have been drained beforehand.
    pub(crate) fn resize(&mut self, num_chains: u32) {
        let num_chains = num_chains as usize;
        for queue in self.chains.iter().skip(num_chains) {
            assert!(queue.is_empty(), "dropped chains are drained before a round switch");
        }
        self.chains.resize_with(num_chains, VecDeque::new);
        self.front_heights.resize(num_chains, 0);
        self.summary.resize_with(num_chains, HeightRecord::default);
    }
}
