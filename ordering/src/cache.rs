use crate::{
    candidate::{ChainSet, HeightRecord, WinRecord},
    Hasher, INFINITY,
};
use std::collections::HashSet;

/// Pools of fixed-width buffers sized to the current chain count, so that
/// steady-state block processing does not allocate. On a chain-count change
/// the width-dependent pools are discarded rather than reshaped.
pub(crate) struct ObjectCache<H: Hasher> {
    height_records: Vec<Vec<HeightRecord>>,
    height_vectors: Vec<Vec<u64>>,
    chain_sets: Vec<ChainSet>,
    win_records: Vec<WinRecord>,
    ack_sets: Vec<HashSet<H::Hash>>,
    num_chains: u32,
}

impl<H: Hasher> ObjectCache<H> {
    pub(crate) fn new(num_chains: u32) -> Self {
        ObjectCache {
            height_records: Vec::new(),
            height_vectors: Vec::new(),
            chain_sets: Vec::new(),
            win_records: Vec::new(),
            ack_sets: Vec::new(),
            num_chains,
        }
    }

    pub(crate) fn num_chains(&self) -> u32 {
        self.num_chains
    }

    /// Drop all width-dependent pools and start pooling for the new width.
    pub(crate) fn resize(&mut self, num_chains: u32) {
        if num_chains == self.num_chains {
            return;
        }
        self.num_chains = num_chains;
        self.height_records.clear();
        self.height_vectors.clear();
        self.chain_sets.clear();
        self.win_records.clear();
    }

    pub(crate) fn request_height_records(&mut self) -> Vec<HeightRecord> {
        self.height_records.pop().unwrap_or_else(|| {
            let mut records = Vec::with_capacity(self.num_chains as usize);
            records.resize_with(self.num_chains as usize, HeightRecord::default);
            records
        })
    }

    pub(crate) fn recycle_height_records(&mut self, mut records: Vec<HeightRecord>) {
        for record in &mut records {
            record.reset();
        }
        self.height_records.push(records);
    }

    pub(crate) fn request_height_vector(&mut self) -> Vec<u64> {
        self.height_vectors
            .pop()
            .unwrap_or_else(|| vec![INFINITY; self.num_chains as usize])
    }

    pub(crate) fn recycle_height_vector(&mut self, mut vector: Vec<u64>) {
        for entry in &mut vector {
            *entry = INFINITY;
        }
        self.height_vectors.push(vector);
    }

    pub(crate) fn request_chain_set(&mut self) -> ChainSet {
        self.chain_sets
            .pop()
            .unwrap_or_else(|| ChainSet::with_chains(self.num_chains))
    }

    pub(crate) fn recycle_chain_set(&mut self, mut set: ChainSet) {
        set.reset();
        self.chain_sets.push(set);
    }

    pub(crate) fn request_win_record(&mut self) -> WinRecord {
        self.win_records
            .pop()
            .unwrap_or_else(|| WinRecord::with_chains(self.num_chains))
    }

    pub(crate) fn recycle_win_record(&mut self, mut record: WinRecord) {
        record.reset();
        self.win_records.push(record);
    }

    pub(crate) fn request_ack_set(&mut self) -> HashSet<H::Hash> {
        self.ack_sets.pop().unwrap_or_default()
    }

    pub(crate) fn recycle_ack_set(&mut self, mut set: HashSet<H::Hash>) {
        set.clear();
        self.ack_sets.push(set);
    }
}
