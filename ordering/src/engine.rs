use crate::{
    cache::ObjectCache,
    candidate::CandidateInfo,
    config::{LatticeConfig, RoundConfig},
    global::GlobalVector,
    Block, ChainIndex, ChainMap, Hasher, Round,
};
use log::{debug, trace, warn};
use std::{
    collections::{HashMap, HashSet},
    time::SystemTime,
};

const LOG_TARGET: &str = "latticeorder";

/// Which sufficiency condition produced a delivery set.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeliveryMode {
    /// The global ack set covered every chain.
    Normal,
    /// Majority grading allowed progress before every chain contributed.
    Early,
    /// A round boundary forced the remaining blocks of the closing round out.
    Flush,
}

#[derive(Eq, thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Block does not extend the DAG seen so far.")]
    NotValidDag,
    #[error("Rounds must increase one at a time.")]
    RoundNotIncreasing,
    #[error("A block of a future round would have been delivered.")]
    FutureRoundDelivered,
    #[error("Config parameters out of range.")]
    InvalidConfig,
}

/// The total ordering engine. It consumes blocks in any DAG-respecting order
/// and emits deterministic delivery sets: two engines fed the same DAG agree
/// on every set regardless of local arrival order.
///
/// `process_block` is the only mutating entry point; the engine is
/// single-threaded and never blocks on anything.
pub struct TotalOrdering<H: Hasher> {
    /// Every received block that has not been delivered yet.
    pendings: HashMap<H::Hash, Block<H>>,
    /// For every pending block, the pending blocks whose ack closure contains it.
    acked: HashMap<H::Hash, HashSet<H::Hash>>,
    /// Pending blocks grouped by chain, plus the global height summary.
    global: GlobalVector<H>,
    /// Current candidate of each chain, if any.
    candidates: Vec<Option<CandidateInfo<H>>>,
    /// Chain of each current candidate, for reverse lookups.
    candidate_chains: ChainMap<H::Hash>,
    /// Chains currently contributing a candidate, ascending.
    candidate_chain_ids: Vec<usize>,
    /// Chains whose cached candidate state needs recomputing.
    dirty_chains: Vec<usize>,
    /// Configs of consecutive rounds, starting at `first_round`.
    configs: Vec<RoundConfig>,
    first_round: Round,
    current_round: Round,
    /// Highest round seen per chain, for detecting the round boundary.
    latest_rounds: Vec<Option<Round>>,
    /// Blocks of future rounds on chains the current round does not have,
    /// parked until their round starts.
    parked: Vec<Block<H>>,
    cache: ObjectCache<H>,
}

impl<H: Hasher> TotalOrdering<H> {
    pub fn new(
        genesis_time: SystemTime,
        genesis_round: Round,
        config: &LatticeConfig,
    ) -> Result<Self, Error> {
        let round_config = RoundConfig::genesis(genesis_time, genesis_round, config)?;
        let num_chains = round_config.num_chains;
        let mut candidates = Vec::with_capacity(num_chains as usize);
        candidates.resize_with(num_chains as usize, || None);
        Ok(TotalOrdering {
            pendings: HashMap::new(),
            acked: HashMap::new(),
            global: GlobalVector::new(num_chains),
            candidates,
            candidate_chains: ChainMap::with_size(crate::ChainCount(num_chains)),
            candidate_chain_ids: Vec::new(),
            dirty_chains: Vec::new(),
            configs: vec![round_config],
            first_round: genesis_round,
            current_round: genesis_round,
            latest_rounds: vec![None; num_chains as usize],
            parked: Vec::new(),
            cache: ObjectCache::new(num_chains),
        })
    }

    /// Append the configuration for the round directly after the last known
    /// one. Must happen before any block of that round can be delivered.
    pub fn append_config(&mut self, round: Round, config: &LatticeConfig) -> Result<(), Error> {
        let last = self
            .configs
            .last()
            .expect("the genesis config is always present");
        if round != last.round_id + 1 {
            return Err(Error::RoundNotIncreasing);
        }
        let next = last.following(config)?;
        self.configs.push(next);
        Ok(())
    }

    /// Advance to the next round without processing blocks. Used when syncing
    /// from the middle of a delivered stream to skip already-closed rounds.
    ///
    /// Panics if the config for the next round has not been appended.
    pub fn switch_round(&mut self) {
        self.advance_round();
    }

    pub fn current_round(&self) -> Round {
        self.current_round
    }

    /// Ingest one block and run the ordering step. Returns the delivery set
    /// (possibly empty) and the mode that produced it. On error the engine
    /// state is untouched.
    pub fn process_block(
        &mut self,
        block: &Block<H>,
    ) -> Result<(Vec<Block<H>>, DeliveryMode), Error> {
        // Validate against the config of the block's own round when that one
        // is already known, the current one otherwise.
        let config = self
            .config_for(block.round())
            .unwrap_or_else(|| self.current_config());
        if block.position.chain_id >= config.num_chains
            || self.pendings.contains_key(&block.hash)
        {
            return Err(Error::NotValidDag);
        }
        if block.round() < self.current_round {
            return Err(Error::RoundNotIncreasing);
        }
        if block.round() > self.current_round
            && block.position.chain_id >= self.current_config().num_chains
        {
            // The chain only exists under an upcoming config; park the block
            // until its round starts.
            trace!(
                target: LOG_TARGET,
                "Parking block {:?} at {} for a future round.",
                block.hash,
                block.position
            );
            self.parked.push(block.clone());
            return Ok((Vec::new(), DeliveryMode::Normal));
        }
        let chain = block.position.chain_id as usize;
        if !self.global.is_appendable(chain, block.height()) {
            return Err(Error::NotValidDag);
        }
        trace!(
            target: LOG_TARGET,
            "Processing block {:?} at {}.",
            block.hash,
            block.position
        );
        self.register_block(block);
        if self.round_boundary_reached() {
            let mut flushed = Vec::new();
            while self.round_boundary_reached() {
                let (mut blocks, _) = self.flush()?;
                flushed.append(&mut blocks);
            }
            return Ok((flushed, DeliveryMode::Flush));
        }
        self.try_deliver()
    }

    /// The shared ingestion path: grow the ack relation, the pending set and
    /// the global vector, feed the new support to the candidates it reaches,
    /// and promote the block if it is an undominated front.
    fn register_block(&mut self, block: &Block<H>) {
        let chain = block.position.chain_id as usize;
        self.build_ack_relation(block);
        self.pendings.insert(block.hash, block.clone());
        self.global.append(chain, block.height(), block.hash);
        self.mark_dirty(chain);
        for candidate_chain in self.candidate_chain_ids.clone() {
            let candidate_hash = self.candidate(candidate_chain).hash();
            let reaches = self
                .acked
                .get(&candidate_hash)
                .map_or(false, |acking| acking.contains(&block.hash));
            if reaches {
                self.candidates[candidate_chain]
                    .as_mut()
                    .expect("mapped candidates exist")
                    .record_ack(chain, block.height());
            }
        }
        self.try_promote(chain);
        if self.latest_rounds[chain].map_or(true, |latest| latest < block.round()) {
            self.latest_rounds[chain] = Some(block.round());
        }
    }

    fn current_config(&self) -> &RoundConfig {
        self.config_for(self.current_round)
            .expect("the current round always has a config")
    }

    fn config_for(&self, round: Round) -> Option<&RoundConfig> {
        round
            .checked_sub(self.first_round)
            .and_then(|offset| self.configs.get(offset as usize))
    }

    fn candidate(&self, chain: usize) -> &CandidateInfo<H> {
        self.candidates[chain]
            .as_ref()
            .expect("mapped candidates exist")
    }

    /// Register the new block in the ack closure of every pending ancestor,
    /// walking acks depth-first behind a visited set so that malformed cycles
    /// cannot cause a second visit. Acks of unknown hashes are ignored: they
    /// are either history from before a sync point or garbage.
    fn build_ack_relation(&mut self, block: &Block<H>) {
        let mut visited = self.cache.request_ack_set();
        let mut to_walk: Vec<H::Hash> = block.acks.clone();
        visited.insert(block.hash);
        while let Some(ancestor) = to_walk.pop() {
            if !visited.insert(ancestor) {
                continue;
            }
            let ancestor_block = match self.pendings.get(&ancestor) {
                Some(ancestor_block) => ancestor_block,
                None => continue,
            };
            let cache = &mut self.cache;
            self.acked
                .entry(ancestor)
                .or_insert_with(|| cache.request_ack_set())
                .insert(block.hash);
            to_walk.extend(ancestor_block.acks.iter().copied());
        }
        self.cache.recycle_ack_set(visited);
    }

    /// Promote the front of the chain if it is eligible: not yet a candidate,
    /// within the current round, and acking nothing that is still pending.
    /// An ack closing a cycle back onto the block itself does not count.
    fn try_promote(&mut self, chain: usize) {
        if self.candidate_chains.get(ChainIndex(chain as u32)).is_some() {
            return;
        }
        let (height, hash) = match self.global.front(chain) {
            Some((height, hash)) => (height, *hash),
            None => return,
        };
        let block = self
            .pendings
            .get(&hash)
            .expect("chain fronts are pending");
        if block.round() > self.current_round {
            return;
        }
        let descendants = self.acked.get(&hash);
        let dominated = block.acks.iter().any(|ack| {
            *ack != hash
                && self.pendings.contains_key(ack)
                && !descendants.map_or(false, |acking| acking.contains(ack))
        });
        if dominated {
            return;
        }
        trace!(
            target: LOG_TARGET,
            "Promoting block {:?} at height {} to candidate of chain {}.",
            hash,
            height,
            chain
        );
        let mut info = CandidateInfo::new(hash, &mut self.cache);
        info.record_ack(chain, height);
        if let Some(acking) = self.acked.get(&hash) {
            for other_chain in 0..self.global.num_chains() {
                for (other_height, other_hash) in self.global.blocks(other_chain) {
                    if acking.contains(other_hash) {
                        info.record_ack(other_chain, other_height);
                    }
                }
            }
        }
        self.candidates[chain] = Some(info);
        self.candidate_chains.insert(ChainIndex(chain as u32), hash);
        if let Err(position) = self.candidate_chain_ids.binary_search(&chain) {
            self.candidate_chain_ids.insert(position, chain);
        }
        // A fresh candidate needs every cached comparison recomputed.
        self.mark_all_dirty();
    }

    /// Promote eligible fronts on every chain, in ascending chain order.
    fn promote_candidates(&mut self) {
        for chain in 0..self.global.num_chains() {
            self.try_promote(chain);
        }
    }

    fn mark_dirty(&mut self, chain: usize) {
        if !self.dirty_chains.contains(&chain) {
            self.dirty_chains.push(chain);
        }
    }

    fn mark_all_dirty(&mut self) {
        self.dirty_chains.clear();
        self.dirty_chains.extend(0..self.global.num_chains());
    }

    /// Recompute the cached height vectors, ack sets and win records over the
    /// chains that changed since the last delivery decision.
    fn refresh_candidate_state(&mut self) {
        if self.dirty_chains.is_empty() {
            return;
        }
        let mut dirty = std::mem::take(&mut self.dirty_chains);
        dirty.sort_unstable();
        self.global.update_summary(&dirty);
        let k = self.current_config().k;
        for &chain in &self.candidate_chain_ids {
            let info = self.candidates[chain]
                .as_mut()
                .expect("mapped candidates exist");
            info.update_height_vector(self.global.summary(), k, &dirty);
            info.update_ack_set(self.global.summary(), k, &dirty);
        }
        let ids = self.candidate_chain_ids.clone();
        for &chain in &ids {
            for &other_chain in &ids {
                if chain == other_chain {
                    continue;
                }
                let (info, other) =
                    Self::candidate_pair_mut(&mut self.candidates, chain, other_chain);
                info.update_win_record(
                    other_chain,
                    other.height_vector(),
                    &dirty,
                    &mut self.cache,
                );
            }
        }
        dirty.clear();
        self.dirty_chains = dirty;
    }

    fn candidate_pair_mut(
        candidates: &mut [Option<CandidateInfo<H>>],
        chain: usize,
        other_chain: usize,
    ) -> (&mut CandidateInfo<H>, &CandidateInfo<H>) {
        let (low, high) = if chain < other_chain {
            let (low, high) = candidates.split_at_mut(other_chain);
            (&mut low[chain], &high[0])
        } else {
            let (low, high) = candidates.split_at_mut(chain);
            (&mut high[0], &low[other_chain])
        };
        (
            low.as_mut().expect("mapped candidates exist"),
            high.as_ref().expect("mapped candidates exist"),
        )
    }

    fn grade(&self, from: usize, to: usize, global_ack_set_size: u64) -> i32 {
        let config = self.current_config();
        self.candidate(from).win_record(to).grade(
            config.num_chains,
            config.phi,
            global_ack_set_size,
        )
    }

    /// The delivery decision: find the root candidates under the three-grade
    /// preceding relation, check internal stability, and emit every stable
    /// candidate when either the whole lattice is in view (Normal) or the
    /// roots dominate everyone else (Early).
    fn try_deliver(&mut self) -> Result<(Vec<Block<H>>, DeliveryMode), Error> {
        self.refresh_candidate_state();
        if self.candidate_chain_ids.is_empty() {
            return Ok((Vec::new(), DeliveryMode::Normal));
        }
        let config = self.current_config();
        let (phi, num_chains) = (config.phi, config.num_chains);
        let global_ack_set_size = self.global.ack_set_size(config.k);
        let mut roots = Vec::new();
        let mut non_roots = Vec::new();
        for &chain in &self.candidate_chain_ids {
            let preceded = self
                .candidate_chain_ids
                .iter()
                .any(|&other| other != chain && self.grade(other, chain, global_ack_set_size) == 1);
            match preceded {
                true => non_roots.push(chain),
                false => roots.push(chain),
            }
        }
        if roots.is_empty() {
            return Ok((Vec::new(), DeliveryMode::Normal));
        }
        // Internal stability: the ack set must be strictly deeper than phi.
        let stable =
            |engine: &Self, chain: usize| engine.candidate(chain).ack_set_size() > phi;
        if !roots.iter().all(|&root| stable(self, root)) {
            return Ok((Vec::new(), DeliveryMode::Normal));
        }
        let mode = if global_ack_set_size == u64::from(num_chains) {
            DeliveryMode::Normal
        } else {
            // Early delivery additionally needs every remaining candidate to
            // be dominated by a root already.
            let all_dominated = non_roots.iter().all(|&non_root| {
                roots
                    .iter()
                    .any(|&root| self.grade(root, non_root, global_ack_set_size) == 1)
            });
            if !all_dominated {
                return Ok((Vec::new(), DeliveryMode::Normal));
            }
            DeliveryMode::Early
        };
        let delivered: Vec<usize> = self
            .candidate_chain_ids
            .iter()
            .copied()
            .filter(|&chain| stable(self, chain))
            .collect();
        let blocks = self.output(&delivered)?;
        debug!(
            target: LOG_TARGET,
            "Delivered {} blocks in {:?} mode in round {}.",
            blocks.len(),
            mode,
            self.current_round
        );
        Ok((blocks, mode))
    }

    /// Remove the given candidates from all tracking, promote their
    /// successors, and hand the blocks out sorted ascending by hash.
    fn output(&mut self, delivered_chains: &[usize]) -> Result<Vec<Block<H>>, Error> {
        let mut blocks = Vec::with_capacity(delivered_chains.len());
        for &chain in delivered_chains {
            let info = self.candidates[chain]
                .take()
                .expect("delivered candidates exist");
            let hash = info.hash();
            info.recycle(&mut self.cache);
            self.candidate_chains.remove(ChainIndex(chain as u32));
            let front = self
                .global
                .pop_front(chain)
                .expect("a candidate is the front of its chain");
            debug_assert_eq!(front, hash, "candidates sit at their chain front");
            if let Some(acking) = self.acked.remove(&hash) {
                self.cache.recycle_ack_set(acking);
            }
            let block = self
                .pendings
                .remove(&hash)
                .expect("candidates are pending");
            if block.round() > self.current_round {
                return Err(Error::FutureRoundDelivered);
            }
            blocks.push(block);
        }
        self.candidate_chain_ids
            .retain(|chain| !delivered_chains.contains(chain));
        for &remaining in &self.candidate_chain_ids.clone() {
            for &delivered in delivered_chains {
                self.candidates[remaining]
                    .as_mut()
                    .expect("mapped candidates exist")
                    .clear_win_record(delivered, &mut self.cache);
            }
        }
        self.promote_candidates();
        self.mark_all_dirty();
        blocks.sort_by(|left, right| left.hash.cmp(&right.hash));
        Ok(blocks)
    }

    /// The round boundary is reached once the next round has a config and
    /// every chain present in both rounds has moved past the current one.
    fn round_boundary_reached(&self) -> bool {
        let next = match self.config_for(self.current_round + 1) {
            Some(next) => next,
            None => return false,
        };
        let shared = self.current_config().num_chains.min(next.num_chains) as usize;
        (0..shared).all(|chain| {
            self.latest_rounds[chain].map_or(false, |latest| latest > self.current_round)
        })
    }

    /// Drain every pending block of the closing round in successive candidate
    /// waves, then switch to the next round. Emitted waves respect the DAG:
    /// within the flushed sequence only later blocks ack earlier ones.
    fn flush(&mut self) -> Result<(Vec<Block<H>>, DeliveryMode), Error> {
        let closing = self.current_round;
        debug!(target: LOG_TARGET, "Flushing round {}.", closing);
        let mut flushed = Vec::new();
        loop {
            let remaining = (0..self.global.num_chains()).any(|chain| {
                self.global.front(chain).map_or(false, |(_, hash)| {
                    self.pendings
                        .get(hash)
                        .expect("chain fronts are pending")
                        .round()
                        <= closing
                })
            });
            if !remaining {
                break;
            }
            let wave = self.candidate_chain_ids.clone();
            assert!(
                !wave.is_empty(),
                "a flush wave always finds a candidate among the closing round's blocks"
            );
            flushed.append(&mut self.output(&wave)?);
        }
        self.advance_round();
        Ok((flushed, DeliveryMode::Flush))
    }

    fn advance_round(&mut self) {
        self.current_round += 1;
        let config = self
            .config_for(self.current_round)
            .expect("a config for the round being entered was appended");
        let num_chains = config.num_chains;
        debug!(
            target: LOG_TARGET,
            "Entering round {} with {} chains.",
            self.current_round,
            num_chains
        );
        debug_assert!(
            self.candidate_chain_ids.is_empty(),
            "rounds only switch with no candidates left"
        );
        if num_chains as usize != self.global.num_chains() {
            self.global.resize(num_chains);
            self.cache.resize(num_chains);
            self.candidates.truncate(num_chains as usize);
            self.candidates.resize_with(num_chains as usize, || None);
            self.candidate_chains = ChainMap::with_size(crate::ChainCount(num_chains));
            self.latest_rounds.truncate(num_chains as usize);
            self.latest_rounds.resize(num_chains as usize, None);
        }
        // Replay blocks that were parked for chains starting in this round.
        for block in std::mem::take(&mut self.parked) {
            if block.round() > self.current_round || block.position.chain_id >= num_chains {
                self.parked.push(block);
                continue;
            }
            let chain = block.position.chain_id as usize;
            if self.pendings.contains_key(&block.hash)
                || !self.global.is_appendable(chain, block.height())
            {
                warn!(
                    target: LOG_TARGET,
                    "Dropping parked block {:?} that does not extend the DAG.",
                    block.hash
                );
                continue;
            }
            self.register_block(&block);
        }
        self.promote_candidates();
        self.mark_all_dirty();
    }
}
