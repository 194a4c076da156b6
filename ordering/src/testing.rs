//! Test support: deterministic block construction, randomized lattice
//! generation and DAG-respecting reveal orders, plus a run harness checking
//! the delivery invariants on every emitted set.

use crate::{Block, DeliveryMode, Hasher, LatticeConfig, Position, Round, TotalOrdering};
use latticeorder_mock::{Hash128, Hasher128};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::{
    collections::{BTreeMap, BTreeSet, HashSet, VecDeque},
    time::{Duration, SystemTime},
};

pub(crate) type TestBlock = Block<Hasher128>;

pub(crate) fn config(k: u64, phi_ratio: f32, num_chains: u32) -> LatticeConfig {
    LatticeConfig {
        k,
        phi_ratio,
        num_chains,
        round_interval: Duration::from_secs(1000),
    }
}

pub(crate) fn engine(config: &LatticeConfig) -> TotalOrdering<Hasher128> {
    TotalOrdering::new(SystemTime::now(), 0, config).expect("test configs are valid")
}

/// Produces blocks with distinct deterministic hashes.
pub(crate) struct BlockFactory {
    counter: u64,
}

impl BlockFactory {
    pub(crate) fn new() -> Self {
        BlockFactory { counter: 0 }
    }

    pub(crate) fn block(
        &mut self,
        chain_id: u32,
        height: u64,
        round: Round,
        parent_hash: Hash128,
        acks: Vec<Hash128>,
    ) -> TestBlock {
        self.counter += 1;
        let hash = Hasher128::hash(&self.counter.to_le_bytes());
        let acks: BTreeSet<Hash128> = acks.into_iter().collect();
        Block {
            hash,
            parent_hash,
            proposer_id: Hasher128::hash(&u64::from(chain_id).to_le_bytes()),
            position: Position::new(chain_id, height, round),
            acks: acks.into_iter().collect(),
        }
    }

    pub(crate) fn genesis(&mut self, chain_id: u32, acks: Vec<Hash128>) -> TestBlock {
        self.block(chain_id, 0, 0, [0; 16], acks)
    }

    /// The next block of the same chain, acking its parent.
    pub(crate) fn next(&mut self, parent: &TestBlock, extra_acks: Vec<Hash128>) -> TestBlock {
        let mut acks = extra_acks;
        acks.push(parent.hash);
        self.block(
            parent.position.chain_id,
            parent.height() + 1,
            parent.round(),
            parent.hash,
            acks,
        )
    }
}

/// Grows a random lattice round by round. Chains persist across rounds,
/// heights keep increasing, and the first block a chain produces in a new
/// round acks every tip of the closing round so that no chain's tail is left
/// uncovered at the boundary.
pub(crate) struct LatticeGenerator {
    factory: BlockFactory,
    tips: Vec<Option<TestBlock>>,
}

impl LatticeGenerator {
    pub(crate) fn new() -> Self {
        LatticeGenerator {
            factory: BlockFactory::new(),
            tips: Vec::new(),
        }
    }

    pub(crate) fn generate_round(
        &mut self,
        round: Round,
        num_chains: u32,
        heights: u64,
        max_extra_acks: usize,
        rng: &mut StdRng,
    ) -> Vec<TestBlock> {
        let boundary_acks: Vec<Hash128> = self
            .tips
            .iter()
            .flatten()
            .map(|block| block.hash)
            .collect();
        self.tips.truncate(num_chains as usize);
        self.tips.resize(num_chains as usize, None);
        let mut blocks = Vec::new();
        for relative_height in 0..heights {
            for chain in 0..num_chains {
                let mut acks = if relative_height == 0 && round > 0 {
                    boundary_acks.clone()
                } else {
                    let sampled = rng.gen_range(0..=max_extra_acks);
                    self.tips
                        .iter()
                        .flatten()
                        .filter(|tip| tip.position.chain_id != chain)
                        .map(|tip| tip.hash)
                        .collect::<Vec<_>>()
                        .choose_multiple(rng, sampled)
                        .copied()
                        .collect()
                };
                let block = match &self.tips[chain as usize] {
                    Some(tip) => {
                        let tip = tip.clone();
                        self.factory
                            .block(chain, tip.height() + 1, round, tip.hash, {
                                acks.push(tip.hash);
                                acks
                            })
                    }
                    None => self.factory.block(chain, 0, round, [0; 16], acks),
                };
                self.tips[chain as usize] = Some(block.clone());
                blocks.push(block);
            }
        }
        blocks
    }
}

/// Shuffle the blocks into a random order that still respects the ack
/// relation and the per-chain block succession.
pub(crate) fn reveal_in_random_order(blocks: &[TestBlock], rng: &mut StdRng) -> Vec<TestBlock> {
    let in_set: HashSet<Hash128> = blocks.iter().map(|block| block.hash).collect();
    let mut chain_queues: BTreeMap<u32, VecDeque<&TestBlock>> = BTreeMap::new();
    for block in blocks {
        chain_queues
            .entry(block.position.chain_id)
            .or_default()
            .push_back(block);
    }
    let mut revealed: HashSet<Hash128> = HashSet::new();
    let mut order = Vec::with_capacity(blocks.len());
    while order.len() < blocks.len() {
        let ready: Vec<u32> = chain_queues
            .iter()
            .filter(|(_, queue)| {
                queue.front().map_or(false, |block| {
                    block
                        .acks
                        .iter()
                        .all(|ack| revealed.contains(ack) || !in_set.contains(ack))
                })
            })
            .map(|(&chain, _)| chain)
            .collect();
        let &chain = ready
            .choose(rng)
            .expect("a DAG always has a revealable block");
        let block = chain_queues
            .get_mut(&chain)
            .expect("the chain has a queue")
            .pop_front()
            .expect("ready chains are non-empty");
        revealed.insert(block.hash);
        order.push(block.clone());
    }
    order
}

/// One delivery set as returned by a single `process_block` call.
pub(crate) type DeliverySet = (Vec<TestBlock>, DeliveryMode);

/// Feed all blocks into the engine and collect the emitted delivery sets,
/// asserting the cross-cutting invariants on the way: rounds never decrease,
/// acked blocks are delivered no later than their dependants, and non-flush
/// sets come out sorted by hash.
pub(crate) fn perform_run(
    engine: &mut TotalOrdering<Hasher128>,
    blocks: &[TestBlock],
) -> Vec<DeliverySet> {
    let mut sets = Vec::new();
    let mut delivered: HashSet<Hash128> = HashSet::new();
    let known: HashSet<Hash128> = blocks.iter().map(|block| block.hash).collect();
    let mut highest_round = 0;
    for block in blocks {
        let (set, mode) = engine
            .process_block(block)
            .expect("generated blocks form a valid DAG");
        if set.is_empty() {
            continue;
        }
        if mode != DeliveryMode::Flush {
            for pair in set.windows(2) {
                assert!(pair[0].hash < pair[1].hash, "delivery sets are sorted by hash");
            }
        }
        for delivered_block in &set {
            assert!(
                delivered_block.round() >= highest_round,
                "delivered rounds never decrease"
            );
            highest_round = delivered_block.round();
            for ack in &delivered_block.acks {
                assert!(
                    delivered.contains(ack) || !known.contains(ack),
                    "acked blocks are delivered first"
                );
            }
            delivered.insert(delivered_block.hash);
        }
        sets.push((set, mode));
    }
    sets
}

pub(crate) fn ordered_hashes(sets: &[DeliverySet]) -> Vec<Hash128> {
    sets.iter()
        .flat_map(|(set, _)| set.iter().map(|block| block.hash))
        .collect()
}

/// Every pair of orderings must be a prefix of one another: different arrival
/// orders may stall at different points, but can never disagree.
pub(crate) fn assert_prefix_consistent(orderings: &[Vec<Hash128>]) {
    for left in orderings {
        assert!(!left.is_empty(), "every run delivers something");
        for right in orderings {
            let common = left.len().min(right.len());
            assert_eq!(
                &left[..common],
                &right[..common],
                "orderings diverge beyond stalling"
            );
        }
    }
}

mod tests {
    use crate::{
        testing::{
            assert_prefix_consistent, config, engine, ordered_hashes, perform_run,
            reveal_in_random_order, DeliverySet, LatticeGenerator,
        },
        DeliveryMode, LatticeConfig, TotalOrdering,
    };
    use latticeorder_mock::Hasher128;
    use rand::{rngs::StdRng, SeedableRng};
    use std::time::SystemTime;

    fn multi_order_runs(
        configs: &[LatticeConfig],
        rounds_generated: usize,
        heights: u64,
        max_extra_acks: usize,
        repeats: u64,
    ) -> Vec<Vec<DeliverySet>> {
        let mut generation_rng = StdRng::seed_from_u64(17);
        let mut generator = LatticeGenerator::new();
        let mut blocks = Vec::new();
        for (round, config) in configs.iter().enumerate().take(rounds_generated) {
            blocks.extend(generator.generate_round(
                round as u64,
                config.num_chains,
                heights,
                max_extra_acks,
                &mut generation_rng,
            ));
        }
        let mut runs = Vec::new();
        for repeat in 0..repeats {
            let mut reveal_rng = StdRng::seed_from_u64(1000 + repeat);
            let order = reveal_in_random_order(&blocks, &mut reveal_rng);
            let mut engine = engine(&configs[0]);
            for (round, config) in configs.iter().enumerate().skip(1) {
                engine
                    .append_config(round as u64, config)
                    .expect("configs are appended in round order");
            }
            runs.push(perform_run(&mut engine, &order));
        }
        runs
    }

    #[test]
    fn random_dags_deliver_consistently_for_all_k() {
        for k in 0..4 {
            for max_extra_acks in [4, 10] {
                let configs = [config(k, 0.5, 10), config(k, 0.5, 10)];
                let runs = multi_order_runs(&configs, 1, 10, max_extra_acks, 4);
                let orderings: Vec<_> = runs.iter().map(|run| ordered_hashes(run)).collect();
                assert_prefix_consistent(&orderings);
            }
        }
    }

    #[test]
    fn num_chains_changes_between_rounds() {
        let configs = [
            config(1, 0.5, 7),
            config(1, 0.5, 10),
            config(1, 0.5, 4),
            config(1, 0.5, 13),
            config(1, 0.5, 13),
        ];
        let runs = multi_order_runs(&configs, 4, 5, 3, 4);
        let orderings: Vec<_> = runs.iter().map(|run| ordered_hashes(run)).collect();
        assert_prefix_consistent(&orderings);
        assert!(
            runs[0]
                .iter()
                .any(|(_, mode)| *mode == DeliveryMode::Flush),
            "round boundaries force flushes"
        );
    }

    #[test]
    fn phi_changes_between_rounds() {
        let configs = [
            config(1, 0.5, 10),
            config(1, 0.7, 10),
            config(1, 1.0, 10),
            config(1, 0.5, 10),
        ];
        let runs = multi_order_runs(&configs, 3, 5, 3, 4);
        let orderings: Vec<_> = runs.iter().map(|run| ordered_hashes(run)).collect();
        assert_prefix_consistent(&orderings);
    }

    #[test]
    fn k_changes_between_rounds() {
        let configs = [
            config(0, 0.7, 10),
            config(4, 0.7, 10),
            config(1, 0.7, 10),
            config(2, 0.7, 10),
        ];
        let runs = multi_order_runs(&configs, 3, 6, 3, 4);
        let orderings: Vec<_> = runs.iter().map(|run| ordered_hashes(run)).collect();
        assert_prefix_consistent(&orderings);
    }

    #[test]
    fn everything_changes_between_rounds() {
        let configs = [
            config(0, 0.5, 4),
            config(1, 0.7, 10),
            config(2, 0.8, 7),
            config(0, 0.5, 4),
            config(3, 0.8, 10),
            config(3, 0.8, 10),
        ];
        let runs = multi_order_runs(&configs, 5, 5, 3, 4);
        let orderings: Vec<_> = runs.iter().map(|run| ordered_hashes(run)).collect();
        assert_prefix_consistent(&orderings);
    }

    #[test]
    fn synced_engine_reproduces_the_delivery_tail() {
        let genesis_config = config(0, 0.67, 19);
        let next_config = config(0, 0.5, 19);
        let mut generation_rng = StdRng::seed_from_u64(5);
        let mut generator = LatticeGenerator::new();
        let blocks = generator.generate_round(0, 19, 10, 10, &mut generation_rng);
        let mut reveal_rng = StdRng::seed_from_u64(6);
        let order = reveal_in_random_order(&blocks, &mut reveal_rng);

        let mut first = engine(&genesis_config);
        first
            .append_config(1, &next_config)
            .expect("round 1 follows round 0");
        let first_sets = perform_run(&mut first, &order);
        assert!(first_sets.len() >= 2, "the run produces enough sets to cut");

        let offset = first_sets.len() / 2;
        let mut second = engine(&genesis_config);
        second
            .append_config(1, &next_config)
            .expect("round 1 follows round 0");
        let mut second_sets = Vec::new();
        for (set, _) in &first_sets[offset..] {
            for block in set {
                let (delivered, _) = second
                    .process_block(block)
                    .expect("delivered blocks replay cleanly");
                if !delivered.is_empty() {
                    second_sets.push(delivered);
                }
            }
        }
        for (index, set) in second_sets.iter().enumerate() {
            assert_eq!(set, &first_sets[offset + index].0);
        }
    }

    #[test]
    fn synced_engine_handles_config_changes() {
        let configs = [
            config(0, 0.67, 19),
            config(2, 0.5, 17),
            config(0, 0.8, 22),
            config(3, 0.5, 25),
            config(1, 0.7, 20),
            config(1, 0.7, 20),
        ];
        let mut generation_rng = StdRng::seed_from_u64(23);
        let mut generator = LatticeGenerator::new();
        let mut blocks = Vec::new();
        for (round, config) in configs.iter().enumerate().take(5) {
            blocks.extend(generator.generate_round(
                round as u64,
                config.num_chains,
                5,
                10,
                &mut generation_rng,
            ));
        }
        let mut reveal_rng = StdRng::seed_from_u64(24);
        let order = reveal_in_random_order(&blocks, &mut reveal_rng);

        let build = |genesis: &LatticeConfig| {
            let mut engine = TotalOrdering::<Hasher128>::new(SystemTime::now(), 0, genesis)
                .expect("test configs are valid");
            for (round, config) in configs.iter().enumerate().skip(1) {
                engine
                    .append_config(round as u64, config)
                    .expect("configs are appended in round order");
            }
            engine
        };
        let mut first = build(&configs[0]);
        let first_sets = perform_run(&mut first, &order);

        for cut in 0..3 {
            let mut offset = first_sets.len() * (3 + cut) / 7;
            while offset < first_sets.len() && first_sets[offset].1 == DeliveryMode::Flush {
                offset += 1;
            }
            if offset >= first_sets.len() {
                continue;
            }
            let offset_round = first_sets[offset].0[0].round();
            assert!(offset_round > 0, "the cut lands past the first round");
            let mut second = build(&configs[0]);
            for _ in 0..offset_round {
                second.switch_round();
            }
            let mut second_sets = Vec::new();
            for (set, _) in &first_sets[offset..] {
                for block in set {
                    let (delivered, _) = second
                        .process_block(block)
                        .expect("delivered blocks replay cleanly");
                    if !delivered.is_empty() {
                        second_sets.push(delivered);
                    }
                }
            }
            for (index, set) in second_sets.iter().enumerate() {
                assert_eq!(set, &first_sets[offset + index].0);
            }
        }
    }
}
