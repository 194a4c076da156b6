use crate::{Error, Round};
use std::time::{Duration, SystemTime};

/// Parameters governing one round of total ordering, as agreed through
/// governance. A config must be appended for a round before any block of that
/// round can be delivered.
#[derive(Clone, Debug, PartialEq)]
pub struct LatticeConfig {
    /// The k in k-level total ordering: how many consecutive heights of a
    /// chain have to ack a candidate for the chain to endorse it.
    pub k: u64,
    /// The fraction of chains required for a decisive pairwise comparison,
    /// in (0, 1].
    pub phi_ratio: f32,
    /// The number of chains proposing blocks in this round.
    pub num_chains: u32,
    /// Wall-clock length of the round.
    pub round_interval: Duration,
}

/// A configuration bound to a concrete round, with the phi threshold and the
/// round window derived. Immutable once appended.
#[derive(Clone, Debug)]
pub(crate) struct RoundConfig {
    pub(crate) round_id: Round,
    pub(crate) k: u64,
    pub(crate) phi: u64,
    pub(crate) num_chains: u32,
    pub(crate) round_begin_time: SystemTime,
    pub(crate) round_end_time: SystemTime,
}

impl RoundConfig {
    /// The configuration the engine starts with.
    pub(crate) fn genesis(
        genesis_time: SystemTime,
        round_id: Round,
        config: &LatticeConfig,
    ) -> Result<Self, Error> {
        Self::starting_at(genesis_time, round_id, config)
    }

    /// The configuration for the round directly after the one of `self`.
    pub(crate) fn following(&self, config: &LatticeConfig) -> Result<Self, Error> {
        Self::starting_at(self.round_end_time, self.round_id + 1, config)
    }

    fn starting_at(
        begin: SystemTime,
        round_id: Round,
        config: &LatticeConfig,
    ) -> Result<Self, Error> {
        if config.num_chains == 0 {
            return Err(Error::InvalidConfig);
        }
        if !(config.phi_ratio > 0.0 && config.phi_ratio <= 1.0) {
            return Err(Error::InvalidConfig);
        }
        let phi = (f64::from(config.phi_ratio) * f64::from(config.num_chains)).ceil() as u64;
        Ok(RoundConfig {
            round_id,
            k: config.k,
            phi,
            num_chains: config.num_chains,
            round_begin_time: begin,
            round_end_time: begin + config.round_interval,
        })
    }
}
