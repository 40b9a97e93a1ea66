//! Consensus rules: who mints next, and which chain a node prefers.

use std::fmt::Debug;

use dyn_clone::DynClone;
use rand::RngCore;

use crate::{
    block::Block,
    settings::{AVERAGE_COINS, STAKING_REWARD, STDEV_OF_COINS},
    utils::{geometric_delay, standard_normal},
};

/// Pluggable consensus algorithm shared by every node of a network.
///
/// Each node carries a minting weight (hash power or stake). The chance of
/// minting the next block is proportional to that weight.
pub trait Consensus: Debug + DynClone + Send + Sync {
    /// Minting weight of a freshly created node with the given mining power.
    fn initial_weight(&self, mining_power: u64, rng: &mut dyn RngCore) -> f64;

    /// Time (ms) until a node of weight `weight` mints its next block, or
    /// `None` if it never will.
    fn minting_delay(
        &self,
        rng: &mut dyn RngCore,
        weight: f64,
        total_weight: f64,
        interval: u64,
    ) -> Option<u64> {
        if total_weight <= 0.0 || interval == 0 {
            return None;
        }

        let p = 1.0 / (total_weight * interval as f64);
        geometric_delay(rng, p, weight)
    }

    /// Weight of a node after it minted a block.
    fn rewarded_weight(&self, weight: f64) -> f64 {
        weight
    }

    /// Returns true if `received` should replace `current` as the tip of a
    /// node's chain. Equal heights keep the block seen first.
    fn is_preferred(&self, received: &Block, current: Option<&Block>) -> bool {
        current.map_or(true, |current| received.height > current.height)
    }

    fn name(&self) -> &'static str;
}

dyn_clone::clone_trait_object!(Consensus);

/// Selectable consensus algorithms.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusKind {
    #[default]
    ProofOfWork,
    ProofOfStake,
}

impl ConsensusKind {
    pub fn build(&self) -> Box<dyn Consensus> {
        match self {
            Self::ProofOfWork => Box::new(ProofOfWork),
            Self::ProofOfStake => Box::new(ProofOfStake::default()),
        }
    }
}

/// Nakamoto style proof of work: the weight is the node's mining power.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProofOfWork;

impl Consensus for ProofOfWork {
    fn initial_weight(&self, mining_power: u64, _rng: &mut dyn RngCore) -> f64 {
        mining_power as f64
    }

    fn name(&self) -> &'static str {
        "ProofOfWork"
    }
}

/// Proof of stake with compounding rewards: stakes are drawn from a normal
/// distribution and grow by `reward` each time a node mints.
#[derive(Debug, Clone, Copy)]
pub struct ProofOfStake {
    pub average_coins: u64,
    pub stdev_of_coins: u64,
    pub reward: f64,
}

impl Default for ProofOfStake {
    fn default() -> Self {
        ProofOfStake {
            average_coins: AVERAGE_COINS,
            stdev_of_coins: STDEV_OF_COINS,
            reward: STAKING_REWARD,
        }
    }
}

impl Consensus for ProofOfStake {
    fn initial_weight(&self, _mining_power: u64, rng: &mut dyn RngCore) -> f64 {
        let coins = standard_normal(rng) * self.stdev_of_coins as f64
            + self.average_coins as f64;

        coins.trunc().max(1.0)
    }

    fn rewarded_weight(&self, weight: f64) -> f64 {
        weight * (1.0 + self.reward)
    }

    fn name(&self) -> &'static str {
        "ProofOfStake"
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::block::BlockId;

    fn block(id: u64, height: u64) -> Block {
        Block {
            id: BlockId(id),
            height,
            parent: None,
            minter: 1.into(),
            time: 0,
            size: 0,
        }
    }

    #[test]
    fn higher_block_is_preferred() {
        let pow = ProofOfWork;

        assert!(pow.is_preferred(&block(1, 1), None));
        assert!(pow.is_preferred(&block(2, 3), Some(&block(1, 2))));
        assert!(!pow.is_preferred(&block(2, 2), Some(&block(1, 2))));
        assert!(!pow.is_preferred(&block(2, 1), Some(&block(1, 2))));
    }

    #[test]
    fn stake_grows_only_under_proof_of_stake() {
        let pos = ProofOfStake::default();

        assert!((pos.rewarded_weight(100.0) - 101.0).abs() < 1e-9);
        assert_eq!(ProofOfWork.rewarded_weight(100.0), 100.0);
    }

    #[test]
    fn weights_are_positive() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let pos = ConsensusKind::ProofOfStake.build();

        for _ in 0..1000 {
            assert!(pos.initial_weight(0, &mut rng) >= 1.0);
        }
        assert_eq!(ProofOfWork.initial_weight(42, &mut rng), 42.0);
    }

    #[test]
    fn zero_weight_never_mints() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        assert_eq!(ProofOfWork.minting_delay(&mut rng, 0.0, 10.0, 600), None);
        assert_eq!(ProofOfWork.minting_delay(&mut rng, 1.0, 0.0, 600), None);
        assert!(ProofOfWork.minting_delay(&mut rng, 1.0, 1.0, 600).is_some());
    }
}
