//! Static simulation settings: protocol constants and tables which are not
//! read from a configuration profile.

use rand::{
    distributions::{WeightedError, WeightedIndex},
    prelude::Distribution,
    Rng,
};

use crate::{
    node::{consensus::ConsensusKind, routing::RoutingTableKind},
    topology::Topology,
};

/// Size (bytes) of a full block.
pub const BLOCK_SIZE: u64 = 535_000;
/// Size (bytes) of a compact block announcement.
pub const COMPACT_BLOCK_SIZE: u64 = 18_000;
/// Share of nodes flagged as churn nodes.
pub const CHURN_NODE_RATE: f64 = 0.976;
/// Probability that a control node fails to reconstruct a compact block.
pub const CBR_FAILURE_RATE_FOR_CONTROL_NODE: f64 = 0.13;
/// Probability that a churn node fails to reconstruct a compact block.
pub const CBR_FAILURE_RATE_FOR_CHURN_NODE: f64 = 0.27;
/// Mean stake of a node under proof of stake.
pub const AVERAGE_COINS: u64 = 4000;
pub const STDEV_OF_COINS: u64 = 2000;
/// Relative stake increase of a minter per minted block.
pub const STAKING_REWARD: f64 = 0.01;
/// Time (ms) a node spends processing a block before it is sent.
pub const PROCESSING_TIME: u64 = 2;
/// Extra delay (ms) added to every control message.
pub const MESSAGE_OVERHEAD: u64 = 10;
/// Seed of the shared random number generator.
pub const DEFAULT_SEED: u64 = 10;

/// Share of the full block which has to be fetched after a failed compact
/// block reconstruction at a control node, as `(share, weight)` pairs.
pub const CBR_FAILURE_BLOCK_SIZE_DISTRIBUTION_FOR_CONTROL_NODE: &[(f64, u32)] =
    &[(0.01, 210)];

/// Share of the full block which has to be fetched after a failed compact
/// block reconstruction at a churn node, as `(share, weight)` pairs.
pub const CBR_FAILURE_BLOCK_SIZE_DISTRIBUTION_FOR_CHURN_NODE: &[(f64, u32)] = &[
    (0.01, 546), (0.02, 66), (0.03, 39), (0.04, 27), (0.05, 21), (0.06, 17),
    (0.07, 14), (0.08, 12), (0.09, 11), (0.10, 10), (0.11, 9), (0.12, 8),
    (0.13, 7), (0.14, 7), (0.15, 6), (0.16, 6), (0.17, 5), (0.18, 5),
    (0.19, 5), (0.20, 4), (0.21, 4), (0.22, 4), (0.23, 4), (0.24, 4),
    (0.25, 3), (0.26, 3), (0.27, 3), (0.28, 3), (0.29, 3), (0.30, 3),
    (0.31, 3), (0.32, 3), (0.33, 2), (0.34, 2), (0.35, 2), (0.36, 2),
    (0.37, 2), (0.38, 2), (0.39, 2), (0.40, 2), (0.41, 2), (0.42, 2),
    (0.43, 2), (0.44, 2), (0.45, 2), (0.46, 2), (0.47, 2), (0.48, 2),
    (0.49, 1), (0.50, 1), (0.51, 1), (0.52, 1), (0.53, 1), (0.54, 1),
    (0.55, 1), (0.56, 1), (0.57, 1), (0.58, 1), (0.59, 1), (0.60, 1),
    (0.61, 1), (0.62, 1), (0.63, 1), (0.64, 1), (0.65, 1), (0.66, 1),
    (0.67, 1), (0.68, 1), (0.69, 1), (0.70, 1), (0.71, 1), (0.72, 1),
    (0.73, 1), (0.74, 1), (0.75, 1), (0.76, 1), (0.77, 1), (0.78, 1),
    (0.79, 1), (0.80, 1), (0.81, 1), (0.82, 1), (0.83, 1), (0.84, 1),
    (0.85, 1), (0.86, 1), (0.87, 1), (0.88, 1), (0.89, 1), (0.90, 1),
    (0.91, 1), (0.92, 1), (0.93, 1), (0.94, 1), (0.95, 1), (0.96, 1),
];

/// Distribution of block sizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockSize {
    Fixed(u64),
    /// Uniform over `min..=max`.
    Uniform { min: u64, max: u64 },
}

impl BlockSize {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        match *self {
            Self::Fixed(size) => size,
            Self::Uniform { min, max } if min < max => rng.gen_range(min..=max),
            Self::Uniform { min, .. } => min,
        }
    }
}

/// What happens to messages addressed to a churn node while it is offline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ChurnPolicy {
    /// Messages are held back until the node is reachable again.
    #[default]
    Delay,
    /// Messages are discarded.
    Drop,
}

/// Reachability model of churn nodes. Online and offline periods are
/// exponentially distributed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChurnSettings {
    /// Mean length (ms) of an online period. Zero disables churn toggling.
    pub mean_online: u64,
    /// Mean length (ms) of an offline period.
    pub mean_offline: u64,
    pub policy: ChurnPolicy,
}

impl Default for ChurnSettings {
    fn default() -> Self {
        ChurnSettings {
            mean_online: 6 * 3_600_000,
            mean_offline: 5 * 60_000,
            policy: ChurnPolicy::Delay,
        }
    }
}

impl ChurnSettings {
    pub fn disabled() -> Self {
        ChurnSettings { mean_online: 0, ..Default::default() }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.mean_online > 0
    }
}

/// Static settings of a simulation run. [Settings::default] holds the
/// built-in constants of this module.
#[derive(Debug, Clone)]
pub struct Settings {
    pub routing_table: RoutingTableKind,
    pub consensus: ConsensusKind,
    pub topology: Topology,
    pub block_size: BlockSize,
    pub compact_block_size: u64,
    pub churn_node_rate: f64,
    pub churn: ChurnSettings,
    pub cbr_failure_rate_for_control_node: f64,
    pub cbr_failure_rate_for_churn_node: f64,
    pub cbr_failure_sizes_for_control_node: &'static [(f64, u32)],
    pub cbr_failure_sizes_for_churn_node: &'static [(f64, u32)],
    pub processing_time: u64,
    pub message_overhead: u64,
    pub seed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            routing_table: RoutingTableKind::default(),
            consensus: ConsensusKind::default(),
            topology: Topology::default(),
            block_size: BlockSize::Fixed(BLOCK_SIZE),
            compact_block_size: COMPACT_BLOCK_SIZE,
            churn_node_rate: CHURN_NODE_RATE,
            churn: ChurnSettings::default(),
            cbr_failure_rate_for_control_node: CBR_FAILURE_RATE_FOR_CONTROL_NODE,
            cbr_failure_rate_for_churn_node: CBR_FAILURE_RATE_FOR_CHURN_NODE,
            cbr_failure_sizes_for_control_node:
                CBR_FAILURE_BLOCK_SIZE_DISTRIBUTION_FOR_CONTROL_NODE,
            cbr_failure_sizes_for_churn_node:
                CBR_FAILURE_BLOCK_SIZE_DISTRIBUTION_FOR_CHURN_NODE,
            processing_time: PROCESSING_TIME,
            message_overhead: MESSAGE_OVERHEAD,
            seed: DEFAULT_SEED,
        }
    }
}

/// Sampler over a `(share, weight)` table of failed compact block sizes.
#[derive(Debug, Clone)]
pub struct FailedBlockSizes {
    shares: Vec<f64>,
    index: WeightedIndex<u32>,
}

impl FailedBlockSizes {
    pub fn new(table: &[(f64, u32)]) -> Result<Self, WeightedError> {
        let index = WeightedIndex::new(table.iter().map(|&(_, w)| w))?;
        let shares = table.iter().map(|&(share, _)| share).collect();

        Ok(FailedBlockSizes { shares, index })
    }

    /// Number of bytes re-sent for a block of `block_size` bytes.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, block_size: u64) -> u64 {
        let share = self.shares[self.index.sample(rng)];

        (block_size as f64 * share) as u64
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn failed_sizes_stay_within_table() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let control =
            FailedBlockSizes::new(CBR_FAILURE_BLOCK_SIZE_DISTRIBUTION_FOR_CONTROL_NODE)
                .unwrap();
        let churn =
            FailedBlockSizes::new(CBR_FAILURE_BLOCK_SIZE_DISTRIBUTION_FOR_CHURN_NODE)
                .unwrap();

        for _ in 0..1000 {
            assert_eq!(control.sample(&mut rng, 100_000), 1_000);

            let size = churn.sample(&mut rng, 100_000);
            assert!((1_000..=96_000).contains(&size));
        }
    }

    #[test]
    fn empty_failure_table_is_rejected() {
        assert!(FailedBlockSizes::new(&[]).is_err());
    }

    #[test]
    fn block_size_sampling() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        assert_eq!(BlockSize::Fixed(7).sample(&mut rng), 7);
        let size = BlockSize::Uniform { min: 10, max: 20 }.sample(&mut rng);
        assert!((10..=20).contains(&size));
    }
}
