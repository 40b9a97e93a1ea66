//! Static description of the geographic network: regions, inter-region
//! latency and bandwidth, and the distributions used to place nodes.

use rand::{seq::SliceRandom, Rng};
use serde::Serialize;

use crate::utils::open_unit;

/// Index of a region within a [Topology].
pub type RegionId = usize;

/// Region names of the built-in topology, in table order.
pub const REGION_NAMES: [&str; 6] = [
    "NORTH_AMERICA",
    "EUROPE",
    "SOUTH_AMERICA",
    "ASIA_PACIFIC",
    "JAPAN",
    "AUSTRALIA",
];

/// Mean latency (ms) between regions, measured in 2019.
pub const LATENCY_2019: [[u64; 6]; 6] = [
    [32, 124, 184, 198, 151, 189],
    [124, 11, 227, 237, 252, 294],
    [184, 227, 88, 325, 301, 322],
    [198, 237, 325, 85, 58, 198],
    [151, 252, 301, 58, 12, 126],
    [189, 294, 322, 198, 126, 16],
];

/// Upload bandwidth (bit/s) per region, 2019.
pub const UPLOAD_BANDWIDTH_2019: [u64; 6] =
    [19_200_000, 20_700_000, 5_800_000, 15_700_000, 10_200_000, 11_300_000];

/// Download bandwidth (bit/s) per region, 2019.
pub const DOWNLOAD_BANDWIDTH_2019: [u64; 6] =
    [52_000_000, 40_000_000, 18_000_000, 22_800_000, 22_800_000, 29_900_000];

/// Share of Bitcoin nodes per region, 2019.
pub const REGION_DISTRIBUTION_BITCOIN_2019: [f64; 6] =
    [0.3316, 0.4998, 0.0090, 0.1177, 0.0224, 0.0195];

/// Cumulative distribution of Bitcoin node degrees (outbound connections
/// minus one), 2015.
pub const DEGREE_DISTRIBUTION_BITCOIN_2015: [f64; 20] = [
    0.025, 0.050, 0.075, 0.10, 0.20, 0.30, 0.40, 0.50, 0.60, 0.70, 0.80, 0.85,
    0.90, 0.95, 0.97, 0.97, 0.98, 0.99, 0.995, 1.0,
];

/// How the values of a distribution passed to [sample_assignment] are to be
/// read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionKind {
    /// Each value is the share of a single label; they are accumulated first.
    PerBucket,
    /// Values are already cumulative and non-decreasing.
    Cumulative,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TopologyError {
    #[error("distribution is empty")]
    EmptyDistribution,
    #[error("distribution value {0} is not in the range 0.0..=1.0")]
    BadValue(f64),
    #[error("cumulative distribution decreases at index {0}")]
    NotMonotonic(usize),
    #[error("per-bucket distribution sums to {0}, more than 1.0")]
    BadSum(f64),
    #[error("{0} tables disagree on the number of regions")]
    RegionCountMismatch(&'static str),
    #[error("bandwidth between regions {0} and {1} is below 1 kbit/s")]
    NoBandwidth(RegionId, RegionId),
}

/// Region tables and placement distributions for network construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    names: Vec<String>,
    latency: Vec<Vec<u64>>,
    upload: Vec<u64>,
    download: Vec<u64>,
    region_distribution: Vec<f64>,
    degree_distribution: Vec<f64>,
}

/// Entry of the static region listing.
#[derive(Debug, Clone, Serialize)]
pub struct RegionInfo {
    pub id: RegionId,
    pub name: String,
}

impl Default for Topology {
    fn default() -> Self {
        Self::bitcoin_2019()
    }
}

impl Topology {
    /// Allowable difference between a distribution sum and 1.0.
    const EPSILON: f64 = 1e-6;

    /// The built-in six region topology with Bitcoin's region and degree
    /// distributions.
    pub fn bitcoin_2019() -> Self {
        Topology {
            names: REGION_NAMES.iter().map(|s| s.to_string()).collect(),
            latency: LATENCY_2019.iter().map(|row| row.to_vec()).collect(),
            upload: UPLOAD_BANDWIDTH_2019.to_vec(),
            download: DOWNLOAD_BANDWIDTH_2019.to_vec(),
            region_distribution: REGION_DISTRIBUTION_BITCOIN_2019.to_vec(),
            degree_distribution: DEGREE_DISTRIBUTION_BITCOIN_2015.to_vec(),
        }
    }

    /// Creates a topology from custom tables. `degree_distribution` is
    /// cumulative, `region_distribution` per-bucket.
    pub fn new(
        names: Vec<String>,
        latency: Vec<Vec<u64>>,
        upload: Vec<u64>,
        download: Vec<u64>,
        region_distribution: Vec<f64>,
        degree_distribution: Vec<f64>,
    ) -> Result<Self, TopologyError> {
        use TopologyError::*;

        let n = names.len();
        if latency.len() != n || latency.iter().any(|row| row.len() != n) {
            return Err(RegionCountMismatch("latency"));
        }
        if upload.len() != n || download.len() != n {
            return Err(RegionCountMismatch("bandwidth"));
        }
        if region_distribution.len() != n {
            return Err(RegionCountMismatch("region distribution"));
        }
        validate(&region_distribution, DistributionKind::PerBucket)?;
        validate(&degree_distribution, DistributionKind::Cumulative)?;

        let topology = Topology {
            names,
            latency,
            upload,
            download,
            region_distribution,
            degree_distribution,
        };
        for from in 0..n {
            for to in 0..n {
                if topology.bandwidth(from, to) < 1000 {
                    return Err(NoBandwidth(from, to));
                }
            }
        }

        Ok(topology)
    }

    /// Replaces the region distribution, keeping the region tables.
    pub fn with_region_distribution(
        mut self,
        distribution: Vec<f64>,
    ) -> Result<Self, TopologyError> {
        if distribution.len() != self.num_regions() {
            return Err(TopologyError::RegionCountMismatch("region distribution"));
        }
        validate(&distribution, DistributionKind::PerBucket)?;
        self.region_distribution = distribution;

        Ok(self)
    }

    /// Replaces the cumulative degree distribution.
    pub fn with_degree_distribution(
        mut self,
        distribution: Vec<f64>,
    ) -> Result<Self, TopologyError> {
        validate(&distribution, DistributionKind::Cumulative)?;
        self.degree_distribution = distribution;

        Ok(self)
    }

    #[inline]
    pub fn num_regions(&self) -> usize {
        self.names.len()
    }

    pub fn region_distribution(&self) -> &[f64] {
        &self.region_distribution
    }

    pub fn degree_distribution(&self) -> &[f64] {
        &self.degree_distribution
    }

    pub fn regions(&self) -> Vec<RegionInfo> {
        self.names
            .iter()
            .enumerate()
            .map(|(id, name)| RegionInfo { id, name: name.clone() })
            .collect()
    }

    /// Samples a latency (ms) between two regions from a Pareto distribution
    /// whose mean is the tabled latency.
    pub fn latency<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        from: RegionId,
        to: RegionId,
    ) -> u64 {
        let mean = self.latency[from][to] as f64;
        let shape = 0.2 * mean;
        let scale = mean - 5.0;

        (scale / open_unit(rng).powf(1.0 / shape)).round().max(0.0) as u64
    }

    /// Bandwidth (bit/s) available from one region to another.
    #[inline]
    pub fn bandwidth(&self, from: RegionId, to: RegionId) -> u64 {
        self.upload[from].min(self.download[to])
    }
}

fn validate(
    distribution: &[f64],
    kind: DistributionKind,
) -> Result<(), TopologyError> {
    use TopologyError::*;

    if distribution.is_empty() {
        return Err(EmptyDistribution);
    }
    if let Some(&val) = distribution
        .iter()
        .find(|&x| x.is_nan() || !(0.0..=1.0).contains(x))
    {
        return Err(BadValue(val));
    }

    match kind {
        DistributionKind::PerBucket => {
            let sum: f64 = distribution.iter().sum();
            if sum > 1.0 + Topology::EPSILON {
                return Err(BadSum(sum));
            }
        }
        DistributionKind::Cumulative => {
            if let Some(i) = distribution.windows(2).position(|w| w[1] < w[0]) {
                return Err(NotMonotonic(i + 1));
            }
        }
    }

    Ok(())
}

/// Produces a shuffled list of `num_nodes` labels following `distribution`.
///
/// Label `k` is repeated until the list holds `round(cum[k] * num_nodes)`
/// entries, where `cum` is the cumulative form of the distribution; any
/// remaining slots take the last label.
pub fn sample_assignment<R: Rng + ?Sized>(
    rng: &mut R,
    distribution: &[f64],
    num_nodes: usize,
    kind: DistributionKind,
) -> Result<Vec<usize>, TopologyError> {
    validate(distribution, kind)?;

    let mut list = Vec::with_capacity(num_nodes);
    let mut cumulative = 0.0;
    for (label, &value) in distribution.iter().enumerate() {
        cumulative = match kind {
            DistributionKind::PerBucket => cumulative + value,
            DistributionKind::Cumulative => value,
        };

        let target = ((cumulative * num_nodes as f64).round() as usize).min(num_nodes);
        while list.len() < target {
            list.push(label);
        }
    }
    let last = distribution.len() - 1;
    list.resize(num_nodes, last);

    list.shuffle(rng);
    Ok(list)
}

/// Produces a shuffled list of `num_nodes` flags of which a `rate` share is
/// true.
pub fn sample_flags<R: Rng + ?Sized>(
    rng: &mut R,
    rate: f64,
    num_nodes: usize,
) -> Vec<bool> {
    let threshold = num_nodes as f64 * rate;
    let mut list: Vec<bool> =
        (0..num_nodes).map(|i| (i as f64) < threshold).collect();

    list.shuffle(rng);
    list
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn per_bucket_counts_follow_distribution() {
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        let list = sample_assignment(
            &mut rng,
            &[0.5, 0.3, 0.2],
            10,
            DistributionKind::PerBucket,
        )
        .unwrap();

        let counts: Vec<_> =
            (0..3).map(|k| list.iter().filter(|&&l| l == k).count()).collect();
        assert_eq!(counts, vec![5, 3, 2]);
    }

    #[test]
    fn cumulative_counts_follow_distribution() {
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        let list = sample_assignment(
            &mut rng,
            &[0.25, 0.25, 0.75, 1.0],
            8,
            DistributionKind::Cumulative,
        )
        .unwrap();

        let counts: Vec<_> =
            (0..4).map(|k| list.iter().filter(|&&l| l == k).count()).collect();
        assert_eq!(counts, vec![2, 0, 4, 2]);
    }

    #[test]
    fn short_distribution_fills_with_last_label() {
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        let list =
            sample_assignment(&mut rng, &[0.2, 0.2], 10, DistributionKind::PerBucket)
                .unwrap();

        assert_eq!(list.iter().filter(|&&l| l == 1).count(), 8);
    }

    #[test]
    fn same_seed_same_assignment() {
        let dist = REGION_DISTRIBUTION_BITCOIN_2019;
        let a = sample_assignment(
            &mut ChaCha8Rng::seed_from_u64(3),
            &dist,
            100,
            DistributionKind::PerBucket,
        );
        let b = sample_assignment(
            &mut ChaCha8Rng::seed_from_u64(3),
            &dist,
            100,
            DistributionKind::PerBucket,
        );

        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_distributions() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        assert_eq!(
            sample_assignment(&mut rng, &[], 3, DistributionKind::PerBucket),
            Err(TopologyError::EmptyDistribution)
        );
        assert_eq!(
            sample_assignment(&mut rng, &[0.6, 0.3], 3, DistributionKind::Cumulative),
            Err(TopologyError::NotMonotonic(1))
        );
        assert_eq!(
            sample_assignment(&mut rng, &[0.6, 0.6], 3, DistributionKind::PerBucket),
            Err(TopologyError::BadSum(1.2))
        );
    }

    #[test]
    fn flags_follow_rate() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let flags = sample_flags(&mut rng, 0.2, 5);

        assert_eq!(flags.iter().filter(|&&f| f).count(), 1);
        assert_eq!(sample_flags(&mut rng, 0.0, 5), vec![false; 5]);
    }

    #[test]
    fn bandwidth_is_bottleneck_of_both_ends() {
        let topology = Topology::bitcoin_2019();

        assert_eq!(topology.bandwidth(0, 2), 18_000_000);
        assert_eq!(topology.bandwidth(2, 0), 5_800_000);
    }

    proptest! {
        #[test]
        fn assignment_has_requested_length(
            seed in any::<u64>(),
            num_nodes in 0usize..500,
        ) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let list = sample_assignment(
                &mut rng,
                &DEGREE_DISTRIBUTION_BITCOIN_2015,
                num_nodes,
                DistributionKind::Cumulative,
            ).unwrap();

            prop_assert_eq!(list.len(), num_nodes);
            prop_assert!(list.iter().all(|&l| l < DEGREE_DISTRIBUTION_BITCOIN_2015.len()));
        }

        #[test]
        fn latency_is_at_least_scale(seed in any::<u64>(), from in 0usize..6, to in 0usize..6) {
            let topology = Topology::bitcoin_2019();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let floor = LATENCY_2019[from][to] as f64 - 5.0;

            prop_assert!(topology.latency(&mut rng, from, to) as f64 >= floor.round());
        }
    }
}
