//! Propagation statistics and mining fairness.
//!
//! Arrivals of a block at nodes are collected in a bounded window of open
//! [PropagationRecords](PropagationRecord). When a record leaves the window it
//! is retired: its latencies are folded into the running averages and into
//! the per-minter propagation matrix from which fairness is computed at the
//! end of a run.

use std::collections::VecDeque;

use serde::{ser::SerializeMap, Serialize, Serializer};

use crate::{
    block::{Block, BlockId},
    node::NodeId,
};

/// Maximum number of blocks tracked at the same time.
pub const PROPAGATION_WINDOW: usize = 10;
/// Shares of the honest chain won by the faster fork used for fairness.
pub const WINNING_RATES: [f64; 3] = [0.0, 0.5, 1.0];
/// Number of fixed-point iterations used to find steady-state block shares.
pub const FAIRNESS_ROUNDS: usize = 1000;

/// Arrivals of a single block, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationRecord {
    pub block: BlockId,
    pub minter: NodeId,
    /// `(node, latency)` pairs; a repeated arrival overwrites the latency but
    /// keeps the position of the first one.
    pub arrivals: Vec<(NodeId, u64)>,
}

impl PropagationRecord {
    fn record(&mut self, node: NodeId, latency: u64) {
        match self.arrivals.iter_mut().find(|(n, _)| *n == node) {
            Some(entry) => entry.1 = latency,
            None => self.arrivals.push((node, latency)),
        }
    }
}

/// Latencies of a retired block, one per node in id order. Nodes the block
/// never reached have latency 0.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationRow {
    pub block: BlockId,
    pub latencies: Vec<u64>,
}

/// Averages over every retired block.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PropagationSummary {
    pub average_50: f64,
    pub average_90: f64,
    pub average_100: f64,
    pub average_mean: f64,
    pub average_hashrate_weighted: f64,
}

/// Fairness of every node for one winning rate.
#[derive(Debug, Clone, PartialEq)]
pub struct FairnessSummary {
    pub winning_rate: f64,
    /// Sum of the positive fairness values.
    pub sum: f64,
    /// Largest fairness, relative to the hash share of its node.
    pub max: f64,
    /// Smallest fairness, relative to the hash share of its node.
    pub min: f64,
    pub values: Vec<f64>,
}

/// Final record of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalResults {
    pub propagation: PropagationSummary,
    pub fairness: Vec<FairnessSummary>,
    pub hashrate_list: Vec<u64>,
    pub block_generation_count_list: Vec<u64>,
}

impl Serialize for FinalResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        let p = &self.propagation;
        map.serialize_entry("average-50-propagation-time", &p.average_50)?;
        map.serialize_entry("average-90-propagation-time", &p.average_90)?;
        map.serialize_entry("average-100-propagation-time", &p.average_100)?;
        map.serialize_entry("average-mean-propagation-time", &p.average_mean)?;
        map.serialize_entry(
            "average-hashrate-weighted-propagation-time",
            &p.average_hashrate_weighted,
        )?;

        for f in &self.fairness {
            let rate = format!("{:?}", f.winning_rate);
            map.serialize_entry(&format!("sum-base-fairness-win{rate}"), &f.sum)?;
            map.serialize_entry(&format!("max-base-fairness-win{rate}"), &f.max)?;
            map.serialize_entry(&format!("min-base-fairness-win{rate}"), &f.min)?;
            map.serialize_entry(&format!("fairness-list-win{rate}"), &f.values)?;
        }

        map.serialize_entry("hashrate-list", &self.hashrate_list)?;
        map.serialize_entry(
            "block-generation-count-list",
            &self.block_generation_count_list,
        )?;
        map.end()
    }
}

/// Running propagation statistics of a simulation.
#[derive(Debug, Clone)]
pub struct Analytics {
    target_interval: u64,
    open: VecDeque<PropagationRecord>,
    block_sum: u64,
    sum_50: f64,
    sum_90: f64,
    sum_100: f64,
    sum_mean: f64,
    sum_weighted: f64,
    /// `propagation_sums[minter][node]`: total latency of blocks minted by
    /// `minter` to reach `node`.
    propagation_sums: Vec<Vec<f64>>,
    miner_counts: Vec<u64>,
    hashrates: Vec<u64>,
    hashrate_sum: u64,
}

impl Analytics {
    /// `target_interval` is the expected time (ms) between blocks.
    pub fn new(target_interval: u64) -> Self {
        Analytics {
            target_interval,
            open: VecDeque::with_capacity(PROPAGATION_WINDOW),
            block_sum: 0,
            sum_50: 0.0,
            sum_90: 0.0,
            sum_100: 0.0,
            sum_mean: 0.0,
            sum_weighted: 0.0,
            propagation_sums: vec![],
            miner_counts: vec![],
            hashrates: vec![],
            hashrate_sum: 0,
        }
    }

    /// Registers the next node. Nodes must be added in id order.
    pub fn add_node(&mut self, hashrate: u64) {
        self.hashrates.push(hashrate);
        self.hashrate_sum += hashrate;
        self.miner_counts.push(0);

        let n = self.hashrates.len();
        for row in &mut self.propagation_sums {
            row.push(0.0);
        }
        self.propagation_sums.push(vec![0.0; n]);
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.hashrates.len()
    }

    /// Number of retired blocks.
    #[inline]
    pub fn block_sum(&self) -> u64 {
        self.block_sum
    }

    pub fn open_records(&self) -> impl Iterator<Item = &PropagationRecord> {
        self.open.iter()
    }

    /// Records the arrival of `block` at `node` at simulated time `time`.
    /// Returns the retired record if the window had to make room.
    pub fn on_arrive(
        &mut self,
        block: &Block,
        node: NodeId,
        time: u64,
    ) -> Option<PropagationRow> {
        let latency = time.saturating_sub(block.time);
        if let Some(record) = self.open.iter_mut().find(|r| r.block == block.id) {
            record.record(node, latency);
            return None;
        }

        let retired = match self.open.len() >= PROPAGATION_WINDOW {
            true => self.open.pop_front().map(|record| self.retire(record)),
            false => None,
        };
        self.open.push_back(PropagationRecord {
            block: block.id,
            minter: block.minter,
            arrivals: vec![(node, latency)],
        });

        retired
    }

    /// Retires every open record, oldest first.
    pub fn retire_all(&mut self) -> Vec<PropagationRow> {
        let open = std::mem::take(&mut self.open);
        open.into_iter().map(|record| self.retire(record)).collect()
    }

    fn retire(&mut self, record: PropagationRecord) -> PropagationRow {
        let n = self.num_nodes();
        let minter = record.minter.index();
        let rank_50 = (n as f64 * 0.5) as usize;
        let rank_90 = (n as f64 * 0.9) as usize;
        let hashrate_sum = self.hashrate_sum.max(1) as f64;

        self.block_sum += 1;
        self.miner_counts[minter] += 1;

        let mut latencies = vec![0; n];
        for (i, &(node, latency)) in record.arrivals.iter().enumerate() {
            let rank = i + 1;
            let node = node.index();
            let value = latency as f64;

            latencies[node] = latency;
            self.propagation_sums[minter][node] += value;

            // An arrival feeds at most one marker, the lowest matching one.
            if rank == rank_50 {
                self.sum_50 += value;
            } else if rank == rank_90 {
                self.sum_90 += value;
            } else if rank == n {
                self.sum_100 += value;
            }
            self.sum_mean += value / n as f64;
            self.sum_weighted +=
                value * self.hashrates[node] as f64 / hashrate_sum;
        }

        PropagationRow { block: record.block, latencies }
    }

    /// Averages of the retired blocks. With no retired blocks the sums are
    /// returned as they are.
    pub fn summary(&self) -> PropagationSummary {
        let divisor = match self.block_sum {
            0 => 1.0,
            sum => sum as f64,
        };

        PropagationSummary {
            average_50: self.sum_50 / divisor,
            average_90: self.sum_90 / divisor,
            average_100: self.sum_100 / divisor,
            average_mean: self.sum_mean / divisor,
            average_hashrate_weighted: self.sum_weighted / divisor,
        }
    }

    /// Mean latency from each minter to each node over the blocks that
    /// minter produced. Rows of nodes which never minted stay zero.
    pub fn average_propagation_times(&self) -> Vec<Vec<f64>> {
        self.propagation_sums
            .iter()
            .zip(&self.miner_counts)
            .map(|(row, &count)| match count {
                0 => row.clone(),
                count => row.iter().map(|x| x / count as f64).collect(),
            })
            .collect()
    }

    /// Fairness of every node for the given share of forks won.
    ///
    /// First the steady-state share of blocks mined on top of each node's
    /// blocks is found by fixed-point iteration; fairness is then the
    /// difference between the expected reward share and the hash share.
    pub fn calculate_fairness(&self, winning_rate: f64) -> Vec<f64> {
        let n = self.num_nodes();
        if n == 0 || self.hashrate_sum == 0 {
            return vec![0.0; n];
        }

        let prop = self.average_propagation_times();
        let hash: Vec<f64> = self.hashrates.iter().map(|&h| h as f64).collect();
        let total = self.hashrate_sum as f64;
        let interval = self.target_interval.max(1) as f64;
        let lose = 1.0 - winning_rate;

        let weighted: Vec<f64> = prop
            .iter()
            .map(|row| row.iter().zip(&hash).map(|(p, h)| p * h).sum::<f64>() / total)
            .collect();

        let mut rate: Vec<f64> = hash.iter().map(|h| h / total).collect();
        for _ in 0..FAIRNESS_ROUNDS {
            rate = (0..n)
                .map(|j| {
                    let inflow: f64 = (0..n)
                        .map(|k| rate[k] * (interval - prop[k][j] + weighted[k]))
                        .sum();
                    hash[j] * inflow / (interval * total)
                })
                .collect();
        }

        (0..n)
            .map(|i| {
                let share = hash[i] / total;
                let stolen: f64 =
                    (0..n).map(|j| rate[j] * lose * share * prop[j][i]).sum();

                (rate[i] * (interval - lose * weighted[i]) + stolen) / interval
                    - share
            })
            .collect()
    }

    fn fairness_summary(&self, winning_rate: f64) -> FairnessSummary {
        let values = self.calculate_fairness(winning_rate);
        let sum = values.iter().filter(|&&v| v > 0.0).sum();

        let relative = |index: Option<usize>| match index {
            Some(i) if self.hashrates[i] > 0 => {
                values[i] * self.hashrate_sum as f64 / self.hashrates[i] as f64
            }
            _ => 0.0,
        };
        let max = relative(arg_by(&values, |a, b| a > b));
        let min = relative(arg_by(&values, |a, b| a < b));

        FairnessSummary { winning_rate, sum, max, min, values }
    }

    /// Final record of the run. Open records are not included; call
    /// [Analytics::retire_all] first. Calling this repeatedly yields the same
    /// result.
    pub fn compute_results(&self) -> FinalResults {
        FinalResults {
            propagation: self.summary(),
            fairness: WINNING_RATES
                .iter()
                .map(|&rate| self.fairness_summary(rate))
                .collect(),
            hashrate_list: self.hashrates.clone(),
            block_generation_count_list: self.miner_counts.clone(),
        }
    }
}

/// Index of the first element that beats every other under `better`.
fn arg_by(values: &[f64], better: impl Fn(f64, f64) -> bool) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &v) in values.iter().enumerate() {
        if best.map_or(true, |b| better(v, values[b])) {
            best = Some(i);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: u64, minter: u64, time: u64) -> Block {
        Block {
            id: BlockId(id),
            height: id,
            parent: None,
            minter: minter.into(),
            time,
            size: 0,
        }
    }

    fn analytics(n: usize) -> Analytics {
        let mut analytics = Analytics::new(600_000);
        for _ in 0..n {
            analytics.add_node(100);
        }

        analytics
    }

    #[test]
    fn window_never_exceeds_limit() {
        let mut analytics = analytics(4);

        let mut retired = vec![];
        for id in 0..25 {
            let b = block(id, 1, id * 10);
            retired.extend(analytics.on_arrive(&b, 1.into(), id * 10 + 5));
            assert!(analytics.open_records().count() <= PROPAGATION_WINDOW);
        }

        assert_eq!(retired.len(), 25 - PROPAGATION_WINDOW);
        assert_eq!(retired[0].block, BlockId(0));
        assert_eq!(retired[0].latencies, vec![5, 0, 0, 0]);
        assert_eq!(analytics.block_sum(), 15);

        assert_eq!(analytics.retire_all().len(), PROPAGATION_WINDOW);
        assert_eq!(analytics.block_sum(), 25);
    }

    #[test]
    fn shared_rank_feeds_only_the_lower_marker() {
        // With two nodes the 50% and 90% ranks are both 1.
        let mut analytics = analytics(2);
        let b = block(0, 1, 0);
        analytics.on_arrive(&b, 1.into(), 7);
        analytics.on_arrive(&b, 2.into(), 30);
        analytics.retire_all();

        let summary = analytics.summary();
        assert_eq!(summary.average_50, 7.0);
        assert_eq!(summary.average_90, 0.0);
        assert_eq!(summary.average_100, 30.0);
    }

    #[test]
    fn markers_follow_arrival_rank() {
        let mut analytics = analytics(10);
        let b = block(0, 1, 0);

        // Latencies arrive out of order; markers use rank, not value.
        let latencies = [0, 40, 10, 30, 20, 90, 50, 70, 60, 80];
        for (i, &latency) in latencies.iter().enumerate() {
            analytics.on_arrive(&b, NodeId::from_index(i), latency);
        }
        let rows = analytics.retire_all();
        assert_eq!(rows[0].latencies, latencies.to_vec());

        let summary = analytics.summary();
        assert_eq!(summary.average_50, 20.0);
        assert_eq!(summary.average_90, 60.0);
        assert_eq!(summary.average_100, 80.0);
        assert!((summary.average_mean - 45.0).abs() < 1e-9);
        assert!((summary.average_hashrate_weighted - 45.0).abs() < 1e-9);
    }

    #[test]
    fn repeated_arrival_overwrites_latency() {
        let mut analytics = analytics(2);
        let b = block(0, 1, 0);

        analytics.on_arrive(&b, 1.into(), 0);
        analytics.on_arrive(&b, 2.into(), 30);
        analytics.on_arrive(&b, 2.into(), 50);

        let rows = analytics.retire_all();
        assert_eq!(rows[0].latencies, vec![0, 50]);
    }

    #[test]
    fn instant_propagation_is_fair() {
        let mut analytics = Analytics::new(600_000);
        for hashrate in [100, 200, 700] {
            analytics.add_node(hashrate);
        }
        for id in 0..3 {
            let b = block(id, id + 1, 0);
            for node in 1..=3u64 {
                analytics.on_arrive(&b, node.into(), 0);
            }
        }
        analytics.retire_all();

        for rate in WINNING_RATES {
            for value in analytics.calculate_fairness(rate) {
                assert!(value.abs() < 1e-9, "fairness {value}");
            }
        }
    }

    #[test]
    fn fairness_is_idempotent() {
        let mut analytics = analytics(3);
        for id in 0..6 {
            let b = block(id, id % 3 + 1, 0);
            for node in 1..=3u64 {
                analytics.on_arrive(&b, node.into(), node * 100 + id);
            }
        }
        analytics.retire_all();

        let first = analytics.compute_results();
        let second = analytics.compute_results();
        assert_eq!(first, second);
        assert_eq!(first.block_generation_count_list, vec![2, 2, 2]);
    }

    #[test]
    fn results_serialize_with_expected_keys() {
        let analytics = analytics(2);
        let json = serde_json::to_value(analytics.compute_results()).unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();

        assert_eq!(keys[0], "average-50-propagation-time");
        assert!(keys.contains(&"sum-base-fairness-win0.0".to_string()));
        assert!(keys.contains(&"fairness-list-win0.5".to_string()));
        assert!(keys.contains(&"min-base-fairness-win1.0".to_string()));
        assert_eq!(keys.last().unwrap(), "block-generation-count-list");
    }
}
