//! Construction and maintenance of the peer-to-peer network.

use std::collections::BTreeMap;

use rand::{seq::SliceRandom, Rng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::{
    blockchain::BlockTree,
    config::SimulationConfig,
    node::{
        consensus::Consensus, Node, NodeId, NodeOverride, NodeParams,
    },
    recorder::{Event, Recorder},
    settings::Settings,
    topology::{sample_assignment, sample_flags, DistributionKind, TopologyError},
    utils::standard_normal,
};

/// All nodes of a simulation together with the block tree they share.
#[derive(Debug, Clone)]
pub struct Network {
    pub(crate) nodes: Vec<Node>,
    pub(crate) blocks: BlockTree,
    pub(crate) consensus: Box<dyn Consensus>,
    /// Sum of the minting weights of all nodes.
    pub(crate) total_weight: f64,
}

impl Network {
    /// Builds a network of `config.num_of_nodes` nodes.
    ///
    /// Draws from `rng` in a fixed order: regions, degrees, compact relay
    /// flags, churn flags, mining power and weight per node, and finally the
    /// neighbour candidates of each node in id order.
    pub fn build(
        config: &SimulationConfig,
        settings: &Settings,
        overrides: &BTreeMap<NodeId, NodeOverride>,
        rng: &mut ChaCha8Rng,
        recorder: &mut dyn Recorder,
    ) -> Result<Self, TopologyError> {
        let n = config.num_of_nodes;
        let topology = &settings.topology;

        let regions = sample_assignment(
            rng,
            topology.region_distribution(),
            n,
            DistributionKind::PerBucket,
        )?;
        let degrees = sample_assignment(
            rng,
            topology.degree_distribution(),
            n,
            DistributionKind::Cumulative,
        )?;
        let compact = sample_flags(rng, config.cbr_usage_rate, n);
        let churn = sample_flags(rng, settings.churn_node_rate, n);

        let mut network = Network {
            nodes: Vec::with_capacity(n),
            blocks: BlockTree::new(),
            consensus: settings.consensus.build(),
            total_weight: 0.0,
        };

        for i in 0..n {
            let id = NodeId::from_index(i);
            let mut params = NodeParams {
                region: regions[i],
                degree: degrees[i] + 1,
                mining_power: sample_mining_power(rng, config),
                uses_compact_relay: compact[i],
                is_churn_node: churn[i],
                cbr_failure_rate: 0.0,
            };
            params.cbr_failure_rate = match params.is_churn_node {
                true => settings.cbr_failure_rate_for_churn_node,
                false => settings.cbr_failure_rate_for_control_node,
            };
            if let Some(node_override) = overrides.get(&id) {
                node_override.apply(&mut params);
            }

            network.push_node(params, settings, rng, recorder);
        }

        for i in 0..n {
            network.join(NodeId::from_index(i), rng, recorder);
        }
        debug!(nodes = n, links = network.edges().len(), "network built");

        Ok(network)
    }

    fn push_node(
        &mut self,
        params: NodeParams,
        settings: &Settings,
        rng: &mut ChaCha8Rng,
        recorder: &mut dyn Recorder,
    ) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        let weight = self.consensus.initial_weight(params.mining_power, rng);
        let routing = settings.routing_table.build(id, params.degree);

        recorder.record(&Event::AddNode {
            timestamp: 0,
            node_id: id,
            region_id: params.region,
        });
        self.total_weight += weight;
        self.nodes.push(Node::new(id, params, routing, weight));

        id
    }

    /// Fills the outbound connections of `id` from a shuffled list of every
    /// node.
    fn join(&mut self, id: NodeId, rng: &mut ChaCha8Rng, recorder: &mut dyn Recorder) {
        let mut candidates: Vec<usize> = (0..self.nodes.len()).collect();
        candidates.shuffle(rng);

        for candidate in candidates {
            if !self.nodes[id.index()].routing_table().has_outbound_capacity() {
                break;
            }
            self.connect(id, NodeId::from_index(candidate), recorder);
        }
    }

    /// Opens a connection from `from` to `to`. Returns false if `from`
    /// refuses it.
    pub fn connect(
        &mut self,
        from: NodeId,
        to: NodeId,
        recorder: &mut dyn Recorder,
    ) -> bool {
        if from == to || to.index() >= self.nodes.len() {
            return false;
        }

        let from_peer = self.nodes[from.index()].peer();
        let to_peer = self.nodes[to.index()].peer();
        let table = self.nodes[from.index()].routing_table_mut();
        if !table.add_outbound(to_peer) {
            return false;
        }
        if table.is_symmetric() {
            self.nodes[to.index()].routing_table_mut().add_inbound(from_peer);
        }

        recorder.record(&Event::AddLink {
            timestamp: 0,
            begin_node_id: from,
            end_node_id: to,
        });
        true
    }

    /// Adds a node to a running network. The new node fills its outbound
    /// connections first; afterwards every existing node with free capacity
    /// connects to it.
    pub fn add_node_with_connection(
        &mut self,
        params: NodeParams,
        settings: &Settings,
        rng: &mut ChaCha8Rng,
        recorder: &mut dyn Recorder,
    ) -> NodeId {
        let id = self.push_node(params, settings, rng, recorder);
        self.join(id, rng, recorder);

        for i in 0..self.nodes.len() - 1 {
            self.connect(NodeId::from_index(i), id, recorder);
        }

        id
    }

    /// Disconnects `id` from every other node. The node itself keeps its
    /// state and keeps minting in isolation.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        if id.index() >= self.nodes.len() {
            return false;
        }

        for node in &mut self.nodes {
            node.routing_table_mut().remove(id);
        }
        self.nodes[id.index()].routing_table_mut().clear();

        true
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn blocks(&self) -> &BlockTree {
        &self.blocks
    }

    pub fn consensus(&self) -> &dyn Consensus {
        self.consensus.as_ref()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Directed adjacency: one `(node, neighbour)` pair per relay direction.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.neighbors().into_iter().map(move |peer| (node.id(), peer))
            })
            .collect()
    }
}

/// `max(round_down(N(average, stdev)), 1)`
fn sample_mining_power<R: Rng + ?Sized>(rng: &mut R, config: &SimulationConfig) -> u64 {
    let power = standard_normal(rng) * config.stdev_of_mining_power as f64
        + config.average_mining_power as f64;

    (power as i64).max(1) as u64
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::recorder::{MemoryRecorder, NullRecorder};

    fn config(n: usize) -> SimulationConfig {
        SimulationConfig { num_of_nodes: n, ..Default::default() }
    }

    fn build(n: usize, seed: u64) -> Network {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Network::build(
            &config(n),
            &Settings::default(),
            &BTreeMap::new(),
            &mut rng,
            &mut NullRecorder,
        )
        .unwrap()
    }

    #[test]
    fn links_are_valid_and_symmetric() {
        let network = build(50, 1);

        for node in network.nodes() {
            let table = node.routing_table();
            let outbound = table.outbound();
            assert!(outbound.len() <= table.target_degree());
            assert!(outbound.iter().all(|peer| peer.id != node.id()));

            for peer in outbound {
                let other = network.node(peer.id).unwrap();
                assert!(other.neighbors().contains(&node.id()));
            }

            let mut neighbors = node.neighbors();
            neighbors.sort();
            neighbors.dedup();
            assert_eq!(neighbors.len(), node.neighbors().len());
        }
    }

    #[test]
    fn construction_is_deterministic() {
        let a = build(40, 7);
        let b = build(40, 7);

        assert_eq!(a.edges(), b.edges());
        let params = |n: &Network| {
            n.nodes().iter().map(|node| node.params().clone()).collect::<Vec<_>>()
        };
        assert_eq!(params(&a), params(&b));
    }

    #[test]
    fn overrides_and_late_joins() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut recorder = MemoryRecorder::new();
        let overrides = BTreeMap::from([(
            NodeId::from(2),
            NodeOverride::default().compact_relay(false).mining_power(1),
        )]);
        let settings = Settings::default();
        let mut network = Network::build(
            &config(10),
            &settings,
            &overrides,
            &mut rng,
            &mut recorder,
        )
        .unwrap();

        let node = network.node(2.into()).unwrap();
        assert!(!node.uses_compact_relay());
        assert_eq!(node.mining_power(), 1);
        assert!(network.nodes().iter().all(|node| node.mining_power() >= 1));

        let params = network.node(1.into()).unwrap().params().clone();
        let id = network.add_node_with_connection(
            params,
            &settings,
            &mut rng,
            &mut recorder,
        );
        assert_eq!(id, NodeId::from(11));
        assert!(!network.node(id).unwrap().neighbors().is_empty());

        assert!(network.remove_node(id));
        assert!(network.node(id).unwrap().neighbors().is_empty());
        assert!(network.edges().iter().all(|&(a, b)| a != id && b != id));

        let added = recorder
            .events
            .iter()
            .filter(|e| matches!(e, Event::AddNode { .. }))
            .count();
        assert_eq!(added, 11);
    }
}
