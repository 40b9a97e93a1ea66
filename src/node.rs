//! Simulated peer nodes and the block relay protocol they run.
//!
//! Nodes never own blocks: they refer to blocks in the shared
//! [BlockTree](crate::blockchain::BlockTree) by [BlockId], and every side
//! effect of a protocol step (scheduling, analytics, events) goes through a
//! [Context] borrowed from the running simulation.

pub mod consensus;
pub mod routing;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::trace;

use crate::{
    analytics::Analytics,
    block::BlockId,
    blockchain::{BlockInsertionError, BlockTree},
    config::SimulationConfig,
    recorder::{Event, Recorder},
    scheduler::{Scheduler, TaskId},
    settings::{FailedBlockSizes, Settings},
    task::{Message, MessageKind, Task},
    topology::RegionId,
    utils::exponential_ms,
};

use consensus::Consensus;
use routing::{Peer, RoutingTable};

/// A unique identifier assigned to each [Node]. Ids start at 1 and follow
/// creation order.
#[derive(
    Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize,
)]
pub struct NodeId(u64);

impl NodeId {
    pub fn get(&self) -> u64 {
        self.0
    }

    /// Position of the node in its network.
    ///
    /// ## Panics
    /// Panics in debug builds for the invalid id 0.
    #[inline]
    pub fn index(&self) -> usize {
        (self.0 - 1) as usize
    }

    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        NodeId(index as u64 + 1)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static properties of a node, decided when the network is built.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeParams {
    pub region: RegionId,
    /// Target number of outbound connections.
    pub degree: usize,
    pub mining_power: u64,
    pub uses_compact_relay: bool,
    pub is_churn_node: bool,
    /// Probability that a compact block fails to reconstruct at this node.
    pub cbr_failure_rate: f64,
}

/// Per-node replacement of sampled [NodeParams], applied while the network is
/// built.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeOverride {
    pub uses_compact_relay: Option<bool>,
    pub is_churn_node: Option<bool>,
    pub cbr_failure_rate: Option<f64>,
    pub mining_power: Option<u64>,
}

impl NodeOverride {
    pub fn compact_relay(mut self, enabled: bool) -> Self {
        self.uses_compact_relay = Some(enabled);

        self
    }

    pub fn churn(mut self, is_churn_node: bool) -> Self {
        self.is_churn_node = Some(is_churn_node);

        self
    }

    pub fn cbr_failure_rate(mut self, rate: f64) -> Self {
        self.cbr_failure_rate = Some(rate);

        self
    }

    pub fn mining_power(mut self, power: u64) -> Self {
        self.mining_power = Some(power);

        self
    }

    pub(crate) fn apply(&self, params: &mut NodeParams) {
        if let Some(enabled) = self.uses_compact_relay {
            params.uses_compact_relay = enabled;
        }
        if let Some(churn) = self.is_churn_node {
            params.is_churn_node = churn;
        }
        if let Some(rate) = self.cbr_failure_rate {
            params.cbr_failure_rate = rate;
        }
        if let Some(power) = self.mining_power {
            params.mining_power = power;
        }
    }
}

/// Everything a node touches while handling a task, borrowed from the
/// running simulation.
pub(crate) struct Context<'a> {
    pub scheduler: &'a mut Scheduler,
    pub blocks: &'a mut BlockTree,
    pub analytics: &'a mut Analytics,
    pub recorder: &'a mut dyn Recorder,
    pub rng: &'a mut ChaCha8Rng,
    pub consensus: &'a dyn Consensus,
    pub total_weight: &'a mut f64,
    pub config: &'a SimulationConfig,
    pub settings: &'a Settings,
    pub control_failure_sizes: &'a FailedBlockSizes,
    pub churn_failure_sizes: &'a FailedBlockSizes,
}

impl Context<'_> {
    #[inline]
    pub fn now(&self) -> u64 {
        self.scheduler.current_time()
    }

    /// Feeds an arrival into the propagation window, recording any record
    /// retired to make room for it.
    pub fn arrive(&mut self, block: BlockId, node: NodeId) {
        let now = self.now();
        if let Some(row) = self.analytics.on_arrive(&self.blocks[block], node, now)
        {
            self.recorder.propagation(&row);
        }
    }

    pub fn send(&mut self, from: Peer, to: Peer, kind: MessageKind, delay: u64) {
        let sent_at = self.now();
        self.scheduler
            .schedule(Task::Message(Message { from, to, sent_at, kind }), delay);
    }

    /// Network delay of a control message between two regions.
    pub fn control_latency(&mut self, from: RegionId, to: RegionId) -> u64 {
        self.settings.topology.latency(self.rng, from, to)
            + self.settings.message_overhead
    }
}

/// A simulated peer: chain view, relay state and reachability.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    params: NodeParams,
    /// Current minting weight (hash power or stake).
    weight: f64,
    routing: Box<dyn RoutingTable>,
    current_block: Option<BlockId>,
    orphans: BTreeSet<BlockId>,
    /// Blocks requested but not yet received.
    downloading: BTreeSet<BlockId>,
    /// Neighbours which announced a block this node is downloading.
    announced_by: BTreeMap<BlockId, Vec<NodeId>>,
    /// Pending block requests, served one at a time.
    send_queue: VecDeque<Message>,
    sending: bool,
    online: bool,
    minting_task: Option<TaskId>,
    churn_task: Option<TaskId>,
}

impl Node {
    pub fn new(
        id: NodeId,
        params: NodeParams,
        routing: Box<dyn RoutingTable>,
        weight: f64,
    ) -> Self {
        Node {
            id,
            params,
            weight,
            routing,
            current_block: None,
            orphans: BTreeSet::new(),
            downloading: BTreeSet::new(),
            announced_by: BTreeMap::new(),
            send_queue: VecDeque::new(),
            sending: false,
            online: true,
            minting_task: None,
            churn_task: None,
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn params(&self) -> &NodeParams {
        &self.params
    }

    #[inline]
    pub fn region(&self) -> RegionId {
        self.params.region
    }

    #[inline]
    pub fn mining_power(&self) -> u64 {
        self.params.mining_power
    }

    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    #[inline]
    pub fn uses_compact_relay(&self) -> bool {
        self.params.uses_compact_relay
    }

    #[inline]
    pub fn is_churn_node(&self) -> bool {
        self.params.is_churn_node
    }

    #[inline]
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Whether the upload slot is taken by a transfer in flight.
    #[inline]
    pub(crate) fn is_sending(&self) -> bool {
        self.sending
    }

    /// Tip of this node's chain.
    #[inline]
    pub fn current_block(&self) -> Option<BlockId> {
        self.current_block
    }

    /// Known blocks off this node's chain.
    #[inline]
    pub fn orphans(&self) -> &BTreeSet<BlockId> {
        &self.orphans
    }

    #[inline]
    pub fn is_downloading(&self, block: BlockId) -> bool {
        self.downloading.contains(&block)
    }

    pub fn routing_table(&self) -> &dyn RoutingTable {
        self.routing.as_ref()
    }

    pub(crate) fn routing_table_mut(&mut self) -> &mut dyn RoutingTable {
        self.routing.as_mut()
    }

    pub fn neighbors(&self) -> Vec<NodeId> {
        self.routing.neighbors().iter().map(|peer| peer.id).collect()
    }

    /// How this node presents itself to its neighbours.
    pub fn peer(&self) -> Peer {
        Peer {
            id: self.id,
            region: self.params.region,
            uses_compact_relay: self.params.uses_compact_relay,
        }
    }

    /// Simulated time at which an offline node becomes reachable again.
    pub(crate) fn back_online_at(&self) -> Option<u64> {
        match self.online {
            true => None,
            false => self.churn_task.map(|task| task.fire_time()),
        }
    }

    /// Mints a block on `parent` once a minting task fires.
    pub(crate) fn mint(
        &mut self,
        ctx: &mut Context,
        parent: BlockId,
    ) -> Result<BlockId, BlockInsertionError> {
        self.minting_task = None;

        let now = ctx.now();
        let size = ctx.settings.block_size.sample(ctx.rng);
        let block = ctx.blocks.mint(parent, self.id, now, size)?;

        let weight = ctx.consensus.rewarded_weight(self.weight);
        *ctx.total_weight += weight - self.weight;
        self.weight = weight;

        trace!(node = %self.id, %block, "minted block");
        self.receive_block(ctx, block);

        Ok(block)
    }

    /// Adopts `block` if it beats the current tip, otherwise keeps it as an
    /// orphan when it lies on another branch.
    pub(crate) fn receive_block(&mut self, ctx: &mut Context, block: BlockId) {
        let announced = self.announced_by.remove(&block).unwrap_or_default();
        let received = &ctx.blocks[block];
        let current = self.current_block.map(|id| &ctx.blocks[id]);

        if ctx.consensus.is_preferred(received, current) {
            self.add_orphans(ctx.blocks, self.current_block, Some(block));
            self.add_to_chain(ctx, block);
            self.start_minting(ctx);
            self.announce(ctx, block, &announced);
        } else if !self.orphans.contains(&block)
            && self
                .current_block
                .map_or(true, |current| !ctx.blocks.is_on_same_chain(block, current))
        {
            self.add_orphans(ctx.blocks, Some(block), self.current_block);
            ctx.arrive(block, self.id);
        }
    }

    /// Walks the branches of `orphan` and `valid` down to their common
    /// ancestor, marking blocks on the first as orphans and unmarking blocks
    /// on the second. Nothing is marked when `orphan` is an ancestor of
    /// `valid`.
    fn add_orphans(
        &mut self,
        blocks: &BlockTree,
        mut orphan: Option<BlockId>,
        mut valid: Option<BlockId>,
    ) {
        while let Some(o) = orphan {
            if Some(o) == valid {
                break;
            }
            if let Some(v) = valid {
                self.orphans.remove(&v);
            }

            let orphan_height = blocks[o].height;
            match valid.map(|v| blocks[v].height) {
                Some(h) if h > orphan_height => {
                    valid = valid.and_then(|v| blocks.parent_of(v));
                }
                Some(h) if h == orphan_height => {
                    self.orphans.insert(o);
                    orphan = blocks.parent_of(o);
                    valid = valid.and_then(|v| blocks.parent_of(v));
                }
                _ => {
                    self.orphans.insert(o);
                    orphan = blocks.parent_of(o);
                }
            }
        }
    }

    fn add_to_chain(&mut self, ctx: &mut Context, block: BlockId) {
        if let Some(task) = self.minting_task.take() {
            ctx.scheduler.cancel(task);
        }
        self.current_block = Some(block);

        let timestamp = ctx.now();
        ctx.recorder.record(&Event::AddBlock {
            timestamp,
            node_id: self.id,
            block_id: block,
        });
        ctx.arrive(block, self.id);
    }

    fn start_minting(&mut self, ctx: &mut Context) {
        let Some(parent) = self.current_block else {
            return;
        };

        let delay = ctx.consensus.minting_delay(
            ctx.rng,
            self.weight,
            *ctx.total_weight,
            ctx.config.interval,
        );
        if let Some(delay) = delay {
            let task = Task::Minting { minter: self.id, parent };
            self.minting_task = Some(ctx.scheduler.schedule(task, delay));
        }
    }

    /// Sends an inv for `block` to every neighbour which did not announce it
    /// first. Gossip-penalised invs are slowed down by the penalty rate.
    fn announce(&mut self, ctx: &mut Context, block: BlockId, skip: &[NodeId]) {
        let me = self.peer();
        for peer in self.routing.neighbors() {
            if skip.contains(&peer.id) {
                continue;
            }

            let mut latency = ctx.control_latency(me.region, peer.region);
            if ctx.rng.gen::<f64>() >= ctx.config.gossip_probability {
                latency = (latency as f64
                    * (1.0 + ctx.config.gossip_penalty_rate))
                    .round() as u64;
            }
            ctx.send(me, peer, MessageKind::Inv(block), latency);
        }
    }

    /// Handles a message delivered to this node.
    pub(crate) fn receive_message(&mut self, ctx: &mut Context, message: Message) {
        let block = message.kind.block();

        match message.kind {
            MessageKind::Inv(_) => self.receive_inv(ctx, message.from, block),
            MessageKind::GetData(_) | MessageKind::GetBlockTxn { .. } => {
                self.send_queue.push_back(message);
                if !self.sending {
                    self.send_next(ctx);
                }
            }
            MessageKind::CompactBlock(_) => {
                record_flow(ctx, &message);

                if ctx.rng.gen::<f64>() >= self.params.cbr_failure_rate {
                    self.downloading.remove(&block);
                    self.receive_block(ctx, block);
                } else {
                    let sizes = match self.params.is_churn_node {
                        true => ctx.churn_failure_sizes,
                        false => ctx.control_failure_sizes,
                    };
                    let missing = sizes.sample(ctx.rng, ctx.blocks[block].size);
                    trace!(node = %self.id, %block, missing, "compact block failed");

                    let me = self.peer();
                    let latency = ctx.control_latency(me.region, message.from.region);
                    let kind = MessageKind::GetBlockTxn { block, missing };
                    ctx.send(me, message.from, kind, latency);
                }
            }
            MessageKind::Block(_) => {
                record_flow(ctx, &message);

                self.downloading.remove(&block);
                self.receive_block(ctx, block);
            }
        }
    }

    fn receive_inv(&mut self, ctx: &mut Context, from: Peer, block: BlockId) {
        if self.orphans.contains(&block) {
            return;
        }
        if self.downloading.contains(&block) {
            self.announced_by.entry(block).or_default().push(from.id);
            return;
        }

        let announced = &ctx.blocks[block];
        let current = self.current_block.map(|id| &ctx.blocks[id]);
        let wanted = ctx.consensus.is_preferred(announced, current)
            || self
                .current_block
                .map_or(true, |current| !ctx.blocks.is_on_same_chain(block, current));

        if wanted {
            self.announced_by.entry(block).or_default().push(from.id);
            self.downloading.insert(block);

            let me = self.peer();
            let latency = ctx.control_latency(me.region, from.region);
            ctx.send(me, from, MessageKind::GetData(block), latency);
        }
    }

    /// Serves the next queued block request, or marks the upload slot free.
    /// Both ends supporting compact relay get a compact block.
    pub(crate) fn send_next(&mut self, ctx: &mut Context) {
        while let Some(request) = self.send_queue.pop_front() {
            let to = request.from;
            let (kind, size) = match request.kind {
                MessageKind::GetData(block)
                    if self.params.uses_compact_relay && to.uses_compact_relay =>
                {
                    (
                        MessageKind::CompactBlock(block),
                        ctx.settings.compact_block_size,
                    )
                }
                MessageKind::GetData(block) => {
                    (MessageKind::Block(block), ctx.blocks[block].size)
                }
                MessageKind::GetBlockTxn { block, missing } => {
                    (MessageKind::Block(block), missing)
                }
                _ => continue,
            };

            let bandwidth = ctx.settings.topology.bandwidth(self.params.region, to.region);
            let bits_per_ms = (bandwidth / 1000).max(1);
            let delay = size * 8 / bits_per_ms + ctx.settings.processing_time;
            let latency = ctx.settings.topology.latency(ctx.rng, self.params.region, to.region);

            ctx.send(self.peer(), to, kind, latency + delay);
            self.sending = true;
            return;
        }

        self.sending = false;
    }

    /// Forgets a pending download whose transfer was lost.
    pub(crate) fn release_download(&mut self, block: BlockId) {
        self.downloading.remove(&block);
        self.announced_by.remove(&block);
    }

    /// Schedules the first reachability toggle of a churn node.
    pub(crate) fn start_churn(&mut self, ctx: &mut Context) {
        let churn = ctx.settings.churn;
        if !self.params.is_churn_node || !churn.is_enabled() {
            return;
        }

        let delay = exponential_ms(ctx.rng, churn.mean_online).max(1);
        let task = Task::Churn { node: self.id };
        self.churn_task = Some(ctx.scheduler.schedule(task, delay));
    }

    /// Flips reachability and schedules the next flip.
    pub(crate) fn toggle_online(&mut self, ctx: &mut Context) {
        self.online = !self.online;
        trace!(node = %self.id, online = self.online, "churn");

        let churn = ctx.settings.churn;
        let mean = match self.online {
            true => churn.mean_online,
            false => churn.mean_offline,
        };
        let delay = exponential_ms(ctx.rng, mean).max(1);
        let task = Task::Churn { node: self.id };
        self.churn_task = Some(ctx.scheduler.schedule(task, delay));
    }
}

fn record_flow(ctx: &mut Context, message: &Message) {
    let reception_timestamp = ctx.now();
    ctx.recorder.record(&Event::FlowBlock {
        transmission_timestamp: message.sent_at,
        reception_timestamp,
        begin_node_id: message.from.id,
        end_node_id: message.to.id,
        block_id: message.kind.block(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::routing::RoutingTableKind;

    fn node() -> Node {
        let params = NodeParams {
            region: 0,
            degree: 2,
            mining_power: 10,
            uses_compact_relay: true,
            is_churn_node: false,
            cbr_failure_rate: 0.0,
        };
        let id = NodeId::from(1);
        Node::new(id, params, RoutingTableKind::BitcoinCore.build(id, 2), 10.0)
    }

    #[test]
    fn node_ids_map_to_indices() {
        assert_eq!(NodeId::from(1).index(), 0);
        assert_eq!(NodeId::from_index(4), NodeId::from(5));
        assert_eq!(NodeId::from(7).to_string(), "7");
    }

    #[test]
    fn overrides_replace_sampled_params() {
        let mut params = node().params().clone();
        NodeOverride::default()
            .compact_relay(false)
            .cbr_failure_rate(1.0)
            .apply(&mut params);

        assert!(!params.uses_compact_relay);
        assert_eq!(params.cbr_failure_rate, 1.0);
        assert!(!params.is_churn_node);
    }

    #[test]
    fn orphan_walk_stops_at_common_ancestor() {
        // 0 <- 1 <- 2 <- 3
        //        \- 4
        let mut tree = BlockTree::new();
        let minter = NodeId::from(1);
        let g = tree.genesis(minter, 0, 1).unwrap();
        let a = tree.mint(g, minter, 1, 1).unwrap();
        let b = tree.mint(a, minter, 2, 1).unwrap();
        let c = tree.mint(b, minter, 3, 1).unwrap();
        let d = tree.mint(a, minter, 3, 1).unwrap();

        let mut node = node();
        node.add_orphans(&tree, Some(d), Some(c));
        assert_eq!(node.orphans().iter().copied().collect::<Vec<_>>(), vec![d]);

        node.add_orphans(&tree, Some(c), Some(d));
        assert_eq!(node.orphans().iter().copied().collect::<Vec<_>>(), vec![b, c]);

        // Extending the tip through a former orphan unmarks it.
        let e = tree.mint(b, minter, 4, 1).unwrap();
        let f = tree.mint(e, minter, 5, 1).unwrap();
        node.add_orphans(&tree, Some(a), Some(f));
        assert_eq!(node.orphans().iter().copied().collect::<Vec<_>>(), vec![c]);
    }
}
