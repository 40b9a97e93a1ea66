//! Building and running block propagation simulations.

use std::{collections::BTreeSet, fmt::Display, num::NonZeroUsize};

use rand_chacha::ChaCha8Rng;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{debug, info, trace};

use crate::{
    analytics::{Analytics, FinalResults},
    block::BlockId,
    blockchain::BlockInsertionError,
    config::SimulationConfig,
    network::Network,
    node::{Context, Node, NodeId, NodeParams},
    recorder::{Event, NullRecorder, Recorder},
    results::ResultsBuilder,
    scheduler::Scheduler,
    settings::{ChurnPolicy, FailedBlockSizes, Settings},
    task::{Message, MessageKind, Task},
};

pub mod builder;

pub use builder::{SimulationBuildError, SimulationBuilder};

/// Chain heights at which the network graph is written out, besides every
/// multiple of this value.
pub const GRAPH_DUMP_PERIOD: u64 = 100;

/// A single discrete-event simulation of block propagation. Created with
/// [SimulationBuilder].
pub struct Simulation {
    config: SimulationConfig,
    settings: Settings,
    network: Network,
    scheduler: Scheduler,
    analytics: Analytics,
    rng: ChaCha8Rng,
    recorder: Box<dyn Recorder>,
    control_failure_sizes: FailedBlockSizes,
    churn_failure_sizes: FailedBlockSizes,
    max_tasks: Option<u64>,
    seed: u64,
    stream: u64,
}

/// Whether a block ended up on the main chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    OnChain,
    Orphan,
}

impl Display for ChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnChain => write!(f, "OnChain"),
            Self::Orphan => write!(f, "Orphan"),
        }
    }
}

/// Entry of the final block list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockListEntry {
    pub status: ChainStatus,
    pub height: u64,
    pub id: BlockId,
    pub time: u64,
}

impl Display for BlockListEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} : {} : {}", self.status, self.height, self.id)
    }
}

/// Number of executed tasks by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub minting: u64,
    pub messages: u64,
    pub churn: u64,
}

impl TaskCounts {
    pub fn total(&self) -> u64 {
        self.minting + self.messages + self.churn
    }
}

/// Contains the output data from a [Simulation].
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub seed: u64,
    /// Random stream of a repeated run; 0 for a single run.
    pub stream: u64,
    pub network: Network,
    pub results: FinalResults,
    pub block_list: Vec<BlockListEntry>,
    /// Simulated time (ms) of the last executed task.
    pub end_time: u64,
    pub tasks: TaskCounts,
    /// Mean number of orphans known per node.
    pub average_orphans: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("block could not be minted")]
    BlockInsertionError(#[from] BlockInsertionError),
    #[error(transparent)]
    BuildError(#[from] SimulationBuildError),
}

impl Simulation {
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn analytics(&self) -> &Analytics {
        &self.analytics
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Splits the simulation into its nodes and the context handed to them.
    fn split(&mut self) -> (&mut [Node], Context<'_>) {
        let Simulation {
            network: Network { nodes, blocks, consensus, total_weight },
            scheduler,
            analytics,
            rng,
            recorder,
            config,
            settings,
            control_failure_sizes,
            churn_failure_sizes,
            ..
        } = self;

        let ctx = Context {
            scheduler,
            blocks,
            analytics,
            recorder: &mut **recorder,
            rng,
            consensus: &**consensus,
            total_weight,
            config,
            settings,
            control_failure_sizes,
            churn_failure_sizes,
        };

        (nodes, ctx)
    }

    /// Mints the genesis block at the first node and schedules the first
    /// reachability toggle of every churn node.
    fn start(&mut self) -> Result<(), BlockInsertionError> {
        let (nodes, mut ctx) = self.split();
        let Some(first) = nodes.first_mut() else {
            return Ok(());
        };

        let size = ctx.settings.block_size.sample(ctx.rng);
        let genesis = ctx.blocks.genesis(first.id(), 0, size)?;
        first.receive_block(&mut ctx, genesis);

        for node in nodes.iter_mut() {
            node.start_churn(&mut ctx);
        }

        Ok(())
    }

    /// Creates an identical copy of this simulation drawing from another
    /// random stream.
    pub fn fork(&self, stream: u64, recorder: Box<dyn Recorder>) -> Simulation {
        let mut rng = self.rng.clone();
        rng.set_stream(stream);

        Simulation {
            config: self.config.clone(),
            settings: self.settings.clone(),
            network: self.network.clone(),
            scheduler: self.scheduler.clone(),
            analytics: self.analytics.clone(),
            rng,
            recorder,
            control_failure_sizes: self.control_failure_sizes.clone(),
            churn_failure_sizes: self.churn_failure_sizes.clone(),
            max_tasks: self.max_tasks,
            seed: self.seed,
            stream,
        }
    }

    /// Adds a node to the network, connecting it as described in
    /// [Network::add_node_with_connection].
    pub fn add_node_with_connection(&mut self, params: NodeParams) -> NodeId {
        let power = params.mining_power;
        let id = self.network.add_node_with_connection(
            params,
            &self.settings,
            &mut self.rng,
            self.recorder.as_mut(),
        );
        self.analytics.add_node(power);

        let (nodes, mut ctx) = self.split();
        nodes[id.index()].start_churn(&mut ctx);

        id
    }

    /// Disconnects a node from the network.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        self.network.remove_node(id)
    }

    /// Executes tasks until minting would start above the configured end
    /// height, the task limit is reached, or no task is left.
    pub fn run(mut self) -> Result<SimulationOutput, SimulationError> {
        let end_height = self.config.end_block_height;
        let mut current_height = 1;
        let mut last_dump = None;
        let mut counts = TaskCounts::default();

        info!(
            seed = self.seed,
            stream = self.stream,
            nodes = self.network.len(),
            end_height,
            "simulation started"
        );

        while let Some((_, task)) = self.scheduler.peek() {
            if let Task::Minting { parent, .. } = task {
                if self.network.blocks[*parent].height == current_height {
                    current_height += 1;
                }
                if current_height > end_height {
                    break;
                }
                if (current_height % GRAPH_DUMP_PERIOD == 0 || current_height == 2)
                    && last_dump != Some(current_height)
                {
                    self.dump_graph(current_height);
                    last_dump = Some(current_height);
                }
            }
            if self.max_tasks.is_some_and(|max| counts.total() >= max) {
                debug!(tasks = counts.total(), "task limit reached");
                break;
            }

            let Some((_, task)) = self.scheduler.pop() else {
                break;
            };
            self.execute(task, &mut counts)?;
        }

        Ok(self.finish(counts))
    }

    fn dump_graph(&mut self, height: u64) {
        info!(height, time = self.scheduler.current_time(), "chain height reached");
        let edges = self.network.edges();
        self.recorder.graph(height, &edges);
    }

    fn execute(
        &mut self,
        task: Task,
        counts: &mut TaskCounts,
    ) -> Result<(), SimulationError> {
        let (nodes, mut ctx) = self.split();

        match task {
            Task::Minting { minter, parent } => {
                counts.minting += 1;
                nodes[minter.index()].mint(&mut ctx, parent)?;
            }
            Task::Message(message) => {
                counts.messages += 1;
                deliver(nodes, &mut ctx, message);
            }
            Task::Churn { node } => {
                counts.churn += 1;
                nodes[node.index()].toggle_online(&mut ctx);
            }
        }

        Ok(())
    }

    fn finish(mut self, tasks: TaskCounts) -> SimulationOutput {
        for row in self.analytics.retire_all() {
            self.recorder.propagation(&row);
        }
        let results = self.analytics.compute_results();
        self.recorder.results(&results);

        let block_list = self.block_list();
        self.recorder.block_list(&block_list);

        let orphans: usize =
            self.network.nodes.iter().map(|node| node.orphans().len()).sum();
        let average_orphans = match self.network.len() {
            0 => 0.0,
            n => orphans as f64 / n as f64,
        };

        let end_time = self.scheduler.current_time();
        self.recorder.record(&Event::SimulationEnd { timestamp: end_time });
        self.recorder.finish();

        info!(
            end_time,
            blocks = self.network.blocks.len(),
            average_orphans,
            tasks = tasks.total(),
            "simulation finished"
        );

        SimulationOutput {
            seed: self.seed,
            stream: self.stream,
            network: self.network,
            results,
            block_list,
            end_time,
            tasks,
            average_orphans,
        }
    }

    /// Blocks on the chain of the first node, followed by every orphan known
    /// to any node, sorted by minting time. Genesis is not listed.
    fn block_list(&self) -> Vec<BlockListEntry> {
        let blocks = &self.network.blocks;
        let tip = self.network.nodes.first().and_then(|node| node.current_block());
        let on_chain: BTreeSet<BlockId> = tip
            .map(|tip| blocks.ancestors_of(tip))
            .unwrap_or_default()
            .into_iter()
            .filter(|&id| blocks[id].parent.is_some())
            .collect();
        let orphans: BTreeSet<BlockId> = self
            .network
            .nodes
            .iter()
            .flat_map(|node| node.orphans().iter().copied())
            .filter(|id| !on_chain.contains(id))
            .collect();

        let entry = |id: BlockId, status| {
            let block = &blocks[id];
            BlockListEntry { status, height: block.height, id, time: block.time }
        };
        let mut list: Vec<_> = on_chain
            .iter()
            .map(|&id| entry(id, ChainStatus::OnChain))
            .chain(orphans.iter().map(|&id| entry(id, ChainStatus::Orphan)))
            .collect();
        list.sort_by_key(|entry| (entry.time, entry.id));

        list
    }
}

/// Delivers a message, applying the churn policy when the receiver is
/// offline. A finished transfer frees the sender's upload slot first.
fn deliver(nodes: &mut [Node], ctx: &mut Context, message: Message) {
    let to = message.to.id.index();

    if !nodes[to].is_online() {
        match ctx.settings.churn.policy {
            ChurnPolicy::Delay => {
                if let Some(at) = nodes[to].back_online_at() {
                    ctx.scheduler.schedule_at(Task::Message(message), at);
                    return;
                }
            }
            ChurnPolicy::Drop => {
                drop_message(nodes, ctx, message);
                return;
            }
        }
    }

    if message.kind.is_transfer() {
        nodes[message.from.id.index()].send_next(ctx);
    }
    nodes[to].receive_message(ctx, message);
}

fn drop_message(nodes: &mut [Node], ctx: &mut Context, message: Message) {
    let block = message.kind.block();
    trace!(from = %message.from.id, to = %message.to.id, %block, "message dropped");

    match message.kind {
        MessageKind::Block(_) | MessageKind::CompactBlock(_) => {
            nodes[message.from.id.index()].send_next(ctx);
            nodes[message.to.id.index()].release_download(block);
        }
        MessageKind::GetData(_) | MessageKind::GetBlockTxn { .. } => {
            nodes[message.from.id.index()].release_download(block);
        }
        MessageKind::Inv(_) => (),
    }
}

/// Container for a group of simulations which share their configuration.
/// Each seed builds one network; every network is then run `repeat_all`
/// times on distinct random streams. Runs execute in parallel.
#[derive(Debug, Clone)]
pub struct SimulationGroup {
    config: SimulationConfig,
    settings: Settings,
    seeds: Vec<u64>,
    repeat_all: NonZeroUsize,
}

impl SimulationGroup {
    pub fn new(config: SimulationConfig, settings: Settings) -> Self {
        let seeds = vec![settings.seed];

        SimulationGroup { config, settings, seeds, repeat_all: NonZeroUsize::MIN }
    }

    /// Build one network per seed instead of using the settings' seed.
    pub fn seeds<I: IntoIterator<Item = u64>>(mut self, seeds: I) -> Self {
        self.seeds = seeds.into_iter().collect();

        self
    }

    /// Run every network this many times.
    pub fn repeat_all(mut self, repeat_all: NonZeroUsize) -> Self {
        self.repeat_all = repeat_all;

        self
    }

    pub fn run_all(self) -> Result<ResultsBuilder, SimulationError> {
        let SimulationGroup { config, settings, seeds, repeat_all } = self;

        let mut sims = Vec::with_capacity(seeds.len() * repeat_all.get());
        for seed in seeds {
            let base = SimulationBuilder::new()
                .config(config.clone())
                .settings(settings.clone())
                .seed(seed)
                .build()?;

            for stream in 0..repeat_all.get() as u64 {
                sims.push(base.fork(stream, Box::new(NullRecorder)));
            }
        }

        #[cfg(feature = "rayon")]
        let outputs: Result<Vec<_>, _> =
            sims.into_par_iter().map(Simulation::run).collect();
        #[cfg(not(feature = "rayon"))]
        let outputs: Result<Vec<_>, _> =
            sims.into_iter().map(Simulation::run).collect();

        Ok(ResultsBuilder::new(outputs?, repeat_all))
    }
}
