use std::collections::BTreeMap;

use rand::{distributions::WeightedError, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    analytics::Analytics,
    blockchain::BlockInsertionError,
    config::{ConfigError, SimulationConfig},
    network::Network,
    node::{NodeId, NodeOverride},
    recorder::{NullRecorder, Recorder},
    scheduler::Scheduler,
    settings::{FailedBlockSizes, Settings},
    topology::TopologyError,
};

use super::Simulation;

/// Builds a [Simulation].
#[derive(Default)]
pub struct SimulationBuilder {
    config: Option<SimulationConfig>,
    settings: Option<Settings>,
    seed: Option<u64>,
    overrides: BTreeMap<NodeId, NodeOverride>,
    max_tasks: Option<u64>,
    recorder: Option<Box<dyn Recorder>>,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationBuildError {
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
    #[error("invalid topology")]
    TopologyError(#[from] TopologyError),
    #[error("invalid failed compact block size table")]
    WeightedIndexError(#[from] WeightedError),
    #[error("genesis block could not be created")]
    GenesisError(#[from] BlockInsertionError),
    #[error("override given for node {0}, which does not exist")]
    UnknownNode(NodeId),
    #[error("task limit must be greater than 0")]
    ZeroTaskLimit,
}

impl SimulationBuilder {
    /// Creates a new [SimulationBuilder].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the run parameters ([SimulationConfig::default] otherwise).
    pub fn config(mut self, config: SimulationConfig) -> Self {
        self.config = Some(config);

        self
    }

    /// Sets the static settings ([Settings::default] otherwise).
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);

        self
    }

    /// Seeds the random number generator, replacing the seed of the
    /// settings.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);

        self
    }

    /// Replaces sampled properties of node `id` while the network is built.
    /// Repeated calls for the same node are merged.
    pub fn node_override(mut self, id: NodeId, node_override: NodeOverride) -> Self {
        let entry = self.overrides.entry(id).or_default();
        let merged = NodeOverride {
            uses_compact_relay: node_override
                .uses_compact_relay
                .or(entry.uses_compact_relay),
            is_churn_node: node_override.is_churn_node.or(entry.is_churn_node),
            cbr_failure_rate: node_override
                .cbr_failure_rate
                .or(entry.cbr_failure_rate),
            mining_power: node_override.mining_power.or(entry.mining_power),
        };
        *entry = merged;

        self
    }

    /// Stops the run after this many executed tasks.
    pub fn max_tasks(mut self, max_tasks: u64) -> Self {
        self.max_tasks = Some(max_tasks);

        self
    }

    /// Sends the output of the run to `recorder` ([NullRecorder] otherwise).
    pub fn recorder<R: Recorder + 'static>(mut self, recorder: R) -> Self {
        self.recorder = Some(Box::new(recorder));

        self
    }

    /// Creates the network, mints the genesis block and returns a
    /// [Simulation] ready to run.
    pub fn build(self) -> Result<Simulation, SimulationBuildError> {
        use SimulationBuildError::*;

        let SimulationBuilder {
            config,
            settings,
            seed,
            overrides,
            max_tasks,
            recorder,
        } = self;

        let config = config.unwrap_or_default();
        config.validate()?;
        let settings = settings.unwrap_or_default();
        let seed = seed.unwrap_or(settings.seed);

        if max_tasks == Some(0) {
            return Err(ZeroTaskLimit);
        }
        if let Some(&id) = overrides
            .keys()
            .find(|id| id.get() == 0 || id.index() >= config.num_of_nodes)
        {
            return Err(UnknownNode(id));
        }

        let control_failure_sizes =
            FailedBlockSizes::new(settings.cbr_failure_sizes_for_control_node)?;
        let churn_failure_sizes =
            FailedBlockSizes::new(settings.cbr_failure_sizes_for_churn_node)?;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut recorder = recorder.unwrap_or_else(|| Box::new(NullRecorder));
        recorder.regions(&settings.topology.regions());

        let network = Network::build(
            &config,
            &settings,
            &overrides,
            &mut rng,
            recorder.as_mut(),
        )?;

        let mut analytics = Analytics::new(config.interval);
        for node in network.nodes() {
            analytics.add_node(node.mining_power());
        }

        let mut sim = Simulation {
            config,
            settings,
            network,
            scheduler: Scheduler::new(),
            analytics,
            rng,
            recorder,
            control_failure_sizes,
            churn_failure_sizes,
            max_tasks,
            seed,
            stream: 0,
        };
        sim.start()?;

        Ok(sim)
    }
}
