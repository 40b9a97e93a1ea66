/*!
Re-export of common values and datatypes used for running and analyzing
simulations. Must be imported manually.

```
use blockprop_sim::prelude::*;
```
*/

use crate::{
    analytics, block, blockchain, config, network, node, recorder, results,
    settings, simulation, topology,
};

pub use analytics::{Analytics, FinalResults, PropagationRow};

pub use block::{Block, BlockId};

pub use blockchain::{BlockInsertionError, BlockTree};

pub use config::{ConfigError, SimulationConfig};

pub use network::Network;

pub use node::{
    consensus::{Consensus, ConsensusKind, ProofOfStake, ProofOfWork},
    routing::{Peer, RoutingTable, RoutingTableKind},
    Node, NodeId, NodeOverride, NodeParams,
};

pub use recorder::{
    Event, FileRecorder, MemoryRecorder, NullRecorder, Recorder, SharedRecorder,
};

pub use results::{Average, Format, ResultsBuilder, ResultsTable};

pub use settings::{BlockSize, ChurnPolicy, ChurnSettings, Settings};

pub use simulation::{
    BlockListEntry, ChainStatus, Simulation, SimulationBuildError,
    SimulationBuilder, SimulationError, SimulationGroup, SimulationOutput,
};

pub use topology::{Topology, TopologyError};
