/*!
Discrete-event simulator of block propagation in a peer-to-peer blockchain
network.

Nodes placed in geographic regions mint blocks and relay them to their
neighbours with inv/getdata announcements and full or compact block
transfers. The simulator measures how long blocks take to reach the network
and how fair the resulting block rewards are with respect to hash power.

```no_run
use blockprop_sim::prelude::*;

let output = SimulationBuilder::new()
    .config(SimulationConfig::default())
    .recorder(MemoryRecorder::new())
    .build()
    .unwrap()
    .run()
    .unwrap();

println!("{}", serde_json::to_string_pretty(&output.results).unwrap());
```
*/

pub mod analytics;
pub mod block;
pub mod blockchain;
pub mod config;
pub mod network;
pub mod node;
pub mod prelude;
pub mod recorder;
pub mod results;
pub mod scheduler;
pub mod settings;
pub mod simulation;
pub mod task;
pub mod topology;

pub(crate) mod utils;
