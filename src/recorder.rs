//! Sinks for everything a simulation run reports: visualisation events,
//! propagation rows, graph snapshots, the final results and the block list.

pub mod file;

pub use file::FileRecorder;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::{
    analytics::{FinalResults, PropagationRow},
    block::BlockId,
    node::NodeId,
    simulation::BlockListEntry,
    topology::{RegionId, RegionInfo},
};

/// Visualisation event emitted while a simulation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "content", rename_all = "kebab-case")]
pub enum Event {
    #[serde(rename_all = "kebab-case")]
    AddNode { timestamp: u64, node_id: NodeId, region_id: RegionId },
    #[serde(rename_all = "kebab-case")]
    AddLink { timestamp: u64, begin_node_id: NodeId, end_node_id: NodeId },
    #[serde(rename_all = "kebab-case")]
    AddBlock { timestamp: u64, node_id: NodeId, block_id: BlockId },
    #[serde(rename_all = "kebab-case")]
    FlowBlock {
        transmission_timestamp: u64,
        reception_timestamp: u64,
        begin_node_id: NodeId,
        end_node_id: NodeId,
        block_id: BlockId,
    },
    #[serde(rename_all = "kebab-case")]
    SimulationEnd { timestamp: u64 },
}

/// Receives the output of a simulation run. Every method defaults to doing
/// nothing.
pub trait Recorder: Send {
    fn record(&mut self, _event: &Event) {}

    /// A block left the propagation window.
    fn propagation(&mut self, _row: &PropagationRow) {}

    /// Directed adjacency of the network when the chain reached `height`.
    fn graph(&mut self, _height: u64, _edges: &[(NodeId, NodeId)]) {}

    /// Static region listing.
    fn regions(&mut self, _regions: &[RegionInfo]) {}

    fn results(&mut self, _results: &FinalResults) {}

    fn block_list(&mut self, _entries: &[BlockListEntry]) {}

    /// Called once after the last output of a run.
    fn finish(&mut self) {}
}

/// Discards all output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecorder;

impl Recorder for NullRecorder {}

/// Keeps all output in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    pub events: Vec<Event>,
    pub propagation: Vec<PropagationRow>,
    pub graphs: Vec<(u64, Vec<(NodeId, NodeId)>)>,
    pub regions: Vec<RegionInfo>,
    pub results: Option<FinalResults>,
    pub block_list: Vec<BlockListEntry>,
    pub finished: bool,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Recorder for MemoryRecorder {
    fn record(&mut self, event: &Event) {
        self.events.push(event.clone());
    }

    fn propagation(&mut self, row: &PropagationRow) {
        self.propagation.push(row.clone());
    }

    fn graph(&mut self, height: u64, edges: &[(NodeId, NodeId)]) {
        self.graphs.push((height, edges.to_vec()));
    }

    fn regions(&mut self, regions: &[RegionInfo]) {
        self.regions = regions.to_vec();
    }

    fn results(&mut self, results: &FinalResults) {
        self.results = Some(results.clone());
    }

    fn block_list(&mut self, entries: &[BlockListEntry]) {
        self.block_list = entries.to_vec();
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

/// Cloneable handle to a recorder, so its contents stay reachable after the
/// simulation which owns one of the handles finishes.
#[derive(Debug, Default)]
pub struct SharedRecorder<R>(Arc<Mutex<R>>);

impl<R> Clone for SharedRecorder<R> {
    fn clone(&self) -> Self {
        SharedRecorder(Arc::clone(&self.0))
    }
}

impl<R: Recorder> SharedRecorder<R> {
    pub fn new(recorder: R) -> Self {
        SharedRecorder(Arc::new(Mutex::new(recorder)))
    }

    pub fn lock(&self) -> MutexGuard<'_, R> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: Recorder> Recorder for SharedRecorder<R> {
    fn record(&mut self, event: &Event) {
        self.lock().record(event);
    }

    fn propagation(&mut self, row: &PropagationRow) {
        self.lock().propagation(row);
    }

    fn graph(&mut self, height: u64, edges: &[(NodeId, NodeId)]) {
        self.lock().graph(height, edges);
    }

    fn regions(&mut self, regions: &[RegionInfo]) {
        self.lock().regions(regions);
    }

    fn results(&mut self, results: &FinalResults) {
        self.lock().results(results);
    }

    fn block_list(&mut self, entries: &[BlockListEntry]) {
        self.lock().block_list(entries);
    }

    fn finish(&mut self) {
        self.lock().finish();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn events_use_kebab_case_keys() {
        let event = Event::FlowBlock {
            transmission_timestamp: 1,
            reception_timestamp: 2,
            begin_node_id: 3.into(),
            end_node_id: 4.into(),
            block_id: 5.into(),
        };

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "kind": "flow-block",
                "content": {
                    "transmission-timestamp": 1,
                    "reception-timestamp": 2,
                    "begin-node-id": 3,
                    "end-node-id": 4,
                    "block-id": 5,
                }
            })
        );

        let end = Event::SimulationEnd { timestamp: 9 };
        assert_eq!(
            serde_json::to_value(&end).unwrap(),
            json!({ "kind": "simulation-end", "content": { "timestamp": 9 } })
        );
    }
}
