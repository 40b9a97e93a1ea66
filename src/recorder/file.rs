//! Recorder writing the output of a run into a directory.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use serde_json::json;
use tracing::{debug, warn};

use super::{Event, Recorder};
use crate::{
    analytics::{FinalResults, PropagationRow},
    node::NodeId,
    simulation::BlockListEntry,
    topology::RegionInfo,
};

/// Writes the visualisation events to `visualize/output.json`, propagation
/// rows to `propagation/<stem>.csv`, graph snapshots to `graph/<height>.txt`,
/// the region listing to `static.json`, the final results to
/// `result/<stem>.json` and the block list to `blockList.txt`.
///
/// Write failures do not stop the simulation; the first one is kept and can
/// be taken with [FileRecorder::take_error].
#[derive(Debug)]
pub struct FileRecorder {
    dir: PathBuf,
    stem: String,
    events: BufWriter<File>,
    propagation: BufWriter<File>,
    first_event: bool,
    error: Option<io::Error>,
}

impl FileRecorder {
    /// Creates the output directories under `dir` if missing and opens the
    /// streamed output files. `stem` names the propagation and result files,
    /// usually after the profile of the run.
    pub fn create(dir: impl AsRef<Path>, stem: &str) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        for sub in ["visualize", "propagation", "result", "graph"] {
            fs::create_dir_all(dir.join(sub))?;
        }

        let events = File::create(dir.join("visualize").join("output.json"))?;
        let mut events = BufWriter::new(events);
        events.write_all(b"[")?;
        let propagation =
            File::create(dir.join("propagation").join(format!("{stem}.csv")))?;
        debug!(dir = %dir.display(), stem, "writing simulation output");

        Ok(FileRecorder {
            dir,
            stem: stem.to_string(),
            events,
            propagation: BufWriter::new(propagation),
            first_event: true,
            error: None,
        })
    }

    /// Returns the first write error, if any occurred.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    fn keep(&mut self, result: io::Result<()>) {
        if let Err(err) = result {
            warn!(error = %err, "failed to write simulation output");
            self.error.get_or_insert(err);
        }
    }

    fn write_event(&mut self, event: &Event) -> io::Result<()> {
        if !self.first_event {
            self.events.write_all(b",")?;
        }
        self.first_event = false;
        serde_json::to_writer(&mut self.events, event)?;

        Ok(())
    }

    fn write_row(&mut self, row: &PropagationRow) -> io::Result<()> {
        let line = row
            .latencies
            .iter()
            .map(|latency| latency.to_string())
            .collect::<Vec<_>>()
            .join(",");

        writeln!(self.propagation, "{line}")
    }

    fn write_file(&self, name: &str, contents: &str) -> io::Result<()> {
        fs::write(self.dir.join(name), contents)
    }
}

impl Recorder for FileRecorder {
    fn record(&mut self, event: &Event) {
        let result = self.write_event(event);
        self.keep(result);
    }

    fn propagation(&mut self, row: &PropagationRow) {
        let result = self.write_row(row);
        self.keep(result);
    }

    fn graph(&mut self, height: u64, edges: &[(NodeId, NodeId)]) {
        let contents: String = edges
            .iter()
            .map(|(from, to)| format!("{from} {to}\n"))
            .collect();

        let result = self.write_file(&format!("graph/{height}.txt"), &contents);
        self.keep(result);
    }

    fn regions(&mut self, regions: &[RegionInfo]) {
        let contents = json!({ "region": regions }).to_string();

        let result = self.write_file("static.json", &contents);
        self.keep(result);
    }

    fn results(&mut self, results: &FinalResults) {
        let result = serde_json::to_string_pretty(results)
            .map_err(io::Error::from)
            .and_then(|contents| {
                self.write_file(&format!("result/{}.json", self.stem), &contents)
            });
        self.keep(result);
    }

    fn block_list(&mut self, entries: &[BlockListEntry]) {
        let contents: String =
            entries.iter().map(|entry| format!("{entry}\n")).collect();

        let result = self.write_file("blockList.txt", &contents);
        self.keep(result);
    }

    fn finish(&mut self) {
        let result = self
            .events
            .write_all(b"]")
            .and_then(|()| self.events.flush())
            .and_then(|()| self.propagation.flush());
        self.keep(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_form_a_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = FileRecorder::create(dir.path(), "small").unwrap();

        recorder.record(&Event::AddNode {
            timestamp: 0,
            node_id: 1.into(),
            region_id: 2,
        });
        recorder.record(&Event::SimulationEnd { timestamp: 5 });
        recorder.graph(2, &[(1.into(), 2.into())]);
        recorder.propagation(&PropagationRow { block: 3.into(), latencies: vec![0, 7] });
        recorder.finish();
        assert!(recorder.take_error().is_none());

        let output =
            fs::read_to_string(dir.path().join("visualize/output.json")).unwrap();
        let events: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(events.as_array().unwrap().len(), 2);
        assert_eq!(events[0]["content"]["node-id"], 1);

        let graph = fs::read_to_string(dir.path().join("graph/2.txt")).unwrap();
        assert_eq!(graph, "1 2\n");

        let rows = fs::read_to_string(dir.path().join("propagation/small.csv")).unwrap();
        assert_eq!(rows, "0,7\n");
    }
}
