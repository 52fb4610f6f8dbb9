//! Execution reports - per-node outcomes of one run, saved as JSON run records

use crate::core::{KindTag, Node, NodeId};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default directory for saved run records
pub const REPORTS_DIR: &str = ".bioflow/reports";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// How the run as a whole ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    /// Every node in the order was attempted
    Completed,
    /// Stopped early by a failure or a lost connection
    Aborted,
    Cancelled,
}

/// Outcome of one node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportEntry {
    pub node_id: NodeId,
    pub node_kind: KindTag,
    pub outcome: Outcome,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Remote files this node produced (empty on failure)
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl ReportEntry {
    /// Successful entry for `node`
    pub fn success(node: &Node, detail: impl Into<String>) -> Self {
        Self::new(node, Outcome::Success, detail.into())
    }

    /// Failed entry for `node`
    pub fn failure(node: &Node, detail: impl Into<String>) -> Self {
        Self::new(node, Outcome::Failure, detail.into())
    }

    fn new(node: &Node, outcome: Outcome, detail: String) -> Self {
        Self {
            node_id: node.id.clone(),
            node_kind: node.kind.tag(),
            outcome,
            detail,
            exit_code: None,
            outputs: Vec::new(),
        }
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Attach the files this node produced
    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Attach outputs only when the node succeeded
    pub(crate) fn with_outputs_if_success(self, outputs: Vec<String>) -> Self {
        if self.is_success() {
            self.with_outputs(outputs)
        } else {
            self
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Flat, ordered record of a run. Read-only once the run has finished.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionReport {
    run_id: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    state: RunState,
    entries: Vec<ReportEntry>,
}

impl ExecutionReport {
    pub(crate) fn begin() -> Self {
        let now = Utc::now();
        Self {
            run_id: now.format("%Y-%m-%d-%H-%M-%S-%3f").to_string(),
            started_at: now,
            finished_at: None,
            state: RunState::Running,
            entries: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn finish(mut self, state: RunState) -> Self {
        self.state = state;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Entries in execution order
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    /// Entry for a node, if it ran
    pub fn entry(&self, node_id: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.node_id == node_id)
    }

    /// Entries that failed
    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| !e.is_success())
    }

    /// Completed with every node successful
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed && self.entries.iter().all(ReportEntry::is_success)
    }

    /// Write `<dir>/<run_id>.json` and point `latest.json` at it
    pub fn save_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;

        let path = dir.join(format!("{}.json", self.run_id));
        fs::write(&path, serde_json::to_string_pretty(self)?)?;

        let latest = dir.join("latest.json");
        let _ = fs::remove_file(&latest);
        #[cfg(unix)]
        std::os::unix::fs::symlink(&path, &latest)?;
        #[cfg(not(unix))]
        fs::copy(&path, &latest)?;

        Ok(path)
    }

    /// Load a saved report by run id
    pub fn load_from(dir: &Path, run_id: &str) -> Result<Self> {
        let content = fs::read_to_string(dir.join(format!("{}.json", run_id)))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load the most recently saved report
    pub fn load_latest(dir: &Path) -> Result<Self> {
        let latest = dir.join("latest.json");
        if !latest.exists() {
            anyhow::bail!("No saved run report in {}", dir.display());
        }
        Ok(serde_json::from_str(&fs::read_to_string(&latest)?)?)
    }

    /// Saved run ids, most recent first
    pub fn list_all(dir: &Path) -> Result<Vec<String>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if stem != "latest" {
                    runs.push(stem.to_string());
                }
            }
        }

        runs.sort();
        runs.reverse();
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Graph, NodeKind};

    fn sample() -> ExecutionReport {
        let mut graph = Graph::new();
        let a = graph.add_node("reads", NodeKind::Source { files: vec!["/d/a.fq".into()] });
        let b = graph.add_node("fastqc", NodeKind::Transform);

        let mut report = ExecutionReport::begin();
        report.record(
            ReportEntry::success(graph.node(&a).unwrap(), "1 file designated")
                .with_outputs(vec!["/d/a.fq".into()]),
        );
        report.record(
            ReportEntry::failure(graph.node(&b).unwrap(), "exit code 2").with_exit_code(Some(2)),
        );
        report.finish(RunState::Aborted)
    }

    #[test]
    fn test_report_accessors() {
        let report = sample();
        assert_eq!(report.state(), RunState::Aborted);
        assert!(report.finished_at().is_some());
        assert_eq!(report.entries().len(), 2);
        assert_eq!(report.entry("node_2").unwrap().exit_code, Some(2));
        assert_eq!(report.entry("node_2").unwrap().node_kind, KindTag::Transform);
        assert_eq!(report.failures().count(), 1);
        assert!(!report.is_success());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let report = sample();

        let path = report.save_to(dir.path()).unwrap();
        assert!(path.exists());

        let loaded = ExecutionReport::load_from(dir.path(), report.run_id()).unwrap();
        assert_eq!(loaded, report);
        assert_eq!(ExecutionReport::load_latest(dir.path()).unwrap(), report);
        assert_eq!(
            ExecutionReport::list_all(dir.path()).unwrap(),
            vec![report.run_id().to_string()]
        );
    }

    #[test]
    fn test_list_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ExecutionReport::list_all(&dir.path().join("none")).unwrap().is_empty());
        assert!(ExecutionReport::load_latest(dir.path()).is_err());
    }

    #[test]
    fn test_entry_json_shape() {
        let report = sample();
        let json = serde_json::to_value(&report.entries()[1]).unwrap();
        assert_eq!(json["outcome"], "failure");
        assert_eq!(json["node_kind"], "transform");
        assert_eq!(json["exit_code"], 2);
    }
}
