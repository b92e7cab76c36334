//! Run identity, per-node progress table and the registry of runs.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{CompendiumError, Result};
use crate::model::IngestBatch;

/// Opaque run identifier handed back at submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Derived from the submission sequence number and the batch's node ids.
    pub fn derive(sequence: u64, batch: &IngestBatch) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&sequence.to_le_bytes());
        for node in &batch.nodes {
            hasher.update(node.id.as_bytes());
            hasher.update(&[0]);
        }
        let hex = hasher.finalize().to_hex();
        RunId(hex.as_str()[..32].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        RunId(s)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owned by a run, threaded through every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: RunId,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFailure {
    pub code: String,
    pub message: String,
    pub retriable: bool,
}

impl From<&CompendiumError> for NodeFailure {
    fn from(err: &CompendiumError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            retriable: err.is_retriable(),
        }
    }
}

/// One row of the per-node state table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeProgress {
    pub node_id: String,
    pub node_put: bool,
    pub edges_stored: usize,
    pub stale_found: usize,
    pub stale_deleted: usize,
    pub reconciled: bool,
    pub error: Option<NodeFailure>,
}

impl NodeProgress {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_put: false,
            edges_stored: 0,
            stale_found: 0,
            stale_deleted: 0,
            reconciled: false,
            error: None,
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    /// Some node branches failed; the rest completed.
    PartiallyFailed,
    /// Rejected before any write, or every branch failed.
    Failed { code: String, message: String },
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RunStatus::Queued | RunStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: RunId,
    /// Assigned when the run starts executing.
    pub version: Option<String>,
    pub status: RunStatus,
    pub nodes: Vec<NodeProgress>,
    pub duration_ms: u64,
    /// Run this one retries, if any.
    #[serde(default)]
    pub retry_of: Option<RunId>,
}

impl RunReport {
    pub fn queued(run_id: RunId, batch: &IngestBatch) -> Self {
        Self {
            run_id,
            version: None,
            status: RunStatus::Queued,
            nodes: batch.nodes.iter().map(|n| NodeProgress::new(n.id.as_str())).collect(),
            duration_ms: 0,
            retry_of: None,
        }
    }

    pub fn failed_node_ids(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.failed())
            .map(|n| n.node_id.as_str())
            .collect()
    }

    pub fn progress(&self, node_id: &str) -> Option<&NodeProgress> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }
}

struct RunEntry {
    report: RunReport,
    batch: IngestBatch,
}

#[derive(Default)]
struct RegistryInner {
    runs: HashMap<RunId, RunEntry>,
    /// Finished runs, oldest first.
    finished: VecDeque<RunId>,
}

/// Thread-safe table of submitted runs.
///
/// Finished runs beyond `retained` are evicted oldest first; queued and
/// running runs are never evicted.
pub struct RunRegistry {
    inner: Mutex<RegistryInner>,
    changed: Condvar,
    retained: usize,
}

impl RunRegistry {
    pub fn new(retained: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            changed: Condvar::new(),
            retained: retained.max(1),
        }
    }

    pub fn register(&self, report: RunReport, batch: IngestBatch) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner
            .runs
            .insert(report.run_id.clone(), RunEntry { report, batch });
        Ok(())
    }

    /// Replace a run's report. Finished reports enter the eviction queue.
    pub fn update(&self, report: RunReport) -> Result<()> {
        let mut inner = self.inner.lock()?;
        let run_id = report.run_id.clone();
        let newly_finished = match inner.runs.get_mut(&run_id) {
            Some(entry) => {
                let was_finished = entry.report.status.is_finished();
                let finished = report.status.is_finished();
                entry.report = report;
                finished && !was_finished
            }
            None => return Err(CompendiumError::RunNotFound(run_id.to_string())),
        };
        if newly_finished {
            inner.finished.push_back(run_id);
            while inner.finished.len() > self.retained {
                if let Some(old) = inner.finished.pop_front() {
                    inner.runs.remove(&old);
                    tracing::debug!(run_id = %old, "evicted finished run");
                }
            }
        }
        drop(inner);
        self.changed.notify_all();
        Ok(())
    }

    pub fn report(&self, run_id: &RunId) -> Result<RunReport> {
        let inner = self.inner.lock()?;
        inner
            .runs
            .get(run_id)
            .map(|e| e.report.clone())
            .ok_or_else(|| CompendiumError::RunNotFound(run_id.to_string()))
    }

    pub fn batch(&self, run_id: &RunId) -> Result<IngestBatch> {
        let inner = self.inner.lock()?;
        inner
            .runs
            .get(run_id)
            .map(|e| e.batch.clone())
            .ok_or_else(|| CompendiumError::RunNotFound(run_id.to_string()))
    }

    /// Block until the run finishes or `timeout` elapses; returns the latest
    /// report either way. A timeout too large to represent waits unbounded.
    pub fn wait(&self, run_id: &RunId, timeout: Duration) -> Result<RunReport> {
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.inner.lock()?;
        loop {
            let report = inner
                .runs
                .get(run_id)
                .map(|e| e.report.clone())
                .ok_or_else(|| CompendiumError::RunNotFound(run_id.to_string()))?;
            if report.status.is_finished() {
                return Ok(report);
            }
            inner = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(report);
                    }
                    self.changed.wait_timeout(inner, deadline - now)?.0
                }
                None => self.changed.wait(inner)?,
            };
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.runs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
