//! `Compendium`: the service facade.
//!
//! Ingestion is accepted synchronously and executed out-of-band: `submit`
//! validates the batch, registers a queued run and hands it to a single
//! background worker over a bounded channel. Everything else is a direct
//! call against the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender};

use crate::config::CompendiumConfig;
use crate::error::{CompendiumError, Result};
use crate::keys;
use crate::model::{IngestBatch, Node, NodeType, NodeWithType, ResolvedEdge};
use crate::query::{self, DEFAULT_LIST_LIMIT, DEFAULT_RECENT_LIMIT};
use crate::statement::{validate_identifier, StatementBuilder};
use crate::store::{FileStore, ItemStore, MemoryStore};
use crate::workflow::{
    validate_batch, IngestionWorkflow, RunContext, RunId, RunRegistry, RunReport, RunStatus,
    SystemClock, VersionClock,
};

struct Job {
    run_id: RunId,
    batch: IngestBatch,
}

/// State shared between callers and the background worker.
struct Shared {
    store: Arc<dyn ItemStore>,
    clock: Arc<dyn VersionClock>,
    workflow: IngestionWorkflow,
    registry: RunRegistry,
}

impl Shared {
    /// Execute a registered run to completion and record the outcome.
    fn run(&self, run_id: &RunId, batch: &IngestBatch) -> Result<RunReport> {
        let mut report = self.registry.report(run_id)?;
        report.status = RunStatus::Running;
        self.registry.update(report.clone())?;

        let started = Instant::now();
        let outcome = self.clock.next_version().and_then(|version| {
            let ctx = RunContext {
                run_id: run_id.clone(),
                version,
            };
            self.workflow.execute(&ctx, batch)
        });

        let (final_report, result) = match outcome {
            Ok(mut done) => {
                done.retry_of = report.retry_of.clone();
                (done.clone(), Ok(done))
            }
            Err(e) => {
                tracing::warn!(run_id = %run_id, code = e.code(), error = %e, "run rejected");
                report.status = RunStatus::Failed {
                    code: e.code().to_string(),
                    message: e.to_string(),
                };
                report.duration_ms = started.elapsed().as_millis() as u64;
                (report, Err(e))
            }
        };

        if let Err(e) = self.store.flush() {
            tracing::warn!(run_id = %run_id, error = %e, "flush after run failed");
        }
        self.registry.update(final_report)?;
        result
    }
}

pub struct Compendium {
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    sequence: AtomicU64,
    config: CompendiumConfig,
}

impl Compendium {
    /// Open with a system clock, on disk when `data_dir` is set. The clock
    /// resumes after the newest version already in the store.
    pub fn open(config: CompendiumConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn ItemStore> = match &config.data_dir {
            Some(dir) => Arc::new(FileStore::open(dir)?),
            None => Arc::new(MemoryStore::new()),
        };
        let clock = match query::list_recent_nodes(store.as_ref(), 1)?.first() {
            Some(latest) => {
                tracing::debug!(version = %latest.version, "resuming version clock");
                SystemClock::resuming_after(&latest.version)?
            }
            None => SystemClock::new(),
        };
        Self::with_store(store, Arc::new(clock), config)
    }

    pub fn with_store(
        store: Arc<dyn ItemStore>,
        clock: Arc<dyn VersionClock>,
        config: CompendiumConfig,
    ) -> Result<Self> {
        let statements = StatementBuilder::new(config.table_name.as_str())?;
        let workflow = IngestionWorkflow::new(store.clone(), statements, config.fanout_threads)?;
        let shared = Arc::new(Shared {
            store,
            clock,
            workflow,
            registry: RunRegistry::new(config.retained_runs),
        });

        let (sender, receiver) = bounded::<Job>(config.queue_capacity.max(1));
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("compendium-runs".to_string())
            .spawn(move || {
                for job in receiver {
                    if let Err(e) = worker_shared.run(&job.run_id, &job.batch) {
                        tracing::debug!(run_id = %job.run_id, error = %e, "background run ended with error");
                    }
                }
                tracing::debug!("run worker stopped");
            })?;

        Ok(Self {
            shared,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            sequence: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &CompendiumConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.shared.store
    }

    // === TYPES ===

    pub fn put_type(&self, node_type: NodeType) -> Result<()> {
        validate_identifier(&node_type.id)?;
        self.shared.store.put_item(node_type.to_item())?;
        self.shared.store.flush()
    }

    /// Returns whether the type existed. Nodes referencing it are untouched.
    pub fn delete_type(&self, id: &str) -> Result<bool> {
        let removed = self.shared.store.delete_item(&keys::type_key(id))?;
        self.shared.store.flush()?;
        Ok(removed)
    }

    pub fn list_types(&self) -> Result<Vec<NodeType>> {
        query::list_types(self.shared.store.as_ref())
    }

    pub fn get_type(&self, id: &str) -> Result<Option<NodeType>> {
        query::get_type(self.shared.store.as_ref(), id)
    }

    // === INGESTION ===

    /// Validate and enqueue a batch; returns once the run is queued.
    ///
    /// Unknown types and malformed ids are rejected here, before anything is
    /// written or queued. Blocks while the queue is full.
    pub fn submit(&self, batch: IngestBatch) -> Result<RunId> {
        self.enqueue(batch, None)
    }

    fn enqueue(&self, batch: IngestBatch, retry_of: Option<RunId>) -> Result<RunId> {
        validate_batch(self.shared.store.as_ref(), &batch)?;
        let run_id = self.register(&batch, retry_of)?;

        let sender = self.sender.lock()?.clone();
        let sent = match sender {
            Some(sender) => sender
                .send(Job {
                    run_id: run_id.clone(),
                    batch,
                })
                .is_ok(),
            None => false,
        };
        if !sent {
            let mut report = self.shared.registry.report(&run_id)?;
            report.status = RunStatus::Failed {
                code: CompendiumError::QueueClosed.code().to_string(),
                message: CompendiumError::QueueClosed.to_string(),
            };
            self.shared.registry.update(report)?;
            return Err(CompendiumError::QueueClosed);
        }

        tracing::debug!(run_id = %run_id, "run queued");
        Ok(run_id)
    }

    fn register(&self, batch: &IngestBatch, retry_of: Option<RunId>) -> Result<RunId> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let run_id = RunId::derive(sequence, batch);
        let mut report = RunReport::queued(run_id.clone(), batch);
        report.retry_of = retry_of;
        self.shared.registry.register(report, batch.clone())?;
        Ok(run_id)
    }

    /// Run a batch on the calling thread and return its final report.
    pub fn ingest(&self, batch: IngestBatch) -> Result<RunReport> {
        let run_id = self.register(&batch, None)?;
        self.shared.run(&run_id, &batch)
    }

    pub fn run_report(&self, run_id: &RunId) -> Result<RunReport> {
        self.shared.registry.report(run_id)
    }

    pub fn wait_for_run(&self, run_id: &RunId, timeout: Duration) -> Result<RunReport> {
        self.shared.registry.wait(run_id, timeout)
    }

    /// Re-submit the nodes whose branch failed in `run_id`. A run rejected as
    /// a whole is re-submitted in full.
    pub fn retry_failed(&self, run_id: &RunId) -> Result<RunId> {
        let report = self.shared.registry.report(run_id)?;
        if !report.status.is_finished() {
            return Err(CompendiumError::invalid_input(format!(
                "run '{run_id}' has not finished"
            )));
        }
        let batch = self.shared.registry.batch(run_id)?;
        let retry = match &report.status {
            RunStatus::Succeeded => {
                return Err(CompendiumError::invalid_input(format!(
                    "run '{run_id}' has no failed nodes"
                )))
            }
            RunStatus::Failed { .. } if report.failed_node_ids().is_empty() => batch,
            _ => {
                let failed = report.failed_node_ids();
                IngestBatch::new(
                    batch
                        .nodes
                        .into_iter()
                        .filter(|n| failed.contains(&n.id.as_str()))
                        .collect(),
                )
            }
        };
        tracing::info!(run_id = %run_id, nodes = retry.len(), "retrying failed nodes");
        self.enqueue(retry, Some(run_id.clone()))
    }

    // === READS ===

    pub fn get_node(&self, id: &str) -> Result<Option<Node>> {
        query::get_node(self.shared.store.as_ref(), id)
    }

    pub fn get_node_with_type(&self, id: &str) -> Result<Option<NodeWithType>> {
        query::get_node_with_type(self.shared.store.as_ref(), id)
    }

    pub fn list_recent_nodes(&self, limit: Option<usize>) -> Result<Vec<Node>> {
        query::list_recent_nodes(
            self.shared.store.as_ref(),
            limit.unwrap_or(DEFAULT_RECENT_LIMIT),
        )
    }

    pub fn list_nodes_by_type(&self, type_id: &str, limit: Option<usize>) -> Result<Vec<Node>> {
        query::list_nodes_by_type(
            self.shared.store.as_ref(),
            type_id,
            limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )
    }

    pub fn get_dependencies(&self, id: &str, limit: Option<usize>) -> Result<Vec<ResolvedEdge>> {
        query::get_dependencies(
            self.shared.store.as_ref(),
            id,
            limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )
    }

    pub fn get_dependants(&self, id: &str, limit: Option<usize>) -> Result<Vec<ResolvedEdge>> {
        query::get_dependants(
            self.shared.store.as_ref(),
            id,
            limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )
    }

    // === LIFECYCLE ===

    pub fn flush(&self) -> Result<()> {
        self.shared.store.flush()
    }

    /// Stop accepting runs, drain the queue, join the worker and flush.
    pub fn shutdown(&self) -> Result<()> {
        self.sender.lock()?.take();
        if let Some(handle) = self.worker.lock()?.take() {
            if handle.join().is_err() {
                tracing::warn!("run worker panicked");
            }
        }
        self.flush()
    }
}

impl Drop for Compendium {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "shutdown on drop failed");
        }
    }
}
