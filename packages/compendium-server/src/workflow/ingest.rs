//! The node ingestion state machine.
//!
//! ```text
//! ValidateTypes ──► for each node (parallel):
//!                     PutNode ─► StoreDependencyEdges ─► FindStaleEdges ─► DeleteStaleEdges
//!                                 (parallel per dep)                        (parallel per edge)
//! ```
//!
//! ValidateTypes is all-or-nothing and runs before any write. Everything
//! after it is node-local: a failing branch is recorded in that node's
//! [`NodeProgress`] and the other branches carry on. Re-running a batch is
//! safe; the only observable change is the newer version stamp.
//!
//! Two runs touching the same node concurrently race; the last `PutNode`
//! determines the node's version and the survivor of each edge.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde_json::{json, Value as Json};

use super::run::{NodeFailure, NodeProgress, RunContext, RunReport, RunStatus};
use crate::codec::{item_to_json, AttributeSource, AttributeValue, Item};
use crate::error::{CompendiumError, Result};
use crate::keys::{
    self, PrimaryKey, ATTR_GSI1PK, ATTR_GSI1SK, ATTR_GSI2PK, ATTR_PK, ATTR_SK, RECENT_PARTITION,
    TYPE_PARTITION, TYPE_SK_PREFIX,
};
use crate::model::{
    IngestBatch, NodeInput, NodeType, ATTR_DEPENDANT_ID, ATTR_DEPENDANT_VERSION,
    ATTR_DEPENDENCY_ID, ATTR_ID, ATTR_METADATA, ATTR_NAME, ATTR_TYPE_ID, ATTR_VERSION,
};
use crate::statement::{validate_identifier, StatementBuilder};
use crate::store::{IndexName, ItemStore, QueryRequest};

type Template = Vec<(&'static str, AttributeSource)>;

/// Item shapes written by the workflow, resolved against a per-step JSON
/// context.
struct StepTemplates {
    node_item: Template,
    edge_item: Template,
    stale_pk: AttributeSource,
    stale_sk: AttributeSource,
}

impl StepTemplates {
    fn new() -> Result<Self> {
        let s = AttributeSource::string_from_path;
        Ok(Self {
            node_item: vec![
                (ATTR_PK, s("$.keys.pk")?),
                (ATTR_SK, s("$.keys.sk")?),
                (
                    ATTR_GSI1PK,
                    AttributeSource::literal(AttributeValue::from_string(RECENT_PARTITION)),
                ),
                (ATTR_GSI1SK, s("$.keys.recent")?),
                (ATTR_GSI2PK, s("$.keys.byType")?),
                (ATTR_ID, s("$.node.id")?),
                (ATTR_NAME, s("$.node.name")?),
                (ATTR_TYPE_ID, s("$.node.typeId")?),
                (ATTR_METADATA, AttributeSource::json_string_from_path("$.node.metadata")?),
                (ATTR_VERSION, s("$.version")?),
            ],
            edge_item: vec![
                (ATTR_PK, s("$.keys.pk")?),
                (ATTR_SK, s("$.keys.sk")?),
                (ATTR_DEPENDANT_ID, s("$.dependantId")?),
                (ATTR_DEPENDENCY_ID, s("$.dependencyId")?),
                (ATTR_DEPENDANT_VERSION, s("$.version")?),
            ],
            stale_pk: s("$.PK")?,
            stale_sk: s("$.SK")?,
        })
    }
}

fn render(template: &Template, context: &Json) -> Result<Item> {
    template
        .iter()
        .map(|(name, source)| Ok((name.to_string(), source.resolve(context)?)))
        .collect()
}

pub struct IngestionWorkflow {
    store: Arc<dyn ItemStore>,
    statements: StatementBuilder,
    templates: StepTemplates,
    /// Dedicated fan-out pool; `None` uses rayon's global pool.
    pool: Option<rayon::ThreadPool>,
}

impl IngestionWorkflow {
    pub fn new(
        store: Arc<dyn ItemStore>,
        statements: StatementBuilder,
        fanout_threads: Option<usize>,
    ) -> Result<Self> {
        let pool = match fanout_threads {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n.max(1))
                    .thread_name(|i| format!("compendium-fanout-{i}"))
                    .build()
                    .map_err(|e| CompendiumError::invalid_input(format!("rayon pool: {e}")))?,
            ),
            None => None,
        };
        Ok(Self {
            store,
            statements,
            templates: StepTemplates::new()?,
            pool,
        })
    }

    fn fan_out<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// Execute one run. `Err` means the batch was rejected before any write;
    /// node-local failures are reported in the returned report instead.
    pub fn execute(&self, ctx: &RunContext, batch: &IngestBatch) -> Result<RunReport> {
        let started = Instant::now();
        tracing::info!(
            run_id = %ctx.run_id,
            version = %ctx.version,
            nodes = batch.len(),
            "ingestion run started"
        );

        // ── Phase 1: ValidateTypes (batch-fatal, zero writes) ──
        validate_batch(self.store.as_ref(), batch)?;

        // ── Phase 2: Per-node chains, parallel across nodes ──
        let nodes: Vec<NodeProgress> = self.fan_out(|| {
            batch
                .nodes
                .par_iter()
                .map(|node| self.ingest_node(ctx, node))
                .collect()
        });

        // ── Phase 3: Summarize ──
        let failed = nodes.iter().filter(|n| n.failed()).count();
        let status = if failed == 0 {
            RunStatus::Succeeded
        } else if failed == nodes.len() {
            let first = nodes.iter().find_map(|n| n.error.clone());
            RunStatus::Failed {
                code: first
                    .as_ref()
                    .map(|f| f.code.clone())
                    .unwrap_or_else(|| "INTERNAL_ERROR".to_string()),
                message: format!(
                    "all {} node branches failed; first: {}",
                    failed,
                    first.map(|f| f.message).unwrap_or_default()
                ),
            }
        } else {
            RunStatus::PartiallyFailed
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %ctx.run_id,
            version = %ctx.version,
            nodes = nodes.len(),
            failed,
            duration_ms,
            "ingestion run finished"
        );

        Ok(RunReport {
            run_id: ctx.run_id.clone(),
            version: Some(ctx.version.clone()),
            status,
            nodes,
            duration_ms,
            retry_of: None,
        })
    }

    /// One node's sequential chain. Stops at the first failing step.
    fn ingest_node(&self, ctx: &RunContext, node: &NodeInput) -> NodeProgress {
        let mut progress = NodeProgress::new(node.id.as_str());
        if let Err(e) = self.run_node_steps(ctx, node, &mut progress) {
            tracing::warn!(
                run_id = %ctx.run_id,
                node_id = %node.id,
                code = e.code(),
                error = %e,
                "node branch failed"
            );
            progress.error = Some(NodeFailure::from(&e));
        }
        progress
    }

    fn run_node_steps(
        &self,
        ctx: &RunContext,
        node: &NodeInput,
        progress: &mut NodeProgress,
    ) -> Result<()> {
        self.put_node(ctx, node)?;
        progress.node_put = true;

        let stored = self.store_dependency_edges(ctx, node);
        progress.edges_stored = stored.0;
        stored.1?;

        let stale = self.find_stale_edges(ctx, &node.id)?;
        progress.stale_found = stale.len();

        let deleted = self.delete_stale_edges(stale);
        progress.stale_deleted = deleted.0;
        deleted.1?;

        progress.reconciled = true;
        tracing::debug!(
            run_id = %ctx.run_id,
            node_id = %node.id,
            edges = progress.edges_stored,
            stale = progress.stale_deleted,
            "node reconciled"
        );
        Ok(())
    }

    // ── PutNode ──
    fn put_node(&self, ctx: &RunContext, node: &NodeInput) -> Result<()> {
        let key = keys::node_key(&node.id);
        let recent = keys::recent_index_keys(&ctx.version, &node.id);
        let node_json = serde_json::to_value(node)?;
        let context = json!({
            "node": node_json,
            "version": ctx.version,
            "keys": {
                "pk": key.pk,
                "sk": key.sk,
                "recent": recent.sk,
                "byType": keys::type_index_key(&node.type_id),
            },
        });
        let item = render(&self.templates.node_item, &context)?;
        self.store.put_item(item)
    }

    // ── StoreDependencyEdges ──
    /// Returns (edges written, first error).
    fn store_dependency_edges(&self, ctx: &RunContext, node: &NodeInput) -> (usize, Result<()>) {
        let deps = node.unique_dependencies();
        let results: Vec<Result<()>> = deps
            .par_iter()
            .map(|dep| {
                let key = keys::edge_key(&node.id, dep);
                let context = json!({
                    "keys": {"pk": key.pk, "sk": key.sk},
                    "dependantId": keys::qualify_node_id(&node.id),
                    "dependencyId": keys::qualify_node_id(dep),
                    "version": ctx.version,
                });
                self.store.put_item(render(&self.templates.edge_item, &context)?)
            })
            .collect();
        split_results(results)
    }

    // ── FindStaleEdges ──
    fn find_stale_edges(&self, ctx: &RunContext, node_id: &str) -> Result<Vec<Item>> {
        let statement = self.statements.stale_edges(node_id, &ctx.version)?;
        self.store.execute_statement(&statement)
    }

    // ── DeleteStaleEdges ──
    /// Returns (edges deleted, first error). Already-missing edges count as
    /// done.
    fn delete_stale_edges(&self, stale: Vec<Item>) -> (usize, Result<()>) {
        let results: Vec<Result<()>> = stale
            .par_iter()
            .map(|item| {
                let context = item_to_json(item)?;
                let pk = self.templates.stale_pk.resolve(&context)?;
                let sk = self.templates.stale_sk.resolve(&context)?;
                let key = match (pk, sk) {
                    (AttributeValue::S(pk), AttributeValue::S(sk)) => PrimaryKey::new(pk, sk),
                    _ => return Err(CompendiumError::invalid_input("stale edge key is not a string")),
                };
                self.store.delete_item(&key).map(|_| ())
            })
            .collect();
        split_results(results)
    }
}

fn split_results(results: Vec<Result<()>>) -> (usize, Result<()>) {
    let mut ok = 0;
    let mut first_err = None;
    for result in results {
        match result {
            Ok(()) => ok += 1,
            Err(e) if first_err.is_none() => first_err = Some(e),
            Err(_) => {}
        }
    }
    (ok, first_err.map_or(Ok(()), Err))
}

/// Known type ids, from one scan of the type partition.
pub fn known_type_ids(store: &dyn ItemStore) -> Result<HashSet<String>> {
    let request = QueryRequest::new(IndexName::Primary, TYPE_PARTITION).with_prefix(TYPE_SK_PREFIX);
    store
        .query(&request)?
        .iter()
        .map(|item| NodeType::from_item(item).map(|t| t.id))
        .collect()
}

/// Batch pre-checks: identifiers, duplicate node ids, declared types.
pub fn validate_batch(store: &dyn ItemStore, batch: &IngestBatch) -> Result<()> {
    let known = known_type_ids(store)?;
    let mut seen = HashSet::with_capacity(batch.len());
    for node in &batch.nodes {
        validate_identifier(&node.id)?;
        for dep in &node.dependencies {
            validate_identifier(dep)?;
        }
        if !seen.insert(node.id.as_str()) {
            return Err(CompendiumError::invalid_input(format!(
                "node '{}' appears more than once in the batch",
                node.id
            )));
        }
        if !known.contains(&node.type_id) {
            return Err(CompendiumError::UnknownType {
                node_id: node.id.clone(),
                type_id: node.type_id.clone(),
            });
        }
    }
    Ok(())
}
