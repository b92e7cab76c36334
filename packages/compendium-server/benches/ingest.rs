//! Re-ingestion cost benchmark.
//!
//! Measures one run that re-ingests a single node whose dependency list
//! changed, against a graph already holding N nodes. Each node declares
//! `DEPS_PER_NODE` dependencies; the re-ingested node swaps half of them,
//! so every run stores new edges and deletes stale ones.
//!
//! Run: cargo bench --bench ingest

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use compendium::workflow::ManualClock;
use compendium::{Compendium, CompendiumConfig, IngestBatch, MemoryStore, NodeInput, NodeType};

const DEPS_PER_NODE: usize = 10;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_node(idx: usize, node_count: usize, shift: usize) -> NodeInput {
    let deps = (1..=DEPS_PER_NODE).map(|d| format!("node_{}", (idx + d * (1 + shift)) % node_count));
    NodeInput::new(format!("node_{idx}"), "module").with_dependencies(deps)
}

fn make_batch(node_count: usize) -> IngestBatch {
    IngestBatch::new((0..node_count).map(|i| make_node(i, node_count, 0)).collect())
}

/// Service pre-populated with `node_count` nodes.
fn create_pre_built_graph(node_count: usize) -> Compendium {
    let service = Compendium::with_store(
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::new()),
        CompendiumConfig::in_memory(),
    )
    .unwrap();
    service.put_type(NodeType::new("module", "Module")).unwrap();
    service.ingest(make_batch(node_count)).unwrap();
    service
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_reingest_one(c: &mut Criterion) {
    let mut group = c.benchmark_group("reingest/one_node");
    for node_count in [100, 1_000, 10_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(node_count),
            &node_count,
            |b, &node_count| {
                let changed = IngestBatch::new(vec![make_node(0, node_count, 1)]);
                b.iter_batched(
                    || create_pre_built_graph(node_count),
                    |service| {
                        let report = black_box(service.ingest(changed.clone()).unwrap());
                        (service, report)
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

fn bench_full_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("reingest/full_batch");
    group.sample_size(10);
    for node_count in [100, 1_000] {
        let service = create_pre_built_graph(node_count);
        let batch = make_batch(node_count);
        group.bench_with_input(BenchmarkId::from_parameter(node_count), &batch, |b, batch| {
            b.iter(|| black_box(service.ingest(batch.clone()).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_reingest_one, bench_full_batch);
criterion_main!(benches);
