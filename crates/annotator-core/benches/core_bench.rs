//! Criterion benchmarks for annotator-core.
//!
//! Only the pure-Rust paths are measured, so no Python runtime is needed.
//!
//! ## Benchmark groups
//!
//! 1. **consensus**: majority vote and full table construction.
//! 2. **export**: CSV rendering of a reviewed table.
//! 3. **storage_keys**: `block_id` to storage-key resolution.
//! 4. **documents**: atomic write and read of a user document.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/annotator-core/Cargo.toml
//! # Run only the consensus group:
//! cargo bench --manifest-path crates/annotator-core/Cargo.toml -- consensus
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;

// The lib target is called `_annotator_core` (matching the Python extension
// module name).
use _annotator_core::consensus::{build_consensus_table, compute_consensus, UserAnnotations};
use _annotator_core::export::build_csv;
use _annotator_core::keys::{ContainerResolver, StorageKey};
use _annotator_core::models::{AnnotationRecord, FinalLabelRecord, Label, UserDocument};
use _annotator_core::store::atomic::{read_document, write_document};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const TIMESTAMP: &str = "2025-01-01T00:00:00.000000+00:00";

fn block_ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("block_{i:04}")).collect()
}

/// `users` annotators each labelling every block, with a label pattern that
/// produces a mix of agreement and disagreement.
fn synthetic_annotations(users: usize, blocks: &[String]) -> UserAnnotations {
    (0..users)
        .map(|u| {
            let annotations: IndexMap<String, AnnotationRecord> = blocks
                .iter()
                .enumerate()
                .map(|(b, id)| {
                    let label = ((b + u * (b % 3)) % 4 + 1) as Label;
                    let record = AnnotationRecord {
                        label,
                        annotated_at: TIMESTAMP.to_string(),
                    };
                    (id.clone(), record)
                })
                .collect();
            (format!("user_{u:02}"), annotations)
        })
        .collect()
}

struct FixedRoot;

impl ContainerResolver for FixedRoot {
    fn resolve_absolute_container(&self, _block_id: &str) -> Option<String> {
        Some("/mnt/share/data/blocks".to_string())
    }
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

fn bench_consensus(c: &mut Criterion) {
    let mut group = c.benchmark_group("consensus");

    let votes: Vec<Option<Label>> = (0..16).map(|i| Some(i % 5 + 1)).collect();
    group.bench_function("compute_16_votes", |b| {
        b.iter(|| compute_consensus(black_box(&votes)))
    });

    for &blocks in &[100usize, 1_000, 5_000] {
        let ids = block_ids(blocks);
        let all = synthetic_annotations(8, &ids);
        group.bench_with_input(BenchmarkId::new("table_8_users", blocks), &ids, |b, ids| {
            b.iter(|| build_consensus_table(black_box(&all), black_box(ids)))
        });
    }
    group.finish();
}

fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");

    let ids = block_ids(2_000);
    let all = synthetic_annotations(8, &ids);
    let rows = build_consensus_table(&all, &ids);
    let usernames: Vec<String> = all.keys().cloned().collect();
    let finals: IndexMap<String, FinalLabelRecord> = ids
        .iter()
        .step_by(7)
        .map(|id| {
            let record = FinalLabelRecord {
                final_label: 2,
                set_by: "admin".to_string(),
                set_at: TIMESTAMP.to_string(),
            };
            (id.clone(), record)
        })
        .collect();

    group.bench_function("build_csv_2000x8", |b| {
        b.iter(|| build_csv(black_box(&rows), &finals, &usernames, TIMESTAMP))
    });
    group.finish();
}

fn bench_storage_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage_keys");
    let resolver = FixedRoot;

    group.bench_function("split_bare", |b| {
        b.iter(|| StorageKey::resolve(black_box("block_0042"), None))
    });
    group.bench_function("split_composite", |b| {
        b.iter(|| StorageKey::resolve(black_box("data/run1/block_0042"), None))
    });
    group.bench_function("resolver", |b| {
        b.iter(|| StorageKey::resolve(black_box("block_0042"), Some(&resolver)))
    });
    group.finish();
}

fn bench_documents(c: &mut Criterion) {
    let mut group = c.benchmark_group("documents");
    group.sample_size(20);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alice.json");
    let mut document = UserDocument::empty("alice");
    for id in block_ids(1_000) {
        let key = StorageKey::resolve(&id, Some(&FixedRoot));
        let record = AnnotationRecord {
            label: 1,
            annotated_at: TIMESTAMP.to_string(),
        };
        document
            .annotations
            .entry(key.container_path)
            .or_default()
            .insert(key.item_name, record);
    }

    group.bench_function("write_1000_records", |b| {
        b.iter(|| write_document(&path, black_box(&document)).unwrap())
    });
    write_document(&path, &document).unwrap();
    group.bench_function("read_1000_records", |b| {
        b.iter(|| read_document::<UserDocument>(black_box(&path)).unwrap())
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_consensus,
    bench_export,
    bench_storage_keys,
    bench_documents
);
criterion_main!(benches);
