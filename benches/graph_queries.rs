//! Object store and commit-graph benchmarks.
//!
//! Measures object writes and the ancestry queries that merge, rebase and
//! bisect sit on: merge-base over long diverged histories and topological
//! ordering of a range.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench graph_queries
//! # With a custom filter:
//! cargo bench --bench graph_queries -- merge_base
//! ```
//!
//! # Report
//!
//! HTML report is generated in `target/criterion/` by criterion when
//! `--features html_reports` is active (enabled by default via Cargo.toml).

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use grove::graph::CommitGraph;
use grove::tree::{self, FileVersion, PathMap};
use grove::{Commit, FsObjectStore, MemoryObjectStore, ObjectId, ObjectStore, Signature};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn commit(store: &dyn ObjectStore, parents: &[ObjectId], n: usize) -> ObjectId {
    let sig = Signature::new("bench", "bench@localhost", n as i64, 0).expect("signature");
    let blob = store.write_blob(format!("{n}\n").as_bytes()).expect("blob");
    let mut paths = PathMap::new();
    paths.insert("counter".to_owned(), FileVersion::blob(blob));
    let tree = tree::build(store, &paths).expect("tree");
    store
        .write_commit(&Commit {
            tree,
            parents: parents.to_vec(),
            author: sig.clone(),
            committer: sig,
            message: format!("c{n}\n"),
        })
        .expect("commit")
}

/// A root with two branches of `depth` commits each. Returns both tips.
fn forked_history(store: &dyn ObjectStore, depth: usize) -> (ObjectId, ObjectId) {
    let root = commit(store, &[], 0);
    let mut left = root;
    let mut right = root;
    for i in 0..depth {
        left = commit(store, &[left], 2 * i + 1);
        right = commit(store, &[right], 2 * i + 2);
    }
    (left, right)
}

/// A ladder: two lines that merge into each other every `rung` commits.
fn merge_heavy_history(store: &dyn ObjectStore, depth: usize, rung: usize) -> (ObjectId, ObjectId) {
    let root = commit(store, &[], 0);
    let (mut left, mut right) = (root, root);
    for i in 0..depth {
        let n = 4 * i + 1;
        left = commit(store, &[left], n);
        right = commit(store, &[right], n + 1);
        if i % rung == rung - 1 {
            left = commit(store, &[left, right], n + 2);
            right = commit(store, &[right, left], n + 3);
        }
    }
    (left, right)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_object_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("objects/write_blob");
    for size in [64usize, 4096, 65536] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("memory", size), &payload, |b, payload| {
            let store = MemoryObjectStore::new();
            let mut salt = 0u64;
            b.iter(|| {
                salt += 1;
                let mut body = payload.clone();
                body.extend_from_slice(&salt.to_le_bytes());
                black_box(store.write_blob(&body).expect("write"))
            });
        });

        group.bench_with_input(BenchmarkId::new("fs", size), &payload, |b, payload| {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = FsObjectStore::open(dir.path().join("objects")).expect("open");
            let mut salt = 0u64;
            b.iter(|| {
                salt += 1;
                let mut body = payload.clone();
                body.extend_from_slice(&salt.to_le_bytes());
                black_box(store.write_blob(&body).expect("write"))
            });
        });
    }
    group.finish();
}

fn bench_merge_base(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_base");
    for depth in [100usize, 1000] {
        let store = MemoryObjectStore::new();
        let (left, right) = forked_history(&store, depth);
        let graph = CommitGraph::new(&store);
        group.throughput(Throughput::Elements(2 * depth as u64));
        group.bench_with_input(BenchmarkId::new("forked", depth), &depth, |b, _| {
            b.iter(|| black_box(graph.merge_base(left, right).expect("merge base")));
        });

        let store = MemoryObjectStore::new();
        let (left, right) = merge_heavy_history(&store, depth, 10);
        let graph = CommitGraph::new(&store);
        group.bench_with_input(BenchmarkId::new("ladder", depth), &depth, |b, _| {
            b.iter(|| black_box(graph.merge_bases(left, right).expect("merge bases")));
        });
    }
    group.finish();
}

fn bench_topo_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("topo_order");
    for depth in [100usize, 1000] {
        let store = MemoryObjectStore::new();
        let (left, right) = merge_heavy_history(&store, depth, 10);
        let graph = CommitGraph::new(&store);
        let commits = graph.ancestors(&[left, right]).expect("ancestors");
        group.throughput(Throughput::Elements(commits.len() as u64));
        group.bench_with_input(BenchmarkId::new("ladder", depth), &commits, |b, commits| {
            b.iter(|| black_box(graph.topo_order(commits).expect("topo order")));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_object_writes, bench_merge_base, bench_topo_order);
criterion_main!(benches);
