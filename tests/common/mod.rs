//! Shared helpers for grove integration tests.
//!
//! [`History`] builds commit graphs directly on an in-memory object store
//! with a monotonically increasing clock, so committer timestamps (and hence
//! tie-breaks) are deterministic. [`temp_repo`] gives an on-disk repository
//! in a temp directory.

#![allow(dead_code)]

use std::collections::BTreeMap;

use tempfile::TempDir;

use grove::graph::CommitGraph;
use grove::tree::{self, FileVersion, PathMap};
use grove::{
    Commit, GroveConfig, MemoryObjectStore, ObjectId, ObjectStore, Repository, Signature,
    Snapshot, SnapshotFile,
};

/// A fixed identity at `timestamp`.
pub fn sig(timestamp: i64) -> Signature {
    Signature::new("Test", "test@example.com", timestamp, 0).expect("valid signature")
}

/// Build a snapshot from `(path, content)` pairs.
pub fn snapshot(files: &[(&str, &str)]) -> Snapshot {
    files
        .iter()
        .map(|(path, content)| ((*path).to_owned(), SnapshotFile::regular(content.as_bytes())))
        .collect()
}

/// Text content of a snapshot, for readable assertions.
pub fn texts(snapshot: &Snapshot) -> BTreeMap<String, String> {
    snapshot
        .iter()
        .map(|(path, file)| (path.clone(), String::from_utf8_lossy(&file.content).into_owned()))
        .collect()
}

/// A fresh on-disk repository. Keep the `TempDir` alive for the test.
pub fn temp_repo() -> (TempDir, Repository) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let repo = Repository::init(dir.path().join("repo")).expect("init");
    (dir, repo)
}

/// An in-memory repository with default configuration.
pub fn memory_repo() -> Repository {
    Repository::in_memory(GroveConfig::default()).expect("in-memory repo")
}

/// Commit-graph builder over an in-memory store.
#[derive(Default)]
pub struct History {
    pub store: MemoryObjectStore,
    clock: i64,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit `files` (full content, not a delta) on top of `parents`.
    pub fn commit(&mut self, parents: &[ObjectId], files: &[(&str, &str)], message: &str) -> ObjectId {
        self.clock += 1;
        let mut paths = PathMap::new();
        for (path, content) in files {
            let id = self.store.write_blob(content.as_bytes()).expect("write blob");
            paths.insert((*path).to_owned(), FileVersion::blob(id));
        }
        let tree = tree::build(&self.store, &paths).expect("build tree");
        self.store
            .write_commit(&Commit {
                tree,
                parents: parents.to_vec(),
                author: sig(self.clock),
                committer: sig(self.clock),
                message: format!("{message}\n"),
            })
            .expect("write commit")
    }

    /// A chain of `n` commits, each changing `counter`.
    pub fn chain(&mut self, n: usize) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = Vec::with_capacity(n);
        for i in 0..n {
            let content = format!("{i}\n");
            let parents: Vec<ObjectId> = ids.last().copied().into_iter().collect();
            ids.push(self.commit(&parents, &[("counter", &content)], &format!("c{i}")));
        }
        ids
    }

    /// Text files of `commit`.
    pub fn files(&self, commit: ObjectId) -> BTreeMap<String, String> {
        let tree = self.store.read_commit(commit).expect("read commit").tree;
        tree::flatten(&self.store, tree)
            .expect("flatten")
            .into_iter()
            .map(|(path, version)| {
                let bytes = self.store.read_blob(version.id).expect("read blob");
                (path, String::from_utf8_lossy(&bytes).into_owned())
            })
            .collect()
    }

    pub fn graph(&self) -> CommitGraph<'_> {
        CommitGraph::new(&self.store)
    }
}
