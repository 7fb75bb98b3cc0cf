//! grove: commit-graph engine on a content-addressed object store.
//!
//! Objects live in [`grove_store`]. This crate adds mutable references with
//! compare-and-swap updates and reflogs ([`refs`]), ancestry queries
//! ([`graph`]), three-way merge ([`merge`]), a resumable rebase sequencer
//! ([`rebase`]), bisect ([`bisect`]) and the [`Repository`] facade that ties
//! them to working-tree snapshots.

pub mod bisect;
pub mod config;
pub mod error;
pub mod failpoints;
pub mod graph;
pub mod merge;
pub mod rebase;
pub mod refs;
pub mod repo;
pub mod telemetry;
pub mod tree;

pub use grove_store::{
    Commit, EntryMode, FsObjectStore, MemoryObjectStore, Object, ObjectId, ObjectKind,
    ObjectStore, Signature, StoreError, Tag, Tree, TreeEntry,
};

pub use bisect::{BisectSession, BisectStep, Verdict};
pub use config::GroveConfig;
pub use error::GroveError;
pub use graph::{CommitGraph, GraphWarning, MergeBase};
pub use merge::{ConflictSet, MergeOptions, MergeResult, MergeStrategy, Merger, Resolution};
pub use rebase::{RebasePhase, RebaseState, Sequencer};
pub use refs::{FsRefStore, MemoryRefStore, RefError, RefName, RefStore, RefValue};
pub use repo::{Repository, Snapshot, SnapshotFile};
