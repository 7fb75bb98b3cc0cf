//! Rebase sequencer: replay commits onto a new base.
//!
//! Each commit `c` is replayed with a three-way tree merge where the base is
//! the tree of `c`'s first parent (the empty tree for a root commit), ours is
//! the tree of the replayed history so far and theirs is `c`'s tree. A clean
//! merge becomes a new commit that keeps `c`'s author and message. A conflict
//! pauses the rebase until [`Sequencer::continue_with`], [`Sequencer::skip`]
//! or [`Sequencer::abort`].
//!
//! The branch itself only moves once, on completion, by compare-and-swap from
//! its original commit. Until then the synthesized commits are unreferenced,
//! so aborting needs no cleanup. If that swap loses because someone else
//! moved the branch, the rebase ends `Aborted` with [`BRANCH_MOVED`] and its
//! state file is removed.

pub mod state;

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, info, instrument, warn};

use grove_store::{Commit, ObjectId, ObjectStore, Signature, StoreError, Tree};

use crate::graph::{CommitGraph, GraphError};
use crate::merge::{MergeError, MergeOptions, Merger, Resolution, apply_resolutions};
use crate::refs::reflog::unix_now;
use crate::refs::{RefError, RefLogMessage, RefName, RefStore, RefValue};
use crate::tree::{self, PathMap, TreeError};

pub use state::{RebaseConflict, RebasePhase, RebaseState};

/// [`RebaseState::abort_reason`] when the branch moved before completion.
pub const BRANCH_MOVED: &str = "branch moved during rebase";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from the rebase sequencer.
#[derive(Debug, thiserror::Error)]
pub enum RebaseError {
    /// The requested operation is not valid in the current phase.
    #[error("invalid rebase transition: {from} → {to}")]
    InvalidTransition {
        /// Current phase.
        from: RebasePhase,
        /// Requested phase.
        to: RebasePhase,
    },

    /// The branch to rebase does not exist.
    #[error("branch '{branch}' does not exist")]
    BranchNotFound {
        /// The branch.
        branch: RefName,
    },

    /// No persisted rebase state exists.
    #[error("no rebase in progress")]
    NoRebaseInProgress,

    /// Merge engine failure (including incomplete resolutions).
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// Commit graph failure.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Tree building failure.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Reference failure, e.g. the branch moved during the rebase.
    #[error(transparent)]
    Ref(#[from] RefError),

    /// State (de)serialization failure.
    #[error("rebase state: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error on the state file.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl RebaseError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

/// Drives [`RebaseState`] transitions against an object and a reference
/// store. Holds no state of its own, so a paused rebase can be resumed by a
/// fresh sequencer after reloading its state.
pub struct Sequencer<'a> {
    store: &'a dyn ObjectStore,
    refs: &'a dyn RefStore,
    committer: Signature,
    options: MergeOptions,
    state_path: Option<PathBuf>,
}

impl std::fmt::Debug for Sequencer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("committer", &self.committer)
            .field("state_path", &self.state_path)
            .finish_non_exhaustive()
    }
}

impl<'a> Sequencer<'a> {
    /// A sequencer that records `committer` on replayed commits.
    #[must_use]
    pub fn new(store: &'a dyn ObjectStore, refs: &'a dyn RefStore, committer: Signature) -> Self {
        Self {
            store,
            refs,
            committer,
            options: MergeOptions::default(),
            state_path: None,
        }
    }

    /// Merge options used for each replay.
    #[must_use]
    pub const fn with_options(mut self, options: MergeOptions) -> Self {
        self.options = options;
        self
    }

    /// Persist the state to `path` after every transition. The file is
    /// removed once the rebase is completed or aborted.
    #[must_use]
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Start rebasing `branch`: replay `commits` (parents first) onto `onto`.
    ///
    /// Returns the state after replaying as far as possible: `Completed`, or
    /// `Paused` with a conflict. An empty list completes immediately and
    /// leaves the branch where it is.
    ///
    /// # Errors
    /// [`RebaseError::BranchNotFound`] if `branch` does not resolve, or any
    /// store, merge or reference failure.
    #[instrument(skip_all, fields(%branch, onto = %onto.short(), commits = commits.len()))]
    pub fn start(
        &self,
        branch: &RefName,
        commits: Vec<ObjectId>,
        onto: ObjectId,
    ) -> Result<RebaseState, RebaseError> {
        let orig_head = self
            .refs
            .resolve(branch)?
            .ok_or_else(|| RebaseError::BranchNotFound {
                branch: branch.clone(),
            })?;
        let now = unix_now();
        let mut state = RebaseState::new(branch.clone(), orig_head, onto, commits, now);
        state.advance(RebasePhase::Running, now)?;

        if state.pending.is_empty() {
            state.head = orig_head;
            state.advance(RebasePhase::Completed, now)?;
            info!("nothing to replay");
            return Ok(state);
        }

        self.persist(&state)?;
        self.drive(&mut state)?;
        Ok(state)
    }

    /// Resume a paused rebase with one resolution per conflicting path.
    ///
    /// # Errors
    /// [`RebaseError::InvalidTransition`] unless paused;
    /// [`MergeError::Unresolved`] (wrapped) if a path lacks a resolution.
    pub fn continue_with(
        &self,
        state: &mut RebaseState,
        resolutions: &BTreeMap<String, Resolution>,
    ) -> Result<(), RebaseError> {
        let conflict = paused_conflict(state, RebasePhase::Running)?;
        let paths = apply_resolutions(self.store, &conflict.tree, resolutions)?;
        let original = self.store.read_commit(conflict.commit)?;
        let replayed = self.synthesize(state.head, &original, &paths)?;

        state.advance(RebasePhase::Running, unix_now())?;
        state.conflict = None;
        state.record_replayed(conflict.commit, replayed);
        debug!(original = %conflict.commit.short(), replayed = %replayed.short(), "conflict resolved");
        self.drive(state)
    }

    /// Drop the commit the rebase stopped on and resume.
    ///
    /// # Errors
    /// [`RebaseError::InvalidTransition`] unless paused.
    pub fn skip(&self, state: &mut RebaseState) -> Result<(), RebaseError> {
        let conflict = paused_conflict(state, RebasePhase::Running)?;
        state.advance(RebasePhase::Running, unix_now())?;
        state.conflict = None;
        state.pending.retain(|c| *c != conflict.commit);
        state.skipped.push(conflict.commit);
        info!(skipped = %conflict.commit.short(), "commit skipped");
        self.drive(state)
    }

    /// Give up. The branch stays at its original commit; commits synthesized
    /// so far are left unreferenced.
    ///
    /// # Errors
    /// [`RebaseError::InvalidTransition`] if already terminal.
    pub fn abort(&self, state: &mut RebaseState) -> Result<(), RebaseError> {
        state.abort("aborted by caller", unix_now())?;
        if self.refs.resolve(&state.branch)? != Some(state.orig_head) {
            warn!(branch = %state.branch, "branch moved during rebase; leaving it as is");
        }
        info!(branch = %state.branch, "rebase aborted");
        self.finish(state)
    }

    fn drive(&self, state: &mut RebaseState) -> Result<(), RebaseError> {
        let graph = CommitGraph::new(self.store);
        let merger = Merger::new(self.store, self.committer.clone()).with_options(self.options);

        while let Some(next) = state.current() {
            let original = graph.commit(next)?;
            let base_tree = match original.parents.first() {
                Some(parent) => graph.commit(*parent)?.tree,
                None => self.store.write_tree(&Tree::empty())?,
            };
            let ours_tree = graph.commit(state.head)?.tree;
            let outcome = merger.merge_trees(base_tree, ours_tree, original.tree)?;

            if !outcome.is_clean() {
                info!(
                    commit = %next.short(),
                    conflicts = outcome.conflicts.len(),
                    "rebase paused on conflict"
                );
                state.conflict = Some(RebaseConflict {
                    commit: next,
                    tree: outcome,
                });
                state.advance(RebasePhase::Paused, unix_now())?;
                return self.persist(state);
            }

            let replayed = self.synthesize(state.head, &original, &outcome.merged)?;
            debug!(original = %next.short(), replayed = %replayed.short(), "commit replayed");
            state.record_replayed(next, replayed);
            self.persist(state)?;
        }

        self.complete(state)
    }

    fn complete(&self, state: &mut RebaseState) -> Result<(), RebaseError> {
        let message = RefLogMessage::new(
            self.committer.identity(),
            unix_now(),
            format!("rebase: finished onto {}", state.onto),
        );
        let moved = self.refs.update(
            &state.branch,
            Some(&RefValue::Direct(state.orig_head)),
            &RefValue::Direct(state.head),
            &message,
        );
        if let Err(err @ RefError::Conflict { .. }) = moved {
            // Nothing is left to replay, so the rebase cannot resume.
            warn!(branch = %state.branch, "branch moved during rebase; aborting");
            state.abort(BRANCH_MOVED, unix_now())?;
            self.finish(state)?;
            return Err(err.into());
        }
        moved?;
        state.advance(RebasePhase::Completed, unix_now())?;
        info!(
            branch = %state.branch,
            head = %state.head.short(),
            replayed = state.done.len(),
            skipped = state.skipped.len(),
            "rebase completed"
        );
        self.finish(state)
    }

    fn synthesize(
        &self,
        parent: ObjectId,
        original: &Commit,
        paths: &PathMap,
    ) -> Result<ObjectId, RebaseError> {
        let tree = tree::build(self.store, paths)?;
        Ok(self.store.write_commit(&Commit {
            tree,
            parents: vec![parent],
            author: original.author.clone(),
            committer: self.committer.clone(),
            message: original.message.clone(),
        })?)
    }

    fn persist(&self, state: &RebaseState) -> Result<(), RebaseError> {
        match &self.state_path {
            Some(path) => state.write_atomic(path),
            None => Ok(()),
        }
    }

    fn finish(&self, state: &RebaseState) -> Result<(), RebaseError> {
        debug_assert!(state.phase.is_terminal());
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RebaseError::io(path, e)),
        }
    }
}

/// The conflict of a paused state, or an invalid-transition error naming
/// `to`.
fn paused_conflict(state: &RebaseState, to: RebasePhase) -> Result<RebaseConflict, RebaseError> {
    match (&state.phase, &state.conflict) {
        (RebasePhase::Paused, Some(conflict)) => Ok(conflict.clone()),
        _ => Err(RebaseError::InvalidTransition {
            from: state.phase,
            to,
        }),
    }
}
