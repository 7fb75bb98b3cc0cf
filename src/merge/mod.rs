//! Three-way merge of commits and trees.
//!
//! [`Merger::merge`] decides between "already up to date", fast-forward and a
//! real merge. A real merge flattens the base, our and their trees to path
//! maps and merges path by path ([`Merger::merge_trees`]):
//!
//! | base | ours | theirs | result                                 |
//! |------|------|--------|----------------------------------------|
//! | any  | X    | X      | X                                      |
//! | B    | B    | T      | T                                      |
//! | B    | O    | B      | O                                      |
//! | B    | O    | T      | line merge if all text, else conflict  |
//! | B    | O    | —      | modify/delete conflict                 |
//! | —    | O    | T      | add/add conflict                       |
//!
//! A mode change on one side combines with a content change on the other.
//! Conflicting paths are settled by [`MergeStrategy`]; under the default
//! [`MergeStrategy::ThreeWay`] they are returned as a [`ConflictSet`].

pub mod text;
pub mod types;

use std::collections::BTreeSet;

use tracing::{debug, info, instrument};

use grove_store::{Commit, EntryMode, ObjectId, ObjectStore, Signature, StoreError, Tree};

use crate::graph::{CommitGraph, GraphError};
use crate::tree::{self, FileVersion, PathMap, TreeError};

pub use types::{
    ConflictReason, ConflictSet, DEFAULT_BINARY_SNIFF_LEN, MergeOptions, MergeResult,
    MergeStrategy, PathConflict, Resolution, TreeMerge, apply_resolutions,
};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from the merge engine. Conflicts are data, not errors.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// Object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Commit graph failure.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Tree flattening or building failure.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Conflicting paths were left without a resolution.
    #[error("unresolved conflicts: {}", paths.join(", "))]
    Unresolved {
        /// Paths still conflicting.
        paths: Vec<String>,
    },

    /// A resolution was given for a path that is not conflicting.
    #[error("'{path}' is not a conflicting path")]
    UnknownPath {
        /// The path.
        path: String,
    },
}

// ---------------------------------------------------------------------------
// Merger
// ---------------------------------------------------------------------------

/// Merges commits and trees stored in one [`ObjectStore`].
pub struct Merger<'a> {
    store: &'a dyn ObjectStore,
    committer: Signature,
    options: MergeOptions,
}

impl std::fmt::Debug for Merger<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger")
            .field("committer", &self.committer)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'a> Merger<'a> {
    /// A merger that signs merge commits as `committer`.
    #[must_use]
    pub fn new(store: &'a dyn ObjectStore, committer: Signature) -> Self {
        Self {
            store,
            committer,
            options: MergeOptions::default(),
        }
    }

    /// Replace the options.
    #[must_use]
    pub const fn with_options(mut self, options: MergeOptions) -> Self {
        self.options = options;
        self
    }

    /// The active options.
    #[must_use]
    pub const fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Merge `theirs` into `ours`.
    ///
    /// Creates a merge commit with parents `(ours, theirs)` and `message`
    /// when the trees merge cleanly. Never moves references.
    ///
    /// # Errors
    /// [`MergeError`] on store or graph failures.
    #[instrument(skip_all, fields(ours = %ours.short(), theirs = %theirs.short()))]
    pub fn merge(
        &self,
        ours: ObjectId,
        theirs: ObjectId,
        message: &str,
    ) -> Result<MergeResult, MergeError> {
        let graph = CommitGraph::new(self.store);
        if graph.is_ancestor(theirs, ours)? {
            debug!("already up to date");
            return Ok(MergeResult::AlreadyUpToDate(ours));
        }
        if graph.is_ancestor(ours, theirs)? {
            debug!("fast-forward");
            return Ok(MergeResult::FastForward(theirs));
        }

        let detail = graph.merge_base_detail(ours, theirs)?;
        let warnings: Vec<_> = detail.warning().into_iter().collect();
        let base_tree = match detail.chosen {
            Some(base) => graph.commit(base)?.tree,
            None => self.store.write_tree(&Tree::empty())?,
        };
        let ours_tree = graph.commit(ours)?.tree;
        let theirs_tree = graph.commit(theirs)?.tree;

        let outcome = self.merge_trees(base_tree, ours_tree, theirs_tree)?;
        if !outcome.is_clean() {
            info!(conflicts = outcome.conflicts.len(), "merge stopped on conflicts");
            return Ok(MergeResult::Conflicts(Box::new(ConflictSet {
                ours,
                theirs,
                base: detail.chosen,
                tree: outcome,
                warnings,
            })));
        }

        let tree = tree::build(self.store, &outcome.merged)?;
        let commit = self.store.write_commit(&Commit {
            tree,
            parents: vec![ours, theirs],
            author: self.committer.clone(),
            committer: self.committer.clone(),
            message: message.to_owned(),
        })?;
        info!(commit = %commit.short(), "merge commit created");
        Ok(MergeResult::Merged {
            commit,
            tree,
            warnings,
        })
    }

    /// Finish a conflicted merge with one resolution per conflicting path.
    ///
    /// # Errors
    /// [`MergeError::Unresolved`] / [`MergeError::UnknownPath`] for
    /// incomplete or stray resolutions, otherwise store failures.
    pub fn conclude(
        &self,
        conflicts: &ConflictSet,
        resolutions: &std::collections::BTreeMap<String, Resolution>,
        message: &str,
    ) -> Result<ObjectId, MergeError> {
        let paths = apply_resolutions(self.store, &conflicts.tree, resolutions)?;
        let tree = tree::build(self.store, &paths)?;
        Ok(self.store.write_commit(&Commit {
            tree,
            parents: vec![conflicts.ours, conflicts.theirs],
            author: self.committer.clone(),
            committer: self.committer.clone(),
            message: message.to_owned(),
        })?)
    }

    /// Merge three trees path by path.
    ///
    /// # Errors
    /// [`MergeError`] if a tree or blob cannot be read or a merged blob
    /// cannot be written.
    pub fn merge_trees(
        &self,
        base: ObjectId,
        ours: ObjectId,
        theirs: ObjectId,
    ) -> Result<TreeMerge, MergeError> {
        let base = tree::flatten(self.store, base)?;
        let ours = tree::flatten(self.store, ours)?;
        let theirs = tree::flatten(self.store, theirs)?;

        let paths: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
        let mut outcome = TreeMerge::default();
        for path in paths {
            let b = base.get(path).copied();
            let o = ours.get(path).copied();
            let t = theirs.get(path).copied();
            match self.merge_path(b, o, t)? {
                PathOutcome::Take(Some(version)) => {
                    outcome.merged.insert(path.clone(), version);
                }
                PathOutcome::Take(None) => {}
                PathOutcome::Conflict(reason) => {
                    let conflict = PathConflict {
                        path: path.clone(),
                        base: b,
                        ours: o,
                        theirs: t,
                        reason,
                    };
                    if let Some(version) = self.settle(&conflict) {
                        outcome.merged.insert(path.clone(), version);
                    } else if self.options.strategy == MergeStrategy::ThreeWay {
                        outcome.conflicts.push(conflict);
                    }
                }
            }
        }

        self.split_clashes(&mut outcome, &base, &ours, &theirs);
        Ok(outcome)
    }

    /// Apply the strategy to a conflict. `None` means "delete" for the
    /// one-sided strategies and "still conflicting" for three-way.
    fn settle(&self, conflict: &PathConflict) -> Option<FileVersion> {
        match self.options.strategy {
            MergeStrategy::ThreeWay => None,
            MergeStrategy::Ours => conflict.ours,
            MergeStrategy::Theirs => conflict.theirs,
        }
    }

    /// Move file/directory clashes among clean paths into the conflicts.
    fn split_clashes(&self, outcome: &mut TreeMerge, base: &PathMap, ours: &PathMap, theirs: &PathMap) {
        let clashes = tree::file_directory_clashes(&outcome.merged);
        if clashes.is_empty() {
            return;
        }
        let involved: BTreeSet<String> = clashes.into_iter().flat_map(|(f, n)| [f, n]).collect();
        for path in involved {
            let conflict = PathConflict {
                base: base.get(&path).copied(),
                ours: ours.get(&path).copied(),
                theirs: theirs.get(&path).copied(),
                path,
                reason: ConflictReason::FileDirectory,
            };
            match self.options.strategy {
                MergeStrategy::ThreeWay => {
                    outcome.merged.remove(&conflict.path);
                    outcome.conflicts.push(conflict);
                }
                // The favoured side is a valid tree, so its view wins.
                MergeStrategy::Ours | MergeStrategy::Theirs => match self.settle(&conflict) {
                    Some(version) => {
                        outcome.merged.insert(conflict.path, version);
                    }
                    None => {
                        outcome.merged.remove(&conflict.path);
                    }
                },
            }
        }
        outcome.conflicts.sort_by(|a, b| a.path.cmp(&b.path));
    }

    fn merge_path(
        &self,
        base: Option<FileVersion>,
        ours: Option<FileVersion>,
        theirs: Option<FileVersion>,
    ) -> Result<PathOutcome, MergeError> {
        if ours == theirs {
            return Ok(PathOutcome::Take(ours));
        }
        if ours == base {
            return Ok(PathOutcome::Take(theirs));
        }
        if theirs == base {
            return Ok(PathOutcome::Take(ours));
        }
        let (Some(o), Some(t)) = (ours, theirs) else {
            return Ok(PathOutcome::Conflict(ConflictReason::ModifyDelete));
        };
        let Some(b) = base else {
            return Ok(PathOutcome::Conflict(ConflictReason::AddAdd));
        };

        let Some(mode) = pick(b.mode, o.mode, t.mode) else {
            return Ok(PathOutcome::Conflict(ConflictReason::Mode));
        };
        if let Some(id) = pick(b.id, o.id, t.id) {
            return Ok(PathOutcome::Take(Some(FileVersion { id, mode })));
        }

        if mode == EntryMode::Link || !self.options.text_merge {
            return Ok(PathOutcome::Conflict(ConflictReason::Binary));
        }
        let sniff = self.options.binary_sniff_len;
        let base_text = self.store.read_blob(b.id)?;
        let ours_text = self.store.read_blob(o.id)?;
        let theirs_text = self.store.read_blob(t.id)?;
        if [&base_text, &ours_text, &theirs_text]
            .iter()
            .any(|c| text::is_binary(c, sniff))
        {
            return Ok(PathOutcome::Conflict(ConflictReason::Binary));
        }
        match text::merge_lines(&base_text, &ours_text, &theirs_text).into_clean() {
            Some(merged) => {
                let id = self.store.write_blob(&merged)?;
                Ok(PathOutcome::Take(Some(FileVersion { id, mode })))
            }
            None => Ok(PathOutcome::Conflict(ConflictReason::Content)),
        }
    }
}

enum PathOutcome {
    Take(Option<FileVersion>),
    Conflict(ConflictReason),
}

/// Classic three-way pick of a scalar: agreement, or the side that changed.
fn pick<T: PartialEq + Copy>(base: T, ours: T, theirs: T) -> Option<T> {
    if ours == theirs || theirs == base {
        Some(ours)
    } else if ours == base {
        Some(theirs)
    } else {
        None
    }
}
