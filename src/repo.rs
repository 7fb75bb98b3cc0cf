//! Repository facade.
//!
//! [`Repository`] owns an object store, a reference store and the loaded
//! configuration, and implements the operations that move references:
//! committing a working-tree [`Snapshot`], checkout, branch and tag
//! management, merging into `HEAD`, reset, rebase and bisect.
//!
//! # On-disk layout
//!
//! ```text
//! <root>/
//!   config.toml          optional, see crate::config
//!   objects/<2>/<62>     one file per object
//!   refs/HEAD, refs/heads/..., refs/tags/...
//!   logs/<escaped name>  JSON-lines reflogs
//!   rebase-state.json    only while a rebase is paused
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use grove_store::{
    Commit, EntryMode, FsObjectStore, MemoryObjectStore, ObjectId, ObjectKind, ObjectStore,
    Signature, Tag,
};

use crate::bisect::BisectSession;
use crate::config::GroveConfig;
use crate::error::GroveError;
use crate::graph::CommitGraph;
use crate::merge::{ConflictSet, MergeResult, Merger, Resolution};
use crate::rebase::{RebaseError, RebaseState, Sequencer};
use crate::refs::reflog::unix_now;
use crate::refs::{
    FsRefStore, HEADS_PREFIX, MemoryRefStore, RefError, RefLogMessage, RefName, RefStore,
    RefValue, ReflogEntry, TAGS_PREFIX,
};
use crate::tree::{self, FileVersion, PathMap, TreeError};

/// Object directory under the repository root.
pub const OBJECTS_DIR: &str = "objects";
/// Configuration file under the repository root.
pub const CONFIG_FILE: &str = "config.toml";
/// Persisted rebase state under the repository root.
pub const REBASE_STATE_FILE: &str = "rebase-state.json";
/// Branch `HEAD` points at in a new repository.
pub const DEFAULT_BRANCH: &str = "main";
/// Attempts made by reference updates that retry lost races.
pub const MAX_REF_ATTEMPTS: usize = 5;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One file of a working-tree snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// File content (the link target for symlinks).
    pub content: Vec<u8>,
    /// File mode; never [`EntryMode::Tree`].
    pub mode: EntryMode,
}

impl SnapshotFile {
    /// A regular file.
    #[must_use]
    pub fn regular(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            mode: EntryMode::Blob,
        }
    }

    /// An executable file.
    #[must_use]
    pub fn executable(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            mode: EntryMode::BlobExecutable,
        }
    }

    /// A symbolic link to `target`.
    #[must_use]
    pub fn symlink(target: impl Into<Vec<u8>>) -> Self {
        Self {
            content: target.into(),
            mode: EntryMode::Link,
        }
    }
}

/// Working-tree content: `/`-separated relative path → file.
pub type Snapshot = BTreeMap<String, SnapshotFile>;

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// A repository: object store, reference store and configuration.
pub struct Repository {
    objects: Box<dyn ObjectStore>,
    refs: Box<dyn RefStore>,
    config: GroveConfig,
    root: Option<PathBuf>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// What one attempt of a retried reference update decided.
enum Attempt<T> {
    /// CAS the reference to this value, then return `T`.
    Write(RefValue, String, T),
    /// Return `T` without touching the reference.
    Done(T),
}

impl Repository {
    /// Create a repository at `root`, with `HEAD` on the `main` branch.
    ///
    /// An existing `config.toml` in `root` is honoured.
    ///
    /// # Errors
    /// [`GroveError::AlreadyInitialized`] if `root` already holds one.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn init(root: impl AsRef<Path>) -> Result<Self, GroveError> {
        let root = root.as_ref();
        if root.join(OBJECTS_DIR).exists() {
            return Err(GroveError::AlreadyInitialized {
                path: root.to_owned(),
            });
        }
        std::fs::create_dir_all(root).map_err(|source| GroveError::Io {
            path: root.to_owned(),
            source,
        })?;
        let repo = Self::open_stores(root)?;
        repo.point_head_at_default_branch()?;
        info!("repository initialized");
        Ok(repo)
    }

    /// Open the repository at `root`.
    ///
    /// # Errors
    /// [`GroveError::NotARepository`] if `root` has no object directory,
    /// [`GroveError::Config`] for a bad `config.toml`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, GroveError> {
        let root = root.as_ref();
        if !root.join(OBJECTS_DIR).is_dir() {
            return Err(GroveError::NotARepository {
                path: root.to_owned(),
            });
        }
        Self::open_stores(root)
    }

    fn open_stores(root: &Path) -> Result<Self, GroveError> {
        let config = GroveConfig::load(&root.join(CONFIG_FILE))?;
        let objects = FsObjectStore::open(root.join(OBJECTS_DIR))?;
        let refs = FsRefStore::open(root)?.with_max_symbolic_depth(config.refs.max_symbolic_depth);
        Ok(Self {
            objects: Box::new(objects),
            refs: Box::new(refs),
            config,
            root: Some(root.to_owned()),
        })
    }

    /// A repository that lives only in memory. Rebase state is not
    /// persisted.
    ///
    /// # Errors
    /// Only if `HEAD` cannot be created.
    pub fn in_memory(config: GroveConfig) -> Result<Self, GroveError> {
        let refs =
            MemoryRefStore::new().with_max_symbolic_depth(config.refs.max_symbolic_depth);
        let repo = Self {
            objects: Box::new(MemoryObjectStore::new()),
            refs: Box::new(refs),
            config,
            root: None,
        };
        repo.point_head_at_default_branch()?;
        Ok(repo)
    }

    fn point_head_at_default_branch(&self) -> Result<(), GroveError> {
        let head = RefName::head();
        if self.refs.read(&head)?.is_none() {
            self.refs.update(
                &head,
                None,
                &RefValue::Symbolic(RefName::branch(DEFAULT_BRANCH)?),
                &self.reflog_message("init"),
            )?;
        }
        Ok(())
    }

    /// The object store.
    #[must_use]
    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    /// The reference store.
    #[must_use]
    pub fn refs(&self) -> &dyn RefStore {
        self.refs.as_ref()
    }

    /// Loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &GroveConfig {
        &self.config
    }

    /// Repository root, `None` for in-memory repositories.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Ancestry queries over this repository's commits.
    #[must_use]
    pub fn graph(&self) -> CommitGraph<'_> {
        CommitGraph::new(self.objects.as_ref())
    }

    /// The configured identity, stamped now.
    ///
    /// # Errors
    /// [`GroveError::Store`] if the configured identity is invalid.
    pub fn signature(&self) -> Result<Signature, GroveError> {
        Ok(self.config.identity.signature(unix_now())?)
    }

    fn reflog_message(&self, reason: impl Into<String>) -> RefLogMessage {
        let identity = &self.config.identity;
        RefLogMessage::now(format!("{} <{}>", identity.name, identity.email), reason)
    }

    fn merger(&self) -> Result<Merger<'_>, GroveError> {
        Ok(Merger::new(self.objects.as_ref(), self.signature()?)
            .with_options(self.config.merge.options()))
    }

    fn rebase_state_path(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(REBASE_STATE_FILE))
    }

    fn sequencer(&self) -> Result<Sequencer<'_>, GroveError> {
        let sequencer = Sequencer::new(self.objects.as_ref(), self.refs.as_ref(), self.signature()?)
            .with_options(self.config.merge.options());
        Ok(match self.rebase_state_path() {
            Some(path) => sequencer.with_state_file(path),
            None => sequencer,
        })
    }

    // -----------------------------------------------------------------------
    // HEAD and revisions
    // -----------------------------------------------------------------------

    /// The commit `HEAD` resolves to; `None` on an unborn branch.
    ///
    /// # Errors
    /// Reference failures such as a symbolic cycle.
    pub fn head(&self) -> Result<Option<ObjectId>, GroveError> {
        Ok(self.refs.resolve(&RefName::head())?)
    }

    /// The branch `HEAD` is on; `None` when detached.
    ///
    /// # Errors
    /// Reference failures.
    pub fn current_branch(&self) -> Result<Option<RefName>, GroveError> {
        match self.refs.read(&RefName::head())? {
            Some(RefValue::Symbolic(_)) => Ok(Some(self.refs.resolve_target(&RefName::head())?)),
            _ => Ok(None),
        }
    }

    /// Resolve a revision: a full hex id, a reference name, a branch or a
    /// tag. Annotated tags are peeled to the commit they point at.
    ///
    /// # Errors
    /// [`GroveError::UnknownRevision`] if nothing matches.
    pub fn resolve_revision(&self, spec: &str) -> Result<ObjectId, GroveError> {
        if let Ok(id) = spec.parse::<ObjectId>()
            && self.objects.contains(id)?
        {
            return self.peel_to_commit(id, spec);
        }
        let candidates = [
            RefName::new(spec).ok(),
            RefName::branch(spec).ok(),
            RefName::tag(spec).ok(),
        ];
        for name in candidates.into_iter().flatten() {
            if let Some(id) = self.refs.resolve(&name)? {
                return self.peel_to_commit(id, spec);
            }
        }
        Err(GroveError::UnknownRevision {
            spec: spec.to_owned(),
        })
    }

    fn peel_to_commit(&self, id: ObjectId, spec: &str) -> Result<ObjectId, GroveError> {
        match self.objects.peel(id)? {
            (commit, ObjectKind::Commit) => Ok(commit),
            _ => Err(GroveError::UnknownRevision {
                spec: spec.to_owned(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Store `snapshot` and return its root tree.
    ///
    /// # Errors
    /// [`TreeError`] for invalid paths or a path that is both a file and a
    /// directory.
    pub fn write_snapshot(&self, snapshot: &Snapshot) -> Result<ObjectId, GroveError> {
        let mut paths = PathMap::new();
        for (path, file) in snapshot {
            tree::validate_path(path)?;
            if file.mode.is_tree() {
                return Err(TreeError::InvalidPath {
                    path: path.clone(),
                    reason: "snapshot entries must be files".to_owned(),
                }
                .into());
            }
            let id = self.objects.write_blob(&file.content)?;
            paths.insert(path.clone(), FileVersion { id, mode: file.mode });
        }
        Ok(tree::build(self.objects.as_ref(), &paths)?)
    }

    /// Read every file below `tree`.
    ///
    /// # Errors
    /// Store failures.
    pub fn read_snapshot(&self, tree: ObjectId) -> Result<Snapshot, GroveError> {
        tree::flatten(self.objects.as_ref(), tree)?
            .into_iter()
            .map(|(path, version)| {
                let content = self.objects.read_blob(version.id)?;
                Ok::<_, GroveError>((
                    path,
                    SnapshotFile {
                        content,
                        mode: version.mode,
                    },
                ))
            })
            .collect()
    }

    /// Commit `snapshot` on top of `HEAD` and advance the branch `HEAD` is
    /// on (or `HEAD` itself when detached).
    ///
    /// # Errors
    /// [`RefError::Conflict`] (wrapped) if the branch moved meanwhile; the
    /// new commit is then left unreferenced.
    #[instrument(skip_all, fields(files = snapshot.len()))]
    pub fn commit_snapshot(&self, snapshot: &Snapshot, message: &str) -> Result<ObjectId, GroveError> {
        let tree = self.write_snapshot(snapshot)?;
        let target = self.refs.resolve_target(&RefName::head())?;
        let current = self.refs.read(&target)?;
        let parent = current.as_ref().and_then(RefValue::as_direct);
        let signature = self.signature()?;
        let commit = self.objects.write_commit(&Commit {
            tree,
            parents: parent.into_iter().collect(),
            author: signature.clone(),
            committer: signature,
            message: message.to_owned(),
        })?;

        let reason = match parent {
            Some(_) => format!("commit: {}", first_line(message)),
            None => format!("commit (initial): {}", first_line(message)),
        };
        self.refs.update(
            &target,
            current.as_ref(),
            &RefValue::Direct(commit),
            &self.reflog_message(reason),
        )?;
        info!(commit = %commit.short(), branch = %target, "committed");
        Ok(commit)
    }

    /// Point `HEAD` at `branch` and return that branch's snapshot.
    ///
    /// # Errors
    /// [`RefError::NotFound`] (wrapped) if the branch does not exist.
    pub fn checkout(&self, branch: &str) -> Result<Snapshot, GroveError> {
        let name = RefName::branch(branch)?;
        let commit = self
            .refs
            .resolve(&name)?
            .ok_or_else(|| RefError::NotFound { name: name.clone() })?;
        self.move_head(RefValue::Symbolic(name.clone()), &format!("checkout: moving to {branch}"))?;
        debug!(%name, "checked out");
        self.read_snapshot(self.objects.read_commit(commit)?.tree)
    }

    /// Detach `HEAD` at `commit` and return its snapshot.
    ///
    /// # Errors
    /// Store failures if `commit` is not a commit.
    pub fn checkout_detached(&self, commit: ObjectId) -> Result<Snapshot, GroveError> {
        let tree = self.objects.read_commit(commit)?.tree;
        self.move_head(
            RefValue::Direct(commit),
            &format!("checkout: moving to {}", commit.short()),
        )?;
        self.read_snapshot(tree)
    }

    fn move_head(&self, value: RefValue, reason: &str) -> Result<(), GroveError> {
        let head = RefName::head();
        self.update_with_retry(&head, |_| Ok(Attempt::Write(value.clone(), reason.to_owned(), ())))
    }

    // -----------------------------------------------------------------------
    // Branches and tags
    // -----------------------------------------------------------------------

    /// Create branch `name` at `commit`.
    ///
    /// # Errors
    /// [`RefError::Conflict`] (wrapped) if it already exists; store failures
    /// if `commit` is not a commit.
    pub fn create_branch(&self, name: &str, commit: ObjectId) -> Result<RefName, GroveError> {
        let branch = RefName::branch(name)?;
        self.objects.read_commit(commit)?;
        self.refs.update(
            &branch,
            None,
            &RefValue::Direct(commit),
            &self.reflog_message(format!("branch: created from {}", commit.short())),
        )?;
        Ok(branch)
    }

    /// Delete branch `name`. The branch `HEAD` is on cannot be deleted.
    ///
    /// # Errors
    /// [`GroveError::CurrentBranch`], or [`RefError::NotFound`] (wrapped).
    pub fn delete_branch(&self, name: &str) -> Result<(), GroveError> {
        let branch = RefName::branch(name)?;
        if self.current_branch()?.as_ref() == Some(&branch) {
            return Err(GroveError::CurrentBranch { name: branch });
        }
        let current = self
            .refs
            .read(&branch)?
            .ok_or_else(|| RefError::NotFound { name: branch.clone() })?;
        self.refs
            .delete(&branch, &current, &self.reflog_message("branch: deleted"))?;
        Ok(())
    }

    /// Every branch with the commit it points at.
    ///
    /// # Errors
    /// Reference failures.
    pub fn branches(&self) -> Result<Vec<(RefName, ObjectId)>, GroveError> {
        Ok(self
            .refs
            .list(HEADS_PREFIX)?
            .into_iter()
            .filter_map(|(name, value)| value.as_direct().map(|id| (name, id)))
            .collect())
    }

    /// Every tag with the object it points at (a tag object for annotated
    /// tags).
    ///
    /// # Errors
    /// Reference failures.
    pub fn tags(&self) -> Result<Vec<(RefName, ObjectId)>, GroveError> {
        Ok(self
            .refs
            .list(TAGS_PREFIX)?
            .into_iter()
            .filter_map(|(name, value)| value.as_direct().map(|id| (name, id)))
            .collect())
    }

    /// Create a lightweight tag: a plain reference to `target`.
    ///
    /// # Errors
    /// [`RefError::Conflict`] (wrapped) if the tag exists.
    pub fn create_tag(&self, name: &str, target: ObjectId) -> Result<RefName, GroveError> {
        let tag = RefName::tag(name)?;
        self.objects.peel(target)?;
        self.refs.update(
            &tag,
            None,
            &RefValue::Direct(target),
            &self.reflog_message("tag: created"),
        )?;
        Ok(tag)
    }

    /// Create an annotated tag object for `target` and a reference to it.
    ///
    /// # Errors
    /// [`RefError::Conflict`] (wrapped) if the tag exists; store failures
    /// for an invalid name or a missing target.
    pub fn create_annotated_tag(
        &self,
        name: &str,
        target: ObjectId,
        message: &str,
    ) -> Result<ObjectId, GroveError> {
        let tag_ref = RefName::tag(name)?;
        let target_kind = self.objects.get_raw(target)?.kind;
        let tag = Tag::new(name, target, target_kind, self.signature()?, message)?;
        let id = self.objects.write_tag(&tag)?;
        self.refs.update(
            &tag_ref,
            None,
            &RefValue::Direct(id),
            &self.reflog_message("tag: created (annotated)"),
        )?;
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// History reachable from `HEAD`, newest first. Empty when unborn.
    ///
    /// # Errors
    /// Store failures.
    pub fn log(&self) -> Result<Vec<ObjectId>, GroveError> {
        match self.head()? {
            Some(tip) => Ok(self.graph().log(tip)?),
            None => Ok(Vec::new()),
        }
    }

    /// The reflog of `name`, oldest first.
    ///
    /// # Errors
    /// Reference failures.
    pub fn reflog(&self, name: &RefName) -> Result<Vec<ReflogEntry>, GroveError> {
        Ok(self.refs.reflog(name)?)
    }

    /// Apply the configured retention policy to every reflog, including
    /// those of deleted references. Returns the number of entries dropped.
    ///
    /// # Errors
    /// Reference failures.
    pub fn prune_reflogs(&self, now: i64) -> Result<usize, GroveError> {
        let policy = self.config.reflog.policy();
        let names = self.refs.reflog_names()?;
        let mut dropped = 0;
        for name in &names {
            dropped += self.refs.prune_reflog(name, &policy, now)?;
        }
        info!(refs = names.len(), dropped, "reflogs pruned");
        Ok(dropped)
    }

    // -----------------------------------------------------------------------
    // Merge and reset
    // -----------------------------------------------------------------------

    /// Merge `theirs` into `HEAD`.
    ///
    /// Fast-forwards and clean merges advance the branch `HEAD` is on. If
    /// the branch moves during the merge, the merge is recomputed against
    /// the new tip (bounded retries). Conflicts move nothing; finish them
    /// with [`Repository::conclude_merge`].
    ///
    /// # Errors
    /// [`GroveError::Unborn`] on an unborn branch, otherwise merge and
    /// reference failures.
    #[instrument(skip_all, fields(theirs = %theirs.short()))]
    pub fn merge_into_head(&self, theirs: ObjectId, message: &str) -> Result<MergeResult, GroveError> {
        let target = self.refs.resolve_target(&RefName::head())?;
        let merger = self.merger()?;
        self.update_with_retry(&target, |current| {
            let ours = current
                .and_then(RefValue::as_direct)
                .ok_or_else(|| GroveError::Unborn {
                    name: target.clone(),
                })?;
            let result = merger.merge(ours, theirs, message)?;
            Ok(match &result {
                MergeResult::FastForward(id) => Attempt::Write(
                    RefValue::Direct(*id),
                    "merge: fast-forward".to_owned(),
                    result.clone(),
                ),
                MergeResult::Merged { commit, .. } => Attempt::Write(
                    RefValue::Direct(*commit),
                    format!("merge: {}", first_line(message)),
                    result.clone(),
                ),
                MergeResult::AlreadyUpToDate(_) | MergeResult::Conflicts(_) => Attempt::Done(result),
            })
        })
    }

    /// Commit a conflicted merge with one resolution per path and advance
    /// the branch from the merge's `ours` commit.
    ///
    /// # Errors
    /// [`crate::merge::MergeError::Unresolved`] (wrapped) for missing
    /// resolutions; [`RefError::Conflict`] (wrapped) if the branch moved.
    pub fn conclude_merge(
        &self,
        conflicts: &ConflictSet,
        resolutions: &BTreeMap<String, Resolution>,
        message: &str,
    ) -> Result<ObjectId, GroveError> {
        let commit = self.merger()?.conclude(conflicts, resolutions, message)?;
        let target = self.refs.resolve_target(&RefName::head())?;
        self.refs.update(
            &target,
            Some(&RefValue::Direct(conflicts.ours)),
            &RefValue::Direct(commit),
            &self.reflog_message(format!("merge: {} (resolved)", first_line(message))),
        )?;
        info!(commit = %commit.short(), "merge concluded");
        Ok(commit)
    }

    /// Point the branch `HEAD` is on at `commit`, whatever it held before.
    /// Returns the previous commit.
    ///
    /// # Errors
    /// Store failures if `commit` is not a commit.
    pub fn reset(&self, commit: ObjectId) -> Result<Option<ObjectId>, GroveError> {
        self.objects.read_commit(commit)?;
        let target = self.refs.resolve_target(&RefName::head())?;
        let reason = format!("reset: moving to {}", commit.short());
        self.update_with_retry(&target, |current| {
            Ok(Attempt::Write(
                RefValue::Direct(commit),
                reason.clone(),
                current.and_then(RefValue::as_direct),
            ))
        })
    }

    /// Compare-and-swap `name`, re-running `attempt` against the fresh value
    /// each time the swap loses a race.
    fn update_with_retry<T, F>(&self, name: &RefName, mut attempt: F) -> Result<T, GroveError>
    where
        F: FnMut(Option<&RefValue>) -> Result<Attempt<T>, GroveError>,
    {
        for n in 1..=MAX_REF_ATTEMPTS {
            let current = self.refs.read(name)?;
            let (value, reason, out) = match attempt(current.as_ref())? {
                Attempt::Done(out) => return Ok(out),
                Attempt::Write(value, reason, out) => (value, reason, out),
            };
            match self
                .refs
                .update(name, current.as_ref(), &value, &self.reflog_message(reason))
            {
                Ok(()) => return Ok(out),
                Err(e) if e.is_retryable() => {
                    warn!(%name, attempt = n, error = %e, "reference update lost a race; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(GroveError::RetriesExhausted {
            name: name.clone(),
            attempts: MAX_REF_ATTEMPTS,
        })
    }

    // -----------------------------------------------------------------------
    // Rebase
    // -----------------------------------------------------------------------

    /// Rebase `branch` onto `onto`: replay the commits reachable from the
    /// branch but not from `onto`, parents first.
    ///
    /// # Errors
    /// [`GroveError::RebaseInProgress`] if a paused rebase is on disk;
    /// otherwise sequencer failures.
    pub fn rebase(&self, branch: &str, onto: ObjectId) -> Result<RebaseState, GroveError> {
        if self.load_rebase()?.is_some() {
            return Err(GroveError::RebaseInProgress);
        }
        let name = RefName::branch(branch)?;
        let tip = self
            .refs
            .resolve(&name)?
            .ok_or_else(|| RebaseError::BranchNotFound { branch: name.clone() })?;
        let graph = self.graph();
        let commits = graph.topo_order(&graph.range(&[tip], &[onto])?)?;
        info!(%name, onto = %onto.short(), commits = commits.len(), "rebase starting");
        Ok(self.sequencer()?.start(&name, commits, onto)?)
    }

    /// The paused rebase persisted on disk, if any.
    ///
    /// # Errors
    /// [`RebaseError::Json`] (wrapped) for a malformed state file.
    pub fn load_rebase(&self) -> Result<Option<RebaseState>, GroveError> {
        let Some(path) = self.rebase_state_path() else {
            return Ok(None);
        };
        match RebaseState::read(&path) {
            Ok(state) => Ok(Some(state)),
            Err(RebaseError::NoRebaseInProgress) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resume a paused rebase with resolutions for every conflicting path.
    ///
    /// # Errors
    /// Sequencer failures, e.g. when not paused or a path is unresolved.
    pub fn rebase_continue(
        &self,
        state: &mut RebaseState,
        resolutions: &BTreeMap<String, Resolution>,
    ) -> Result<(), GroveError> {
        Ok(self.sequencer()?.continue_with(state, resolutions)?)
    }

    /// Drop the commit a paused rebase stopped on and resume.
    ///
    /// # Errors
    /// Sequencer failures.
    pub fn rebase_skip(&self, state: &mut RebaseState) -> Result<(), GroveError> {
        Ok(self.sequencer()?.skip(state)?)
    }

    /// Abort a rebase, leaving the branch at its original commit.
    ///
    /// # Errors
    /// Sequencer failures.
    pub fn rebase_abort(&self, state: &mut RebaseState) -> Result<(), GroveError> {
        Ok(self.sequencer()?.abort(state)?)
    }

    // -----------------------------------------------------------------------
    // Bisect
    // -----------------------------------------------------------------------

    /// Start bisecting between `goods` and `bad`.
    ///
    /// # Errors
    /// [`crate::bisect::BisectError`] (wrapped) for an empty range.
    pub fn bisect(&self, goods: &[ObjectId], bad: ObjectId) -> Result<BisectSession, GroveError> {
        Ok(BisectSession::new(&self.graph(), goods, bad)?)
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(files: &[(&str, &str)]) -> Snapshot {
        files
            .iter()
            .map(|(p, c)| ((*p).to_owned(), SnapshotFile::regular(c.as_bytes())))
            .collect()
    }

    #[test]
    fn in_memory_head_is_unborn_main() {
        let repo = Repository::in_memory(GroveConfig::default()).unwrap();
        assert_eq!(repo.head().unwrap(), None);
        assert_eq!(
            repo.current_branch().unwrap(),
            Some(RefName::branch("main").unwrap())
        );
        assert!(repo.log().unwrap().is_empty());
    }

    #[test]
    fn snapshot_roundtrip_keeps_modes() {
        let repo = Repository::in_memory(GroveConfig::default()).unwrap();
        let mut s = snap(&[("a/b.txt", "hi\n")]);
        s.insert("run.sh".to_owned(), SnapshotFile::executable("#!/bin/sh\n"));
        s.insert("link".to_owned(), SnapshotFile::symlink("a/b.txt"));
        let tree = repo.write_snapshot(&s).unwrap();
        assert_eq!(repo.read_snapshot(tree).unwrap(), s);
    }

    #[test]
    fn snapshot_rejects_bad_paths() {
        let repo = Repository::in_memory(GroveConfig::default()).unwrap();
        assert!(matches!(
            repo.write_snapshot(&snap(&[("a/../b", "x")])),
            Err(GroveError::Tree(TreeError::InvalidPath { .. }))
        ));
        assert!(matches!(
            repo.write_snapshot(&snap(&[("a", "x"), ("a/b", "y")])),
            Err(GroveError::Tree(TreeError::FileDirectoryClash { .. }))
        ));
    }

    #[test]
    fn commits_advance_branch_with_reflog() {
        let repo = Repository::in_memory(GroveConfig::default()).unwrap();
        let c1 = repo.commit_snapshot(&snap(&[("f", "1\n")]), "one").unwrap();
        let c2 = repo.commit_snapshot(&snap(&[("f", "2\n")]), "two\n\nbody").unwrap();
        assert_eq!(repo.head().unwrap(), Some(c2));
        assert_eq!(repo.objects().read_commit(c2).unwrap().parents, vec![c1]);
        assert_eq!(repo.log().unwrap(), vec![c2, c1]);

        let log = repo.reflog(&RefName::branch("main").unwrap()).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].old.is_zero());
        assert_eq!(log[0].reason, "commit (initial): one");
        assert_eq!(log[1].reason, "commit: two");
        assert_eq!(log[1].actor, "grove <grove@localhost>");
    }

    #[test]
    fn checkout_moves_head() {
        let repo = Repository::in_memory(GroveConfig::default()).unwrap();
        let c1 = repo.commit_snapshot(&snap(&[("f", "1\n")]), "one").unwrap();
        repo.create_branch("topic", c1).unwrap();
        repo.commit_snapshot(&snap(&[("f", "2\n")]), "two").unwrap();

        let s = repo.checkout("topic").unwrap();
        assert_eq!(s, snap(&[("f", "1\n")]));
        assert_eq!(repo.head().unwrap(), Some(c1));
        assert_eq!(
            repo.current_branch().unwrap(),
            Some(RefName::branch("topic").unwrap())
        );
        assert!(matches!(
            repo.checkout("missing"),
            Err(GroveError::Ref(RefError::NotFound { .. }))
        ));
    }

    #[test]
    fn detached_commit_moves_head_only() {
        let repo = Repository::in_memory(GroveConfig::default()).unwrap();
        let c1 = repo.commit_snapshot(&snap(&[("f", "1\n")]), "one").unwrap();
        repo.checkout_detached(c1).unwrap();
        assert_eq!(repo.current_branch().unwrap(), None);
        let c2 = repo.commit_snapshot(&snap(&[("f", "2\n")]), "two").unwrap();
        assert_eq!(repo.head().unwrap(), Some(c2));
        assert_eq!(repo.resolve_revision("main").unwrap(), c1);
    }

    #[test]
    fn branch_lifecycle() {
        let repo = Repository::in_memory(GroveConfig::default()).unwrap();
        let c1 = repo.commit_snapshot(&snap(&[("f", "1\n")]), "one").unwrap();
        repo.create_branch("topic", c1).unwrap();
        assert!(repo.create_branch("topic", c1).is_err());
        assert_eq!(repo.branches().unwrap().len(), 2);
        assert!(matches!(
            repo.delete_branch("main"),
            Err(GroveError::CurrentBranch { .. })
        ));
        repo.delete_branch("topic").unwrap();
        assert_eq!(repo.branches().unwrap().len(), 1);
    }

    #[test]
    fn tags_resolve_to_commits() {
        let repo = Repository::in_memory(GroveConfig::default()).unwrap();
        let c1 = repo.commit_snapshot(&snap(&[("f", "1\n")]), "one").unwrap();
        repo.create_tag("light", c1).unwrap();
        let tag_id = repo.create_annotated_tag("v1.0", c1, "release\n").unwrap();
        assert_ne!(tag_id, c1);
        assert_eq!(repo.resolve_revision("light").unwrap(), c1);
        assert_eq!(repo.resolve_revision("v1.0").unwrap(), c1);
        assert_eq!(repo.resolve_revision(&tag_id.to_string()).unwrap(), c1);
        assert_eq!(repo.tags().unwrap().len(), 2);
        assert!(matches!(
            repo.resolve_revision("nope"),
            Err(GroveError::UnknownRevision { .. })
        ));
    }

    #[test]
    fn reset_returns_previous() {
        let repo = Repository::in_memory(GroveConfig::default()).unwrap();
        let c1 = repo.commit_snapshot(&snap(&[("f", "1\n")]), "one").unwrap();
        let c2 = repo.commit_snapshot(&snap(&[("f", "2\n")]), "two").unwrap();
        assert_eq!(repo.reset(c1).unwrap(), Some(c2));
        assert_eq!(repo.head().unwrap(), Some(c1));
    }

    #[test]
    fn merge_into_unborn_head_fails() {
        let repo = Repository::in_memory(GroveConfig::default()).unwrap();
        let c1 = repo.commit_snapshot(&snap(&[("f", "1\n")]), "one").unwrap();
        repo.refs()
            .update(
                &RefName::head(),
                Some(&RefValue::Symbolic(RefName::branch("main").unwrap())),
                &RefValue::Symbolic(RefName::branch("empty").unwrap()),
                &RefLogMessage::new("t", 0, "switch"),
            )
            .unwrap();
        assert!(matches!(
            repo.merge_into_head(c1, "m"),
            Err(GroveError::Unborn { .. })
        ));
    }

    #[test]
    fn prune_uses_configured_policy() {
        let config = GroveConfig::parse("[reflog]\nmax_entries = 1\n").unwrap();
        let repo = Repository::in_memory(config).unwrap();
        for i in 0..3 {
            repo.commit_snapshot(&snap(&[("f", &i.to_string())]), "c").unwrap();
        }
        // main: 3 entries → 1; HEAD: 1 entry.
        assert_eq!(repo.prune_reflogs(unix_now()).unwrap(), 2);
        assert_eq!(repo.reflog(&RefName::branch("main").unwrap()).unwrap().len(), 1);
    }

    #[test]
    fn prune_reaches_reflogs_of_deleted_branches() {
        let config = GroveConfig::parse("[reflog]\nmax_entries = 1\n").unwrap();
        let repo = Repository::in_memory(config).unwrap();
        let c = repo.commit_snapshot(&snap(&[("f", "x")]), "c").unwrap();
        repo.create_branch("gone", c).unwrap();
        repo.delete_branch("gone").unwrap();
        let gone = RefName::branch("gone").unwrap();
        assert_eq!(repo.reflog(&gone).unwrap().len(), 2);

        // gone: 2 entries → 1; main and HEAD already hold one each.
        assert_eq!(repo.prune_reflogs(unix_now()).unwrap(), 1);
        let log = repo.reflog(&gone).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].new.is_zero());
    }
}
