//! Result, conflict and option types for the merge engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use grove_store::{EntryMode, ObjectId, ObjectStore, StoreError};

use super::text::{self, LineMerge};
use crate::graph::GraphWarning;
use crate::tree::{FileVersion, PathMap};

// ---------------------------------------------------------------------------
// MergeStrategy / MergeOptions
// ---------------------------------------------------------------------------

/// How conflicting paths are settled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Never prefer a side; conflicting paths are reported.
    #[default]
    ThreeWay,
    /// Conflicting paths take our version.
    Ours,
    /// Conflicting paths take their version.
    Theirs,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreeWay => write!(f, "three-way"),
            Self::Ours => write!(f, "ours"),
            Self::Theirs => write!(f, "theirs"),
        }
    }
}

/// Default number of leading bytes inspected for NUL when sniffing binary
/// content.
pub const DEFAULT_BINARY_SNIFF_LEN: usize = 8000;

/// Tunables for a merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeOptions {
    /// Conflict policy.
    pub strategy: MergeStrategy,
    /// Attempt line-level merges of text files changed on both sides.
    pub text_merge: bool,
    /// Bytes inspected by the binary check.
    pub binary_sniff_len: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::ThreeWay,
            text_merge: true,
            binary_sniff_len: DEFAULT_BINARY_SNIFF_LEN,
        }
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Why a path could not be merged automatically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Both sides changed overlapping lines of a text file.
    Content,
    /// Both sides changed a binary file (or a symlink) differently.
    Binary,
    /// One side modified the file, the other deleted it.
    ModifyDelete,
    /// Both sides added the path with different content.
    AddAdd,
    /// Both sides changed the file mode differently.
    Mode,
    /// One side has a file where the other needs a directory.
    FileDirectory,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Content => write!(f, "overlapping text edits"),
            Self::Binary => write!(f, "binary content changed on both sides"),
            Self::ModifyDelete => write!(f, "modify/delete"),
            Self::AddAdd => write!(f, "add/add with different content"),
            Self::Mode => write!(f, "mode changed differently"),
            Self::FileDirectory => write!(f, "file/directory clash"),
        }
    }
}

/// One conflicting path. `None` means the path is absent on that side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConflict {
    /// Path relative to the tree root.
    pub path: String,
    /// Version in the merge base.
    pub base: Option<FileVersion>,
    /// Our version.
    pub ours: Option<FileVersion>,
    /// Their version.
    pub theirs: Option<FileVersion>,
    /// Classification.
    pub reason: ConflictReason,
}

impl PathConflict {
    /// Render conventional conflict markers for a text conflict.
    ///
    /// Returns `None` unless both sides hold text content.
    ///
    /// # Errors
    /// [`StoreError`] if a blob cannot be read.
    pub fn render_markers(
        &self,
        store: &dyn ObjectStore,
        ours_label: &str,
        theirs_label: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let (Some(ours), Some(theirs)) = (self.ours, self.theirs) else {
            return Ok(None);
        };
        let base = match self.base {
            Some(v) => store.read_blob(v.id)?,
            None => Vec::new(),
        };
        let ours = store.read_blob(ours.id)?;
        let theirs = store.read_blob(theirs.id)?;
        let sniff = DEFAULT_BINARY_SNIFF_LEN;
        if [&base, &ours, &theirs]
            .iter()
            .any(|c| text::is_binary(c, sniff))
        {
            return Ok(None);
        }
        let merge: LineMerge = text::merge_lines(&base, &ours, &theirs);
        Ok(Some(merge.render(ours_label, theirs_label)))
    }
}

/// Outcome of merging three flattened trees.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMerge {
    /// Paths merged without conflict.
    pub merged: PathMap,
    /// Paths needing a resolution, sorted by path.
    pub conflicts: Vec<PathConflict>,
}

impl TreeMerge {
    /// `true` when nothing conflicts.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// The conflicting paths.
    pub fn conflict_paths(&self) -> impl Iterator<Item = &str> {
        self.conflicts.iter().map(|c| c.path.as_str())
    }
}

/// How the caller settled one conflicting path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Write this content. The mode is taken from ours, theirs, then base,
    /// falling back to a regular file.
    Content(Vec<u8>),
    /// Use an existing stored version.
    Version(FileVersion),
    /// The path is deleted.
    Delete,
}

/// The structured conflict state of a merge that needs resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSet {
    /// Our commit.
    pub ours: ObjectId,
    /// Their commit.
    pub theirs: ObjectId,
    /// The merge base used, if the histories are related.
    pub base: Option<ObjectId>,
    /// Clean paths plus the conflicts.
    pub tree: TreeMerge,
    /// Non-fatal conditions met while merging.
    pub warnings: Vec<GraphWarning>,
}

impl ConflictSet {
    /// The conflicting paths.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.tree.conflict_paths().collect()
    }

    /// Look up one conflict by path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&PathConflict> {
        self.tree.conflicts.iter().find(|c| c.path == path)
    }
}

// ---------------------------------------------------------------------------
// MergeResult
// ---------------------------------------------------------------------------

/// Outcome of [`super::Merger::merge`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeResult {
    /// `theirs` is already contained in `ours`; nothing to do.
    AlreadyUpToDate(ObjectId),
    /// `ours` is an ancestor of `theirs`; the ref can simply move.
    FastForward(ObjectId),
    /// A merge commit was created.
    Merged {
        /// The new commit (parents: ours, theirs).
        commit: ObjectId,
        /// Its tree.
        tree: ObjectId,
        /// Non-fatal conditions met while merging.
        warnings: Vec<GraphWarning>,
    },
    /// Some paths need resolution; no commit was created.
    Conflicts(Box<ConflictSet>),
}

impl MergeResult {
    /// The commit the target ref should point at, unless conflicted.
    #[must_use]
    pub const fn target(&self) -> Option<ObjectId> {
        match self {
            Self::AlreadyUpToDate(id) | Self::FastForward(id) => Some(*id),
            Self::Merged { commit, .. } => Some(*commit),
            Self::Conflicts(_) => None,
        }
    }
}

/// Pick the mode for resolved content.
pub(crate) fn resolution_mode(conflict: &PathConflict) -> EntryMode {
    conflict
        .ours
        .or(conflict.theirs)
        .or(conflict.base)
        .map_or(EntryMode::Blob, |v| v.mode)
}

/// Apply one resolution per conflicting path on top of the clean paths.
///
/// # Errors
/// [`super::MergeError::Unresolved`] if a conflicting path has no
/// resolution, [`super::MergeError::UnknownPath`] if a resolution names a
/// path that is not conflicting, or a store error.
pub fn apply_resolutions(
    store: &dyn ObjectStore,
    tree: &TreeMerge,
    resolutions: &BTreeMap<String, Resolution>,
) -> Result<PathMap, super::MergeError> {
    if let Some(path) = resolutions
        .keys()
        .find(|p| !tree.conflicts.iter().any(|c| &c.path == *p))
    {
        return Err(super::MergeError::UnknownPath { path: path.clone() });
    }
    let missing: Vec<String> = tree
        .conflicts
        .iter()
        .filter(|c| !resolutions.contains_key(&c.path))
        .map(|c| c.path.clone())
        .collect();
    if !missing.is_empty() {
        return Err(super::MergeError::Unresolved { paths: missing });
    }

    let mut paths = tree.merged.clone();
    for conflict in &tree.conflicts {
        match &resolutions[&conflict.path] {
            Resolution::Content(data) => {
                let id = store.write_blob(data)?;
                paths.insert(
                    conflict.path.clone(),
                    FileVersion {
                        id,
                        mode: resolution_mode(conflict),
                    },
                );
            }
            Resolution::Version(version) => {
                paths.insert(conflict.path.clone(), *version);
            }
            Resolution::Delete => {
                paths.remove(&conflict.path);
            }
        }
    }
    Ok(paths)
}
