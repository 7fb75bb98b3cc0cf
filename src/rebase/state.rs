//! Rebase state machine and persisted rebase-state file.
//!
//! The state is persisted as pretty JSON. Every write is atomic (write to a
//! temporary file in the same directory, fsync, rename) so a crash never
//! leaves a torn file and a paused rebase can be resumed after a restart.
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Running ⇄ Paused
//!           │         │
//!           ├→ Completed
//!           └→ Aborted ←┘
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use grove_store::ObjectId;

use super::RebaseError;
use crate::merge::TreeMerge;
use crate::refs::RefName;

// ---------------------------------------------------------------------------
// RebasePhase
// ---------------------------------------------------------------------------

/// The current phase of a rebase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebasePhase {
    /// Created, nothing replayed yet.
    Idle,
    /// Replaying commits.
    Running,
    /// Stopped on a conflict; see [`RebaseState::conflict`].
    Paused,
    /// Given up; the branch was left at its original commit.
    Aborted,
    /// Every commit replayed and the branch moved.
    Completed,
}

impl RebasePhase {
    /// `true` for `Completed` and `Aborted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// The phases reachable from this one.
    #[must_use]
    pub const fn valid_transitions(self) -> &'static [Self] {
        match self {
            Self::Idle => &[Self::Running, Self::Aborted],
            Self::Running => &[Self::Paused, Self::Completed, Self::Aborted],
            Self::Paused => &[Self::Running, Self::Aborted],
            Self::Completed | Self::Aborted => &[],
        }
    }

    /// Whether moving to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for RebasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Aborted => write!(f, "aborted"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// The commit a rebase stopped on and what conflicted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseConflict {
    /// The original commit being replayed.
    pub commit: ObjectId,
    /// Clean paths plus the conflicting ones.
    pub tree: TreeMerge,
}

// ---------------------------------------------------------------------------
// RebaseState
// ---------------------------------------------------------------------------

/// Everything needed to resume a rebase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseState {
    /// Current phase.
    pub phase: RebasePhase,
    /// The branch being rebased.
    pub branch: RefName,
    /// Where the branch pointed when the rebase started.
    pub orig_head: ObjectId,
    /// The new base.
    pub onto: ObjectId,
    /// Commits still to replay, next first.
    pub pending: Vec<ObjectId>,
    /// Commits replayed so far, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub done: Vec<ObjectId>,
    /// Commits dropped with `skip`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<ObjectId>,
    /// Original commit → synthesized commit.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mapping: BTreeMap<ObjectId, ObjectId>,
    /// Tip of the replayed history so far.
    pub head: ObjectId,
    /// Set while `Paused`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<RebaseConflict>,
    /// Unix seconds when the rebase started.
    pub started_at: i64,
    /// Unix seconds of the last transition.
    pub updated_at: i64,
    /// Why the rebase was aborted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

impl RebaseState {
    /// A new rebase in the `Idle` phase.
    #[must_use]
    pub const fn new(
        branch: RefName,
        orig_head: ObjectId,
        onto: ObjectId,
        commits: Vec<ObjectId>,
        now: i64,
    ) -> Self {
        Self {
            phase: RebasePhase::Idle,
            branch,
            orig_head,
            onto,
            pending: commits,
            done: Vec::new(),
            skipped: Vec::new(),
            mapping: BTreeMap::new(),
            head: onto,
            conflict: None,
            started_at: now,
            updated_at: now,
            abort_reason: None,
        }
    }

    /// The commit to replay next.
    #[must_use]
    pub fn current(&self) -> Option<ObjectId> {
        self.pending.first().copied()
    }

    /// Move to `next`.
    ///
    /// # Errors
    /// [`RebaseError::InvalidTransition`] if the move is not allowed.
    pub fn advance(&mut self, next: RebasePhase, now: i64) -> Result<(), RebaseError> {
        if !self.phase.can_transition_to(next) {
            return Err(RebaseError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.updated_at = now;
        Ok(())
    }

    /// Enter `Aborted`, recording why.
    ///
    /// # Errors
    /// [`RebaseError::InvalidTransition`] if already terminal.
    pub fn abort(&mut self, reason: impl Into<String>, now: i64) -> Result<(), RebaseError> {
        self.advance(RebasePhase::Aborted, now)?;
        self.conflict = None;
        self.abort_reason = Some(reason.into());
        Ok(())
    }

    /// Record that `original` was replayed as `replayed`.
    pub(crate) fn record_replayed(&mut self, original: ObjectId, replayed: ObjectId) {
        self.pending.retain(|c| *c != original);
        self.done.push(original);
        self.mapping.insert(original, replayed);
        self.head = replayed;
    }

    /// Serialize to pretty JSON.
    ///
    /// # Errors
    /// [`RebaseError::Json`] on serialization failure.
    pub fn to_json(&self) -> Result<String, RebaseError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON.
    ///
    /// # Errors
    /// [`RebaseError::Json`] if the text is not a valid state.
    pub fn from_json(json: &str) -> Result<Self, RebaseError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the state file atomically with fsync.
    ///
    /// # Errors
    /// [`RebaseError::Io`] or [`RebaseError::Json`].
    pub fn write_atomic(&self, path: &Path) -> Result<(), RebaseError> {
        let json = self.to_json()?;
        let dir = path
            .parent()
            .ok_or_else(|| RebaseError::io(path, std::io::ErrorKind::InvalidInput.into()))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| RebaseError::io(dir, e))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| RebaseError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| RebaseError::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| RebaseError::io(path, e.error))?;
        Ok(())
    }

    /// Read a state file.
    ///
    /// # Errors
    /// [`RebaseError::NoRebaseInProgress`] if the file does not exist,
    /// [`RebaseError::Json`] if it is malformed.
    pub fn read(path: &Path) -> Result<Self, RebaseError> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RebaseError::NoRebaseInProgress);
            }
            Err(e) => return Err(RebaseError::io(path, e)),
        };
        Self::from_json(&json)
    }
}
