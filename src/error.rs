//! Crate-level error type.
//!
//! Each component has its own error enum; [`GroveError`] wraps them for the
//! [`Repository`](crate::repo::Repository) facade and adds the facade's own
//! failures.

use std::path::PathBuf;

use grove_store::StoreError;

use crate::bisect::BisectError;
use crate::config::ConfigError;
use crate::graph::GraphError;
use crate::merge::MergeError;
use crate::rebase::RebaseError;
use crate::refs::{RefError, RefName, RefNameError};
use crate::tree::TreeError;

/// Unified error for repository operations.
#[derive(Debug, thiserror::Error)]
pub enum GroveError {
    /// Object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reference store failure.
    #[error(transparent)]
    Ref(#[from] RefError),

    /// A branch or tag name failed validation.
    #[error(transparent)]
    RefName(#[from] RefNameError),

    /// Commit graph failure.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Snapshot or tree failure.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Merge engine failure.
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// Rebase sequencer failure.
    #[error(transparent)]
    Rebase(#[from] RebaseError),

    /// Bisect failure.
    #[error(transparent)]
    Bisect(#[from] BisectError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `init` on a directory that already holds a repository.
    #[error("repository already exists at {}", path.display())]
    AlreadyInitialized {
        /// Repository root.
        path: PathBuf,
    },

    /// `open` on a directory without a repository.
    #[error("no repository at {}", path.display())]
    NotARepository {
        /// The directory.
        path: PathBuf,
    },

    /// The reference exists but points at nothing yet (e.g. HEAD before the
    /// first commit).
    #[error("'{name}' has no commits yet")]
    Unborn {
        /// The reference.
        name: RefName,
    },

    /// A revision string matched no object or reference.
    #[error("unknown revision '{spec}'")]
    UnknownRevision {
        /// The revision as given.
        spec: String,
    },

    /// The branch `HEAD` is on cannot be deleted.
    #[error("cannot delete '{name}': HEAD is on it")]
    CurrentBranch {
        /// The branch.
        name: RefName,
    },

    /// A paused rebase must be continued or aborted first.
    #[error("a rebase is already in progress")]
    RebaseInProgress,

    /// A reference update kept losing races.
    #[error("gave up updating '{name}' after {attempts} attempts")]
    RetriesExhausted {
        /// The reference.
        name: RefName,
        /// Attempts made.
        attempts: usize,
    },

    /// Filesystem error outside the stores.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl GroveError {
    /// `true` for integrity failures that must halt the caller.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Store(e) => e.is_fatal(),
            Self::Graph(e) => e.is_fatal(),
            Self::Ref(e) => matches!(
                e,
                RefError::Corrupt { .. }
                    | RefError::SymbolicCycle { .. }
                    | RefError::ReflogCorrupt { .. }
            ),
            _ => false,
        }
    }

    /// `true` if re-reading and retrying may succeed: a reference moved or
    /// was locked, directly or while a rebase completed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Ref(e) | Self::Rebase(RebaseError::Ref(e)) if e.is_retryable())
    }
}
