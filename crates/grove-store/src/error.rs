//! Error types for object storage.
//!
//! [`StoreError`] is returned by every [`ObjectStore`](crate::ObjectStore)
//! method and by the canonical codec. Variants are matchable so callers can
//! tell a missing object (a caller bug) from a corrupted one (fatal).

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ObjectId, ObjectKind};

/// Errors returned by object encoding, decoding, and storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object with this id exists in the store.
    #[error("object {id} not found")]
    NotFound {
        /// The id that was dereferenced.
        id: ObjectId,
    },

    /// The stored bytes do not hash to the id they are filed under.
    ///
    /// Always fatal: the store must not hand out these bytes.
    #[error("object {id} is corrupt: stored content hashes to {actual}")]
    Corrupt {
        /// The id the object was requested by.
        id: ObjectId,
        /// The digest of the bytes actually on disk.
        actual: ObjectId,
    },

    /// The canonical encoding could not be decoded.
    #[error("malformed {kind} object{}: {reason}", id.as_ref().map(|id| format!(" {id}")).unwrap_or_default())]
    Malformed {
        /// The object id, when known.
        id: Option<ObjectId>,
        /// The kind being decoded.
        kind: ObjectKind,
        /// What was wrong.
        reason: String,
    },

    /// The object exists but is not of the requested kind.
    #[error("object {id} is a {actual}, expected a {expected}")]
    KindMismatch {
        /// The object id.
        id: ObjectId,
        /// The kind the caller asked for.
        expected: ObjectKind,
        /// The kind actually stored.
        actual: ObjectKind,
    },

    /// A tree entry name failed validation.
    #[error("invalid tree entry name {name:?}: {reason}")]
    InvalidEntryName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A signature field contains characters the encoding cannot carry.
    #[error("invalid signature field {value:?}: {reason}")]
    InvalidSignature {
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Filesystem failure at a known path.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
}

impl StoreError {
    /// Returns `true` for errors that indicate a damaged store.
    ///
    /// Callers must stop the current operation rather than continue with
    /// partial data.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Corrupt { .. } | Self::Malformed { id: Some(_), .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(kind: ObjectKind, reason: impl Into<String>) -> Self {
        Self::Malformed {
            id: None,
            kind,
            reason: reason.into(),
        }
    }

    /// Attach an object id to a `Malformed` error produced by the codec.
    #[must_use]
    pub fn with_id(self, object: ObjectId) -> Self {
        match self {
            Self::Malformed { kind, reason, .. } => Self::Malformed {
                id: Some(object),
                kind,
                reason,
            },
            other => other,
        }
    }
}
