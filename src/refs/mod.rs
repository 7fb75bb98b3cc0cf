//! Reference store: mutable named pointers into the object graph.
//!
//! A reference maps a [`RefName`] to either a commit id ([`RefValue::Direct`])
//! or another reference name ([`RefValue::Symbolic`]). Every mutation is a
//! compare-and-swap against the caller's expected value and appends one
//! [`ReflogEntry`] to that reference's log.
//!
//! # Concurrency
//!
//! Updates are non-blocking. When another actor holds the reference or has
//! already moved it, the update fails with [`RefError::Locked`] or
//! [`RefError::Conflict`]; the caller should re-read and retry
//! ([`RefError::is_retryable`]). Independent names never contend.

mod fs;
mod memory;
mod name;
pub mod reflog;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use grove_store::ObjectId;

pub use fs::FsRefStore;
pub use memory::MemoryRefStore;
pub use name::{HEAD, HEADS_PREFIX, RefName, RefNameError, TAGS_PREFIX};
pub use reflog::{RefLogMessage, ReflogEntry, RetentionPolicy};

/// Default limit on the length of a symbolic-ref chain.
pub const DEFAULT_MAX_SYMBOLIC_DEPTH: usize = 5;

// ---------------------------------------------------------------------------
// RefValue
// ---------------------------------------------------------------------------

/// The value a reference holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefValue {
    /// Points at an object (normally a commit).
    Direct(ObjectId),
    /// Points at another reference.
    Symbolic(RefName),
}

impl RefValue {
    /// The object id, if direct.
    #[must_use]
    pub const fn as_direct(&self) -> Option<ObjectId> {
        match self {
            Self::Direct(id) => Some(*id),
            Self::Symbolic(_) => None,
        }
    }

    /// The target name, if symbolic.
    #[must_use]
    pub const fn as_symbolic(&self) -> Option<&RefName> {
        match self {
            Self::Direct(_) => None,
            Self::Symbolic(name) => Some(name),
        }
    }

    /// On-disk text form: `<hex>` or `ref: <name>` (no trailing newline).
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Direct(id) => id.to_string(),
            Self::Symbolic(name) => format!("ref: {name}"),
        }
    }

    /// Parse the on-disk text form. Surrounding whitespace is ignored.
    #[must_use]
    pub fn parse_text(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(target) = text.strip_prefix("ref: ") {
            return RefName::new(target.trim()).ok().map(Self::Symbolic);
        }
        if text.len() != ObjectId::HEX_LEN || text.bytes().any(|b| b.is_ascii_uppercase()) {
            return None;
        }
        text.parse().ok().map(Self::Direct)
    }
}

impl fmt::Display for RefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<ObjectId> for RefValue {
    fn from(id: ObjectId) -> Self {
        Self::Direct(id)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from reference operations.
#[derive(Debug, thiserror::Error)]
pub enum RefError {
    /// The name failed validation.
    #[error(transparent)]
    InvalidName(#[from] RefNameError),

    /// CAS lost: the reference's current value differs from the expected one.
    #[error(
        "ref '{name}' changed concurrently: expected {}, found {}",
        describe(expected.as_ref()),
        describe(actual.as_ref())
    )]
    Conflict {
        /// The reference.
        name: RefName,
        /// What the caller expected (`None` = absent).
        expected: Option<RefValue>,
        /// What was actually there (`None` = absent).
        actual: Option<RefValue>,
    },

    /// Another actor holds the reference's lock.
    #[error("ref '{name}' is locked by another update")]
    Locked {
        /// The reference.
        name: RefName,
    },

    /// A symbolic chain loops or exceeds the configured depth.
    #[error("symbolic ref cycle: {}", render_chain(chain))]
    SymbolicCycle {
        /// The names visited, in order.
        chain: Vec<RefName>,
    },

    /// The reference (or a symbolic target) does not exist.
    #[error("ref '{name}' not found")]
    NotFound {
        /// The missing reference.
        name: RefName,
    },

    /// The name collides with an existing reference used as a directory, or
    /// vice versa.
    #[error("ref '{name}' conflicts with existing ref '{existing}'")]
    DirectoryConflict {
        /// The name being created.
        name: RefName,
        /// The existing reference it collides with.
        existing: RefName,
    },

    /// A reference file holds something that is neither an id nor a
    /// symbolic target.
    #[error("ref '{name}' is corrupt: {content:?}")]
    Corrupt {
        /// The reference.
        name: RefName,
        /// The unparsable content.
        content: String,
    },

    /// A reflog line could not be parsed.
    #[error("reflog for '{name}' is corrupt at line {line}: {reason}")]
    ReflogCorrupt {
        /// The reference.
        name: RefName,
        /// 1-based line number.
        line: usize,
        /// Parser message.
        reason: String,
    },

    /// Filesystem error.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl RefError {
    /// `true` for errors a caller may resolve by re-reading and retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Locked { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn describe(value: Option<&RefValue>) -> String {
    value.map_or_else(|| "<absent>".to_owned(), RefValue::to_text)
}

fn render_chain(chain: &[RefName]) -> String {
    chain
        .iter()
        .map(RefName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

// ---------------------------------------------------------------------------
// RefStore trait
// ---------------------------------------------------------------------------

/// Mutable named pointers with compare-and-swap updates and per-name reflogs.
///
/// Object-safe, so a repository can hold a `Box<dyn RefStore>`.
pub trait RefStore: Send + Sync {
    /// Read a reference without following symbolic targets.
    fn read(&self, name: &RefName) -> Result<Option<RefValue>, RefError>;

    /// Compare-and-swap `name` from `expected` to `new`.
    ///
    /// `expected == None` asserts that `name` does not exist yet. A mismatch
    /// is always [`RefError::Conflict`]; the stored value is left untouched.
    fn update(
        &self,
        name: &RefName,
        expected: Option<&RefValue>,
        new: &RefValue,
        message: &RefLogMessage,
    ) -> Result<(), RefError>;

    /// Remove `name` if it still holds `expected`. The reflog is kept.
    fn delete(
        &self,
        name: &RefName,
        expected: &RefValue,
        message: &RefLogMessage,
    ) -> Result<(), RefError>;

    /// All references whose name starts with `prefix`, sorted by name.
    fn list(&self, prefix: &str) -> Result<Vec<(RefName, RefValue)>, RefError>;

    /// The reflog for `name`, oldest first. Empty if there is none.
    fn reflog(&self, name: &RefName) -> Result<Vec<ReflogEntry>, RefError>;

    /// Every name that has a reflog, sorted. Includes deleted references.
    fn reflog_names(&self) -> Result<Vec<RefName>, RefError>;

    /// Apply a retention policy to `name`'s reflog. Returns entries dropped.
    fn prune_reflog(
        &self,
        name: &RefName,
        policy: &RetentionPolicy,
        now: i64,
    ) -> Result<usize, RefError>;

    /// Longest symbolic chain [`RefStore::resolve`] follows.
    fn max_symbolic_depth(&self) -> usize {
        DEFAULT_MAX_SYMBOLIC_DEPTH
    }

    /// Follow symbolic references to an object id.
    ///
    /// `Ok(None)` if the chain ends at a reference that does not exist
    /// (e.g. `HEAD` on an unborn branch).
    fn resolve(&self, name: &RefName) -> Result<Option<ObjectId>, RefError> {
        let (_, value) = follow(|n| self.read(n), name, self.max_symbolic_depth())?;
        Ok(value.and_then(|v| v.as_direct()))
    }

    /// The last name in `name`'s symbolic chain (the branch `HEAD` is on).
    ///
    /// The returned name may not exist yet.
    fn resolve_target(&self, name: &RefName) -> Result<RefName, RefError> {
        let (target, _) = follow(|n| self.read(n), name, self.max_symbolic_depth())?;
        Ok(target)
    }
}

/// Walk a symbolic chain from `start` using `lookup`.
///
/// Returns the terminal name and its value (`None` if absent).
pub(crate) fn follow<F>(
    mut lookup: F,
    start: &RefName,
    max_depth: usize,
) -> Result<(RefName, Option<RefValue>), RefError>
where
    F: FnMut(&RefName) -> Result<Option<RefValue>, RefError>,
{
    let mut chain = vec![start.clone()];
    let mut current = start.clone();
    loop {
        match lookup(&current)? {
            Some(RefValue::Symbolic(next)) => {
                let looped = chain.contains(&next);
                chain.push(next.clone());
                if looped || chain.len() > max_depth + 1 {
                    return Err(RefError::SymbolicCycle { chain });
                }
                current = next;
            }
            other => return Ok((current, other)),
        }
    }
}

/// Resolved id for reflog purposes; unresolvable chains log as absent.
pub(crate) fn reflog_id<F>(lookup: F, value: Option<&RefValue>, max_depth: usize) -> ObjectId
where
    F: FnMut(&RefName) -> Result<Option<RefValue>, RefError>,
{
    match value {
        None => ObjectId::ZERO,
        Some(RefValue::Direct(id)) => *id,
        Some(RefValue::Symbolic(target)) => follow(lookup, target, max_depth)
            .ok()
            .and_then(|(_, v)| v.and_then(|v| v.as_direct()))
            .unwrap_or(ObjectId::ZERO),
    }
}
