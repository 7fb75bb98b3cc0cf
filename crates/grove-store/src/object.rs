//! Decoded object variants.
//!
//! [`Object`] is a sum type over the four kinds; everything that interprets
//! object content matches on it exhaustively. Constructors validate the
//! inputs the canonical encoding cannot represent (tree entry names,
//! signature fields), so any value of these types encodes without error.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{EntryMode, ObjectId, ObjectKind};

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// Author, committer, or tagger identity plus a point in time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// Display name.
    pub name: String,
    /// Email address (without angle brackets).
    pub email: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Timezone offset from UTC in minutes.
    pub tz_offset_minutes: i32,
}

impl Signature {
    /// Create a validated signature.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidSignature`] if the name or email contains
    /// `<`, `>`, or a newline, or if the email is empty.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        timestamp: i64,
        tz_offset_minutes: i32,
    ) -> Result<Self, StoreError> {
        let name = name.into();
        let email = email.into();
        validate_signature_field(&name)?;
        validate_signature_field(&email)?;
        if email.is_empty() {
            return Err(StoreError::InvalidSignature {
                value: email,
                reason: "email must not be empty".to_owned(),
            });
        }
        if tz_offset_minutes.abs() >= 100 * 60 {
            return Err(StoreError::InvalidSignature {
                value: tz_offset_minutes.to_string(),
                reason: "timezone offset out of range".to_owned(),
            });
        }
        Ok(Self {
            name,
            email,
            timestamp,
            tz_offset_minutes,
        })
    }

    /// The same identity at a different time.
    #[must_use]
    pub fn at(&self, timestamp: i64) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }

    /// `Name <email>`, as recorded in reflogs.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

fn validate_signature_field(value: &str) -> Result<(), StoreError> {
    if let Some(bad) = value.chars().find(|c| matches!(c, '<' | '>' | '\n' | '\0')) {
        return Err(StoreError::InvalidSignature {
            value: value.to_owned(),
            reason: format!("contains forbidden character {bad:?}"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// A single entry in a tree object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Basename of the entry (never a path).
    pub name: String,
    /// Entry mode; determines the kind of the child object.
    pub mode: EntryMode,
    /// Id of the child blob or tree.
    pub id: ObjectId,
}

impl TreeEntry {
    /// Create a validated tree entry.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidEntryName`] for empty names, `.`/`..`,
    /// and names containing `/` or NUL.
    pub fn new(name: impl Into<String>, mode: EntryMode, id: ObjectId) -> Result<Self, StoreError> {
        let name = name.into();
        validate_entry_name(&name)?;
        Ok(Self { name, mode, id })
    }
}

/// Check a tree entry name.
///
/// # Errors
/// Returns [`StoreError::InvalidEntryName`] describing the first violation.
pub fn validate_entry_name(name: &str) -> Result<(), StoreError> {
    let reason = if name.is_empty() {
        Some("name must not be empty")
    } else if name == "." || name == ".." {
        Some("name must not be '.' or '..'")
    } else if name.contains('/') {
        Some("name must not contain '/'")
    } else if name.contains('\0') {
        Some("name must not contain NUL")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StoreError::InvalidEntryName {
            name: name.to_owned(),
            reason: reason.to_owned(),
        }),
        None => Ok(()),
    }
}

/// A directory listing, sorted by entry name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// The empty tree.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build a tree from entries in any order.
    ///
    /// Entries are sorted bytewise by name.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidEntryName`] if an entry name is invalid
    /// or appears twice.
    pub fn from_entries(mut entries: Vec<TreeEntry>) -> Result<Self, StoreError> {
        for entry in &entries {
            validate_entry_name(&entry.name)?;
        }
        entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        if let Some(pair) = entries.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(StoreError::InvalidEntryName {
                name: pair[0].name.clone(),
                reason: "duplicate entry".to_owned(),
            });
        }
        Ok(Self { entries })
    }

    /// Entries in canonical order.
    #[must_use]
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// Look up an entry by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_bytes().cmp(name.as_bytes()))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the tree has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Commit / Tag
// ---------------------------------------------------------------------------

/// A commit: a tree snapshot plus its place in history.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commit {
    /// Root tree of the snapshot.
    pub tree: ObjectId,
    /// Parent commits in order (empty for a root commit).
    pub parents: Vec<ObjectId>,
    /// Who wrote the change.
    pub author: Signature,
    /// Who recorded the commit.
    pub committer: Signature,
    /// Free-form message.
    pub message: String,
}

impl Commit {
    /// `true` for commits with two or more parents.
    #[must_use]
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// First line of the message.
    #[must_use]
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// An annotated tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// The tagged object.
    pub target: ObjectId,
    /// Kind of the tagged object.
    pub target_kind: ObjectKind,
    /// Tag name (e.g. `v1.0`).
    pub name: String,
    /// Who created the tag.
    pub tagger: Signature,
    /// Free-form message.
    pub message: String,
}

impl Tag {
    /// Create an annotated tag.
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidEntryName`] if the name is empty or
    /// contains whitespace.
    pub fn new(
        name: impl Into<String>,
        target: ObjectId,
        target_kind: ObjectKind,
        tagger: Signature,
        message: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let name = name.into();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(StoreError::InvalidEntryName {
                name,
                reason: "tag name must be non-empty and contain no whitespace".to_owned(),
            });
        }
        Ok(Self {
            target,
            target_kind,
            name,
            tagger,
            message: message.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

/// A decoded object of any kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
    /// File content.
    Blob(Vec<u8>),
    /// Directory listing.
    Tree(Tree),
    /// Commit.
    Commit(Commit),
    /// Annotated tag.
    Tag(Tag),
}

impl Object {
    /// The kind of this object.
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        match self {
            Self::Blob(_) => ObjectKind::Blob,
            Self::Tree(_) => ObjectKind::Tree,
            Self::Commit(_) => ObjectKind::Commit,
            Self::Tag(_) => ObjectKind::Tag,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
