//! Value types shared by every grove crate.
//!
//! [`ObjectId`] is the identity of a stored object, [`ObjectKind`] tags the
//! four object variants, and [`EntryMode`] is the mode column of a tree entry.
//! None of these types know how objects are stored.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// ObjectId
// ---------------------------------------------------------------------------

/// A SHA-256 object identifier (32 bytes).
///
/// Stored as raw bytes for cheap comparison and `Copy` semantics.
/// Displays as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// Length of the raw digest in bytes.
    pub const LEN: usize = 32;

    /// Length of the hex form.
    pub const HEX_LEN: usize = 64;

    /// The zero id, used as the "absent" sentinel in reflog entries.
    pub const ZERO: Self = Self([0; 32]);

    /// Create an `ObjectId` from raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Return `true` if this is the zero id.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// First 12 hex characters, for log lines and messages.
    #[must_use]
    pub fn short(&self) -> String {
        let mut s = self.to_string();
        s.truncate(12);
        s
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short())
    }
}

impl FromStr for ObjectId {
    type Err = OidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::HEX_LEN {
            return Err(OidParseError {
                value: s.to_owned(),
                reason: format!("expected {} hex characters, got {}", Self::HEX_LEN, s.len()),
            });
        }
        let mut bytes = [0u8; 32];
        for (i, pair) in s.as_bytes().chunks(2).enumerate() {
            let digit = |b: u8| {
                hex_digit(b).ok_or_else(|| OidParseError {
                    value: s.to_owned(),
                    reason: format!("invalid hex digit '{}'", b as char),
                })
            };
            bytes[i] = (digit(pair[0])? << 4) | digit(pair[1])?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error from parsing a hex string into an [`ObjectId`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid object id {value:?}: {reason}")]
pub struct OidParseError {
    /// The raw value that failed.
    pub value: String,
    /// Why it failed.
    pub reason: String,
}

const fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// ObjectKind
// ---------------------------------------------------------------------------

/// The four object variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// Opaque file content.
    Blob,
    /// Directory listing.
    Tree,
    /// Snapshot of a tree plus history.
    Commit,
    /// Annotated tag.
    Tag,
}

impl ObjectKind {
    /// The keyword used in the canonical encoding header.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    /// Parse the header keyword.
    #[must_use]
    pub fn from_keyword(s: &[u8]) -> Option<Self> {
        match s {
            b"blob" => Some(Self::Blob),
            b"tree" => Some(Self::Tree),
            b"commit" => Some(Self::Commit),
            b"tag" => Some(Self::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EntryMode
// ---------------------------------------------------------------------------

/// The mode of a tree entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    /// Regular file (`100644`).
    #[default]
    Blob,
    /// Executable file (`100755`).
    BlobExecutable,
    /// Symbolic link (`120000`).
    Link,
    /// Subdirectory (`40000`).
    Tree,
}

impl EntryMode {
    /// Octal mode string used in the canonical tree encoding.
    #[must_use]
    pub const fn as_octal(self) -> &'static str {
        match self {
            Self::Blob => "100644",
            Self::BlobExecutable => "100755",
            Self::Link => "120000",
            Self::Tree => "40000",
        }
    }

    /// Parse an octal mode string.
    #[must_use]
    pub fn from_octal(s: &[u8]) -> Option<Self> {
        match s {
            b"100644" => Some(Self::Blob),
            b"100755" => Some(Self::BlobExecutable),
            b"120000" => Some(Self::Link),
            b"40000" => Some(Self::Tree),
            _ => None,
        }
    }

    /// The kind of object an entry with this mode points at.
    #[must_use]
    pub const fn object_kind(self) -> ObjectKind {
        match self {
            Self::Tree => ObjectKind::Tree,
            Self::Blob | Self::BlobExecutable | Self::Link => ObjectKind::Blob,
        }
    }

    /// `true` for directory entries.
    #[must_use]
    pub const fn is_tree(self) -> bool {
        matches!(self, Self::Tree)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
