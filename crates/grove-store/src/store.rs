//! The [`ObjectStore`] trait: the boundary between grove and object storage.
//!
//! Implementations only need the three raw primitives (`put_raw`, `get_raw`,
//! `contains`). The typed helpers (`write`, `read`, `read_commit`, ...) are
//! provided methods built on top of them and the canonical codec.
//!
//! # Object safety
//!
//! No generic methods, so callers may hold `&dyn ObjectStore`.

use crate::codec;
use crate::error::StoreError;
use crate::object::{Commit, Object, Tag, Tree};
use crate::types::{ObjectId, ObjectKind};

/// A stored object before decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawObject {
    /// The object kind from the frame header.
    pub kind: ObjectKind,
    /// The body bytes.
    pub body: Vec<u8>,
}

/// Content-addressed, append-only object storage.
///
/// There is no update or delete: mutation is modelled by writing new objects.
pub trait ObjectStore: Send + Sync {
    /// Store a body of the given kind and return its id.
    ///
    /// Idempotent: identical input always yields the same id and is stored at
    /// most once.
    fn put_raw(&self, kind: ObjectKind, body: &[u8]) -> Result<ObjectId, StoreError>;

    /// Fetch a stored object.
    ///
    /// Returns [`StoreError::NotFound`] if absent and [`StoreError::Corrupt`]
    /// if the stored bytes do not hash to `id`.
    fn get_raw(&self, id: ObjectId) -> Result<RawObject, StoreError>;

    /// Whether an object with this id is stored.
    fn contains(&self, id: ObjectId) -> Result<bool, StoreError>;

    // -----------------------------------------------------------------------
    // Typed helpers
    // -----------------------------------------------------------------------

    /// Encode and store an object.
    fn write(&self, object: &Object) -> Result<ObjectId, StoreError> {
        self.put_raw(object.kind(), &codec::encode_body(object))
    }

    /// Fetch and decode an object of any kind.
    fn read(&self, id: ObjectId) -> Result<Object, StoreError> {
        let raw = self.get_raw(id)?;
        codec::decode_body(raw.kind, &raw.body).map_err(|e| e.with_id(id))
    }

    /// Store a blob.
    fn write_blob(&self, data: &[u8]) -> Result<ObjectId, StoreError> {
        self.put_raw(ObjectKind::Blob, data)
    }

    /// Store a tree.
    fn write_tree(&self, tree: &Tree) -> Result<ObjectId, StoreError> {
        self.write(&Object::Tree(tree.clone()))
    }

    /// Store a commit.
    fn write_commit(&self, commit: &Commit) -> Result<ObjectId, StoreError> {
        self.write(&Object::Commit(commit.clone()))
    }

    /// Store an annotated tag.
    fn write_tag(&self, tag: &Tag) -> Result<ObjectId, StoreError> {
        self.write(&Object::Tag(tag.clone()))
    }

    /// Fetch a blob's content.
    fn read_blob(&self, id: ObjectId) -> Result<Vec<u8>, StoreError> {
        let raw = self.get_raw(id)?;
        expect_kind(id, ObjectKind::Blob, raw.kind)?;
        Ok(raw.body)
    }

    /// Fetch and decode a tree.
    fn read_tree(&self, id: ObjectId) -> Result<Tree, StoreError> {
        match self.read(id)? {
            Object::Tree(tree) => Ok(tree),
            other => Err(mismatch(id, ObjectKind::Tree, other.kind())),
        }
    }

    /// Fetch and decode a commit.
    fn read_commit(&self, id: ObjectId) -> Result<Commit, StoreError> {
        match self.read(id)? {
            Object::Commit(commit) => Ok(commit),
            other => Err(mismatch(id, ObjectKind::Commit, other.kind())),
        }
    }

    /// Fetch and decode an annotated tag.
    fn read_tag(&self, id: ObjectId) -> Result<Tag, StoreError> {
        match self.read(id)? {
            Object::Tag(tag) => Ok(tag),
            other => Err(mismatch(id, ObjectKind::Tag, other.kind())),
        }
    }

    /// Follow annotated tags until a non-tag object is reached.
    fn peel(&self, id: ObjectId) -> Result<(ObjectId, ObjectKind), StoreError> {
        let mut current = id;
        loop {
            let raw = self.get_raw(current)?;
            if raw.kind != ObjectKind::Tag {
                return Ok((current, raw.kind));
            }
            match codec::decode_body(raw.kind, &raw.body).map_err(|e| e.with_id(current))? {
                Object::Tag(tag) => current = tag.target,
                other => return Err(mismatch(current, ObjectKind::Tag, other.kind())),
            }
        }
    }
}

fn expect_kind(id: ObjectId, expected: ObjectKind, actual: ObjectKind) -> Result<(), StoreError> {
    if expected == actual {
        Ok(())
    } else {
        Err(mismatch(id, expected, actual))
    }
}

const fn mismatch(id: ObjectId, expected: ObjectKind, actual: ObjectKind) -> StoreError {
    StoreError::KindMismatch {
        id,
        expected,
        actual,
    }
}
