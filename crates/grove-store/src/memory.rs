//! In-memory [`ObjectStore`] backed by a lock-protected map.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::codec;
use crate::error::StoreError;
use crate::store::{ObjectStore, RawObject};
use crate::types::{ObjectId, ObjectKind};

/// Object store that keeps framed objects in memory.
///
/// Same contract as [`FsObjectStore`](crate::FsObjectStore): idempotent puts,
/// `NotFound` for absent ids, and hash verification on every read.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<ObjectId, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct objects stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// `true` if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put_raw(&self, kind: ObjectKind, body: &[u8]) -> Result<ObjectId, StoreError> {
        let frame = codec::frame(kind, body);
        let id = codec::hash_frame(&frame);
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        objects.entry(id).or_insert(frame);
        Ok(id)
    }

    fn get_raw(&self, id: ObjectId) -> Result<RawObject, StoreError> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let frame = objects.get(&id).ok_or(StoreError::NotFound { id })?;
        let actual = codec::hash_frame(frame);
        if actual != id {
            return Err(StoreError::Corrupt { id, actual });
        }
        let (kind, body) = codec::unframe(frame).map_err(|e| e.with_id(id))?;
        Ok(RawObject {
            kind,
            body: body.to_vec(),
        })
    }

    fn contains(&self, id: ObjectId) -> Result<bool, StoreError> {
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id))
    }
}
