//! Filesystem-backed [`ObjectStore`].
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── 3f/
//! │   └── 9a…   ← framed object, filename is the remaining 62 hex characters
//! └── …
//! ```
//!
//! # Concurrency
//!
//! Writes need no locking. Each object is written to a temporary file in its
//! fan-out directory, fsynced, and renamed into place without clobbering.
//! Readers therefore never observe a partial object, and when two writers
//! race on the same id the loser finds the file already present, which is
//! success: identical ids mean identical content.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::codec;
use crate::error::StoreError;
use crate::store::{ObjectStore, RawObject};
use crate::types::{ObjectId, ObjectKind};

/// Object store rooted at a directory.
#[derive(Clone, Debug)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open (creating if needed) an object directory.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    /// The object directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path where the object with this id lives.
    #[must_use]
    pub fn object_path(&self, id: ObjectId) -> PathBuf {
        let hex = id.to_string();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    /// List the ids of every stored object, sorted.
    ///
    /// Files whose names are not valid ids (e.g. leftover temporaries) are
    /// skipped.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if a directory cannot be read.
    pub fn list(&self) -> Result<Vec<ObjectId>, StoreError> {
        let mut ids = Vec::new();
        for fan in fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))? {
            let fan = fan.map_err(|e| StoreError::io(&self.root, e))?;
            let prefix = fan.file_name().to_string_lossy().into_owned();
            if prefix.len() != 2 || !fan.path().is_dir() {
                continue;
            }
            for file in fs::read_dir(fan.path()).map_err(|e| StoreError::io(fan.path(), e))? {
                let file = file.map_err(|e| StoreError::io(fan.path(), e))?;
                let name = format!("{prefix}{}", file.file_name().to_string_lossy());
                if let Ok(id) = name.parse::<ObjectId>() {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Re-hash every stored object.
    ///
    /// Returns the number of objects checked.
    ///
    /// # Errors
    /// Returns the first [`StoreError::Corrupt`] or decoding error found.
    pub fn verify(&self) -> Result<usize, StoreError> {
        let ids = self.list()?;
        for id in &ids {
            self.read(*id)?;
        }
        Ok(ids.len())
    }
}

impl ObjectStore for FsObjectStore {
    #[instrument(level = "trace", skip(self, body), fields(len = body.len()))]
    fn put_raw(&self, kind: ObjectKind, body: &[u8]) -> Result<ObjectId, StoreError> {
        let frame = codec::frame(kind, body);
        let id = codec::hash_frame(&frame);
        let path = self.object_path(id);
        if path.try_exists().map_err(|e| StoreError::io(&path, e))? {
            return Ok(id);
        }

        let dir = path
            .parent()
            .ok_or_else(|| StoreError::io(&path, ErrorKind::InvalidInput.into()))?;
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        tmp.write_all(&frame)
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(tmp.path(), e))?;

        match tmp.persist_noclobber(&path) {
            Ok(_) => debug!(%kind, id = %id.short(), "stored object"),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                debug!(%kind, id = %id.short(), "object written concurrently");
            }
            Err(e) => return Err(StoreError::io(&path, e.error)),
        }
        Ok(id)
    }

    fn get_raw(&self, id: ObjectId) -> Result<RawObject, StoreError> {
        let path = self.object_path(id);
        let frame = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound { id }),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let actual = codec::hash_frame(&frame);
        if actual != id {
            tracing::error!(id = %id, actual = %actual, "object store corruption");
            return Err(StoreError::Corrupt { id, actual });
        }
        let (kind, body) = codec::unframe(&frame).map_err(|e| e.with_id(id))?;
        Ok(RawObject {
            kind,
            body: body.to_vec(),
        })
    }

    fn contains(&self, id: ObjectId) -> Result<bool, StoreError> {
        let path = self.object_path(id);
        path.try_exists().map_err(|e| StoreError::io(&path, e))
    }
}
