//! Path-level views of tree objects.
//!
//! Merging and the working-tree adapter both work on flat maps from a
//! `/`-separated path to the file stored there. [`flatten`] turns a tree
//! object into such a map and [`build`] writes the nested trees back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use grove_store::{EntryMode, ObjectId, ObjectStore, StoreError, Tree, TreeEntry};

/// One file in a flattened tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileVersion {
    /// Blob id of the content.
    pub id: ObjectId,
    /// File mode (never [`EntryMode::Tree`]).
    pub mode: EntryMode,
}

impl FileVersion {
    /// A regular file.
    #[must_use]
    pub const fn blob(id: ObjectId) -> Self {
        Self {
            id,
            mode: EntryMode::Blob,
        }
    }
}

/// Flat map from path to file.
pub type PathMap = BTreeMap<String, FileVersion>;

/// Errors from flattening or building trees.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// Object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A path is used both as a file and as a directory.
    #[error("path '{file}' is a file but '{nested}' needs it to be a directory")]
    FileDirectoryClash {
        /// The path holding a file.
        file: String,
        /// A path below it.
        nested: String,
    },

    /// A path is empty, absolute, or has an empty, `.` or `..` component.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Check that `path` is relative and normalized.
///
/// # Errors
/// [`TreeError::InvalidPath`] describing the first problem found.
pub fn validate_path(path: &str) -> Result<(), TreeError> {
    let fail = |reason: &str| {
        Err(TreeError::InvalidPath {
            path: path.to_owned(),
            reason: reason.to_owned(),
        })
    };
    if path.is_empty() {
        return fail("path is empty");
    }
    if path.starts_with('/') {
        return fail("path must be relative");
    }
    for component in path.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return fail("path must be normalized");
        }
        if component.contains('\0') {
            return fail("path must not contain NUL");
        }
    }
    Ok(())
}

/// Flatten a tree object into a map of every file below it.
///
/// # Errors
/// [`TreeError::Store`] if a tree or the root cannot be read.
pub fn flatten(store: &dyn ObjectStore, tree: ObjectId) -> Result<PathMap, TreeError> {
    let mut out = PathMap::new();
    flatten_into(store, tree, "", &mut out)?;
    Ok(out)
}

fn flatten_into(
    store: &dyn ObjectStore,
    tree: ObjectId,
    prefix: &str,
    out: &mut PathMap,
) -> Result<(), TreeError> {
    for entry in store.read_tree(tree)?.entries() {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{prefix}/{}", entry.name)
        };
        if entry.mode.is_tree() {
            flatten_into(store, entry.id, &path, out)?;
        } else {
            out.insert(
                path,
                FileVersion {
                    id: entry.id,
                    mode: entry.mode,
                },
            );
        }
    }
    Ok(())
}

/// Pairs `(file, nested)` where `file` is also a directory prefix of
/// `nested`.
#[must_use]
pub fn file_directory_clashes(paths: &PathMap) -> Vec<(String, String)> {
    let mut clashes = Vec::new();
    for path in paths.keys() {
        let mut cut = 0;
        while let Some(pos) = path[cut..].find('/') {
            let prefix = &path[..cut + pos];
            if paths.contains_key(prefix) {
                clashes.push((prefix.to_owned(), path.clone()));
            }
            cut += pos + 1;
        }
    }
    clashes
}

#[derive(Debug)]
enum Node {
    File(FileVersion),
    Dir(BTreeMap<String, Node>),
}

/// Write nested tree objects for `paths` and return the root tree id.
///
/// # Errors
/// [`TreeError::InvalidPath`] or [`TreeError::FileDirectoryClash`] for bad
/// paths, [`TreeError::Store`] for invalid entry names or write failures.
pub fn build(store: &dyn ObjectStore, paths: &PathMap) -> Result<ObjectId, TreeError> {
    if let Some((file, nested)) = file_directory_clashes(paths).into_iter().next() {
        return Err(TreeError::FileDirectoryClash { file, nested });
    }

    let mut root = BTreeMap::new();
    for (path, version) in paths {
        validate_path(path)?;
        let mut dir = &mut root;
        let mut parts = path.split('/').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                dir.insert(part.to_owned(), Node::File(*version));
                break;
            }
            let node = dir
                .entry(part.to_owned())
                .or_insert_with(|| Node::Dir(BTreeMap::new()));
            match node {
                Node::Dir(children) => dir = children,
                Node::File(_) => {
                    return Err(TreeError::FileDirectoryClash {
                        file: part.to_owned(),
                        nested: path.clone(),
                    });
                }
            }
        }
    }
    write_dir(store, &root)
}

fn write_dir(store: &dyn ObjectStore, dir: &BTreeMap<String, Node>) -> Result<ObjectId, TreeError> {
    let mut entries = Vec::with_capacity(dir.len());
    for (name, node) in dir {
        let entry = match node {
            Node::File(version) => TreeEntry::new(name.clone(), version.mode, version.id)?,
            Node::Dir(children) => {
                TreeEntry::new(name.clone(), EntryMode::Tree, write_dir(store, children)?)?
            }
        };
        entries.push(entry);
    }
    Ok(store.write_tree(&Tree::from_entries(entries)?)?)
}
