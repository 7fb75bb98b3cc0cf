//! Content-addressed object model for grove.
//!
//! This crate owns everything about objects: their identity ([`ObjectId`]),
//! the four variants ([`Object`]), the canonical byte encoding the identity is
//! computed over ([`codec`]), and the [`ObjectStore`] trait with a filesystem
//! and an in-memory implementation. Nothing here knows about references,
//! history, or merging.
//!
//! # Crate layout
//!
//! - [`types`]: [`ObjectId`], [`ObjectKind`], [`EntryMode`].
//! - [`object`]: [`Object`], [`Tree`], [`Commit`], [`Tag`], [`Signature`].
//! - [`codec`]: canonical framing, body encoding, and hashing.
//! - [`store`]: the [`ObjectStore`] trait.
//! - [`error`]: the [`StoreError`] enum.

pub mod codec;
pub mod error;
pub mod object;
pub mod store;
pub mod types;

mod fs_store;
mod memory;

pub use error::StoreError;
pub use fs_store::FsObjectStore;
pub use memory::MemoryObjectStore;
pub use object::{Commit, Object, Signature, Tag, Tree, TreeEntry};
pub use store::{ObjectStore, RawObject};
pub use types::{EntryMode, ObjectId, ObjectKind, OidParseError};
