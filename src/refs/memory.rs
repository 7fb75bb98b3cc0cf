//! In-memory [`RefStore`] for tests and embedders without persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use grove_store::ObjectId;
use tracing::debug;

use super::{
    DEFAULT_MAX_SYMBOLIC_DEPTH, RefError, RefLogMessage, RefName, RefStore, RefValue,
    ReflogEntry, RetentionPolicy, reflog_id,
};

#[derive(Debug, Default)]
struct Inner {
    refs: BTreeMap<RefName, RefValue>,
    logs: HashMap<RefName, Vec<ReflogEntry>>,
}

impl Inner {
    fn lookup(&self, name: &RefName) -> Result<Option<RefValue>, RefError> {
        Ok(self.refs.get(name).cloned())
    }

    fn directory_conflict(&self, name: &RefName) -> Option<RefName> {
        self.refs
            .keys()
            .find(|existing| existing.is_directory_of(name) || name.is_directory_of(existing))
            .cloned()
    }
}

/// Mutex-protected reference store.
///
/// One lock covers all names, so updates never observe [`RefError::Locked`].
#[derive(Debug)]
pub struct MemoryRefStore {
    inner: Mutex<Inner>,
    max_depth: usize,
}

impl Default for MemoryRefStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRefStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_depth: DEFAULT_MAX_SYMBOLIC_DEPTH,
        }
    }

    /// Override the symbolic-chain limit.
    #[must_use]
    pub const fn with_max_symbolic_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RefStore for MemoryRefStore {
    fn read(&self, name: &RefName) -> Result<Option<RefValue>, RefError> {
        self.inner().lookup(name)
    }

    fn update(
        &self,
        name: &RefName,
        expected: Option<&RefValue>,
        new: &RefValue,
        message: &RefLogMessage,
    ) -> Result<(), RefError> {
        let mut inner = self.inner();
        let current = inner.refs.get(name).cloned();
        if current.as_ref() != expected {
            return Err(RefError::Conflict {
                name: name.clone(),
                expected: expected.cloned(),
                actual: current,
            });
        }
        if current.is_none()
            && let Some(existing) = inner.directory_conflict(name)
        {
            return Err(RefError::DirectoryConflict {
                name: name.clone(),
                existing,
            });
        }

        let old_id = reflog_id(|n| inner.lookup(n), current.as_ref(), self.max_depth);
        let new_id = reflog_id(|n| inner.lookup(n), Some(new), self.max_depth);
        inner.refs.insert(name.clone(), new.clone());
        inner
            .logs
            .entry(name.clone())
            .or_default()
            .push(ReflogEntry::from_message(old_id, new_id, message));

        debug!(%name, old = %old_id.short(), new = %new_id.short(), "ref updated");
        Ok(())
    }

    fn delete(
        &self,
        name: &RefName,
        expected: &RefValue,
        message: &RefLogMessage,
    ) -> Result<(), RefError> {
        let mut inner = self.inner();
        let current = inner.refs.get(name).cloned();
        match current.as_ref() {
            None => return Err(RefError::NotFound { name: name.clone() }),
            Some(value) if value != expected => {
                return Err(RefError::Conflict {
                    name: name.clone(),
                    expected: Some(expected.clone()),
                    actual: current,
                });
            }
            Some(_) => {}
        }
        let old_id = reflog_id(|n| inner.lookup(n), current.as_ref(), self.max_depth);
        inner.refs.remove(name);
        inner
            .logs
            .entry(name.clone())
            .or_default()
            .push(ReflogEntry::from_message(old_id, ObjectId::ZERO, message));

        debug!(%name, old = %old_id.short(), "ref deleted");
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<(RefName, RefValue)>, RefError> {
        Ok(self
            .inner()
            .refs
            .iter()
            .filter(|(name, _)| name.as_str().starts_with(prefix))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }

    fn reflog(&self, name: &RefName) -> Result<Vec<ReflogEntry>, RefError> {
        Ok(self.inner().logs.get(name).cloned().unwrap_or_default())
    }

    fn reflog_names(&self) -> Result<Vec<RefName>, RefError> {
        let mut names: Vec<RefName> = self.inner().logs.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn prune_reflog(
        &self,
        name: &RefName,
        policy: &RetentionPolicy,
        now: i64,
    ) -> Result<usize, RefError> {
        let mut inner = self.inner();
        let Some(entries) = inner.logs.remove(name) else {
            return Ok(0);
        };
        let (kept, dropped) = policy.apply(entries, now);
        inner.logs.insert(name.clone(), kept);
        Ok(dropped)
    }

    fn max_symbolic_depth(&self) -> usize {
        self.max_depth
    }
}
