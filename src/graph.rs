//! Ancestry queries over the commit DAG.
//!
//! [`CommitGraph`] borrows an [`ObjectStore`] and answers reachability,
//! merge-base, range and ordering questions. It holds no cache: every query
//! reads commits through the store, so results always reflect what is stored.
//!
//! # Merge bases
//!
//! [`CommitGraph::merge_bases`] paints the history of both commits. Each
//! commit visited is tagged with the side(s) that reached it; commits reached
//! from both sides are common ancestors, and any common ancestor reachable
//! from another common ancestor is dropped. What remains are the lowest
//! common ancestors. Criss-cross histories yield more than one; the choice
//! [`CommitGraph::merge_base`] makes is reported as
//! [`GraphWarning::AmbiguousMergeBase`] rather than silently hidden.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use grove_store::{Commit, ObjectId, ObjectStore, StoreError};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from graph queries.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Reading a commit failed (missing, corrupt, or not a commit).
    #[error("reading commit {id}: {source}")]
    Store {
        /// The commit being read.
        id: ObjectId,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

impl GraphError {
    /// `true` if the underlying store reported corruption.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Store { source, .. } => source.is_fatal(),
        }
    }
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Non-fatal conditions surfaced alongside a query result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphWarning {
    /// More than one lowest common ancestor exists; `chosen` was used.
    AmbiguousMergeBase {
        /// The base that was picked.
        chosen: ObjectId,
        /// Every lowest common ancestor, in preference order.
        candidates: Vec<ObjectId>,
    },
}

/// Full result of a merge-base query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeBase {
    /// The base to use, or `None` for unrelated histories.
    pub chosen: Option<ObjectId>,
    /// Every lowest common ancestor, newest committer first, then by id.
    pub candidates: Vec<ObjectId>,
}

impl MergeBase {
    /// `true` when more than one lowest common ancestor exists.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }

    /// The ambiguity warning, if any.
    #[must_use]
    pub fn warning(&self) -> Option<GraphWarning> {
        match self.chosen {
            Some(chosen) if self.is_ambiguous() => Some(GraphWarning::AmbiguousMergeBase {
                chosen,
                candidates: self.candidates.clone(),
            }),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// CommitGraph
// ---------------------------------------------------------------------------

const SIDE_A: u8 = 0b01;
const SIDE_B: u8 = 0b10;
const BOTH: u8 = SIDE_A | SIDE_B;

/// Read-only view of the commit DAG stored in an [`ObjectStore`].
#[derive(Clone, Copy)]
pub struct CommitGraph<'a> {
    store: &'a dyn ObjectStore,
}

impl std::fmt::Debug for CommitGraph<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitGraph").finish_non_exhaustive()
    }
}

impl<'a> CommitGraph<'a> {
    /// Wrap a store.
    #[must_use]
    pub const fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &'a dyn ObjectStore {
        self.store
    }

    /// Read and decode a commit.
    ///
    /// # Errors
    /// [`GraphError::Store`] if `id` is missing, corrupt or not a commit.
    pub fn commit(&self, id: ObjectId) -> Result<Commit, GraphError> {
        self.store
            .read_commit(id)
            .map_err(|source| GraphError::Store { id, source })
    }

    /// A commit's parents, in order.
    ///
    /// # Errors
    /// See [`CommitGraph::commit`].
    pub fn parents(&self, id: ObjectId) -> Result<Vec<ObjectId>, GraphError> {
        Ok(self.commit(id)?.parents)
    }

    /// `true` if `ancestor` is reachable from `descendant` by following
    /// parents. Every commit is its own ancestor.
    ///
    /// # Errors
    /// See [`CommitGraph::commit`].
    pub fn is_ancestor(&self, ancestor: ObjectId, descendant: ObjectId) -> Result<bool, GraphError> {
        if ancestor == descendant {
            return Ok(true);
        }
        let mut seen = HashSet::from([descendant]);
        let mut queue = VecDeque::from([descendant]);
        while let Some(id) = queue.pop_front() {
            for parent in self.parents(id)? {
                if parent == ancestor {
                    return Ok(true);
                }
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        Ok(false)
    }

    /// Every commit reachable from any of `tips`, tips included.
    ///
    /// # Errors
    /// See [`CommitGraph::commit`].
    pub fn ancestors(&self, tips: &[ObjectId]) -> Result<HashSet<ObjectId>, GraphError> {
        self.reachable(tips, &HashSet::new())
    }

    /// Commits reachable from `include` but not from any of `exclude`
    /// (the `exclude..include` range).
    ///
    /// # Errors
    /// See [`CommitGraph::commit`].
    pub fn range(
        &self,
        include: &[ObjectId],
        exclude: &[ObjectId],
    ) -> Result<HashSet<ObjectId>, GraphError> {
        let excluded = self.ancestors(exclude)?;
        self.reachable(include, &excluded)
    }

    fn reachable(
        &self,
        tips: &[ObjectId],
        stop: &HashSet<ObjectId>,
    ) -> Result<HashSet<ObjectId>, GraphError> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<ObjectId> = tips
            .iter()
            .copied()
            .filter(|id| !stop.contains(id))
            .collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            for parent in self.parents(id)? {
                if !stop.contains(&parent) && !seen.contains(&parent) {
                    queue.push_back(parent);
                }
            }
        }
        Ok(seen)
    }

    /// All lowest common ancestors of `a` and `b`, newest committer first,
    /// then by id. Empty for unrelated histories.
    ///
    /// # Errors
    /// See [`CommitGraph::commit`].
    #[instrument(level = "debug", skip_all, fields(a = %a.short(), b = %b.short()))]
    pub fn merge_bases(&self, a: ObjectId, b: ObjectId) -> Result<Vec<ObjectId>, GraphError> {
        if a == b {
            return Ok(vec![a]);
        }

        // Paint both histories. Flags only grow, so a commit is re-queued
        // when it gains a side.
        let mut flags: HashMap<ObjectId, u8> = HashMap::from([(a, SIDE_A)]);
        *flags.entry(b).or_default() |= SIDE_B;
        let mut queue = VecDeque::from([a, b]);
        while let Some(id) = queue.pop_front() {
            let mark = flags.get(&id).copied().unwrap_or_default();
            for parent in self.parents(id)? {
                let entry = flags.entry(parent).or_default();
                if *entry | mark != *entry {
                    *entry |= mark;
                    queue.push_back(parent);
                }
            }
        }

        let common: HashSet<ObjectId> = flags
            .iter()
            .filter(|(_, f)| **f == BOTH)
            .map(|(id, _)| *id)
            .collect();
        if common.is_empty() {
            return Ok(Vec::new());
        }

        // Anything reachable from a common commit's parents is not lowest.
        let mut seeds = Vec::new();
        for id in &common {
            seeds.extend(self.parents(*id)?);
        }
        let shadowed = self.ancestors(&seeds)?;

        let mut bases = Vec::new();
        for id in common {
            if !shadowed.contains(&id) {
                let ts = self.commit(id)?.committer.timestamp;
                bases.push((Reverse(ts), id));
            }
        }
        bases.sort();
        Ok(bases.into_iter().map(|(_, id)| id).collect())
    }

    /// The merge base with its alternatives.
    ///
    /// # Errors
    /// See [`CommitGraph::commit`].
    pub fn merge_base_detail(&self, a: ObjectId, b: ObjectId) -> Result<MergeBase, GraphError> {
        let candidates = self.merge_bases(a, b)?;
        let detail = MergeBase {
            chosen: candidates.first().copied(),
            candidates,
        };
        if let Some(chosen) = detail.chosen
            && detail.is_ambiguous()
        {
            warn!(
                a = %a.short(),
                b = %b.short(),
                chosen = %chosen.short(),
                candidates = detail.candidates.len(),
                "ambiguous merge base (criss-cross history)"
            );
        }
        Ok(detail)
    }

    /// A single merge base, or `None` for unrelated histories.
    ///
    /// # Errors
    /// See [`CommitGraph::commit`].
    pub fn merge_base(&self, a: ObjectId, b: ObjectId) -> Result<Option<ObjectId>, GraphError> {
        Ok(self.merge_base_detail(a, b)?.chosen)
    }

    /// Order `commits` so that each comes after every parent also in the set.
    ///
    /// Ready commits are emitted oldest committer first, then by id, so the
    /// result is deterministic.
    ///
    /// # Errors
    /// See [`CommitGraph::commit`].
    pub fn topo_order(&self, commits: &HashSet<ObjectId>) -> Result<Vec<ObjectId>, GraphError> {
        let mut pending: HashMap<ObjectId, usize> = HashMap::with_capacity(commits.len());
        let mut children: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
        let mut stamp: HashMap<ObjectId, i64> = HashMap::with_capacity(commits.len());

        for &id in commits {
            let commit = self.commit(id)?;
            stamp.insert(id, commit.committer.timestamp);
            let inside: BTreeSet<ObjectId> = commit
                .parents
                .into_iter()
                .filter(|p| commits.contains(p))
                .collect();
            pending.insert(id, inside.len());
            for parent in inside {
                children.entry(parent).or_default().push(id);
            }
        }

        let key = |id: ObjectId| Reverse((stamp.get(&id).copied().unwrap_or_default(), id));
        let mut ready: BinaryHeap<Reverse<(i64, ObjectId)>> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| key(*id))
            .collect();

        let mut order = Vec::with_capacity(commits.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id);
            for child in children.get(&id).into_iter().flatten() {
                if let Some(n) = pending.get_mut(child) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push(key(*child));
                    }
                }
            }
        }
        Ok(order)
    }

    /// History reachable from `tip`, newest first (reverse topological).
    ///
    /// # Errors
    /// See [`CommitGraph::commit`].
    pub fn log(&self, tip: ObjectId) -> Result<Vec<ObjectId>, GraphError> {
        let mut order = self.topo_order(&self.ancestors(&[tip])?)?;
        order.reverse();
        Ok(order)
    }
}
