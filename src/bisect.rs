//! Bisect: find the first bad commit by binary search over history.
//!
//! A session starts from one bad commit and one or more good commits. The
//! suspects are the commits reachable from bad but not from any good. Each
//! verdict shrinks the suspects:
//!
//! - **bad** `c`: only suspects reachable from `c` remain, and `c` becomes
//!   the known bad commit;
//! - **good** `c`: suspects reachable from `c` are cleared;
//! - **skip** `c`: `c` stays a suspect but is never proposed again.
//!
//! When the known bad commit is the only suspect left it is the first bad
//! commit. When every other suspect has been skipped the result is
//! inconclusive.
//!
//! Sessions are pure in-memory: the suspects' parent links are read once at
//! [`BisectSession::new`].

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use grove_store::ObjectId;

use crate::graph::{CommitGraph, GraphError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Verdict on one tested commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The commit does not show the problem.
    Good,
    /// The commit shows the problem.
    Bad,
    /// The commit cannot be tested.
    Skip,
}

/// What to do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BisectStep {
    /// Test this commit and report a verdict.
    Test(ObjectId),
    /// The first bad commit.
    Done(ObjectId),
    /// Only skipped commits are left; the first bad commit is one of these.
    Inconclusive(Vec<ObjectId>),
}

/// One line of the bisect log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BisectLogEntry {
    /// The commit judged.
    pub commit: ObjectId,
    /// The verdict.
    pub verdict: Verdict,
    /// Suspects left after applying the verdict.
    pub remaining: usize,
}

/// Errors from a bisect session.
#[derive(Debug, thiserror::Error)]
pub enum BisectError {
    /// Reading history failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// No good commit was given.
    #[error("bisect needs at least one good commit")]
    MissingGood,

    /// The bad commit is reachable from a good one.
    #[error("bad commit {bad} is an ancestor of a good commit")]
    EmptyRange {
        /// The bad commit.
        bad: ObjectId,
    },

    /// The commit is not a remaining suspect.
    #[error("commit {commit} is outside the bisect range")]
    OutOfRange {
        /// The commit.
        commit: ObjectId,
    },

    /// The known bad commit was marked good.
    #[error("commit {commit} was already found bad")]
    Contradiction {
        /// The commit.
        commit: ObjectId,
    },
}

// ---------------------------------------------------------------------------
// BisectSession
// ---------------------------------------------------------------------------

/// An in-progress bisection.
#[derive(Clone, Debug)]
pub struct BisectSession {
    bad: ObjectId,
    /// Suspects, parents before children.
    suspects: Vec<ObjectId>,
    parents: HashMap<ObjectId, Vec<ObjectId>>,
    skipped: HashSet<ObjectId>,
    log: Vec<BisectLogEntry>,
}

impl BisectSession {
    /// Start a session for the range `goods..bad`.
    ///
    /// # Errors
    /// [`BisectError::MissingGood`], [`BisectError::EmptyRange`], or a graph
    /// failure.
    pub fn new(
        graph: &CommitGraph<'_>,
        goods: &[ObjectId],
        bad: ObjectId,
    ) -> Result<Self, BisectError> {
        if goods.is_empty() {
            return Err(BisectError::MissingGood);
        }
        let range = graph.range(&[bad], goods)?;
        if range.is_empty() {
            return Err(BisectError::EmptyRange { bad });
        }
        let suspects = graph.topo_order(&range)?;
        let mut parents = HashMap::with_capacity(suspects.len());
        for &id in &suspects {
            let inside: Vec<ObjectId> = graph
                .parents(id)?
                .into_iter()
                .filter(|p| range.contains(p))
                .collect();
            parents.insert(id, inside);
        }
        info!(suspects = suspects.len(), bad = %bad.short(), "bisect started");
        Ok(Self {
            bad,
            suspects,
            parents,
            skipped: HashSet::new(),
            log: Vec::new(),
        })
    }

    /// The known bad commit.
    #[must_use]
    pub const fn bad(&self) -> ObjectId {
        self.bad
    }

    /// Remaining suspects, parents first.
    #[must_use]
    pub fn suspects(&self) -> &[ObjectId] {
        &self.suspects
    }

    /// Every verdict so far.
    #[must_use]
    pub fn log(&self) -> &[BisectLogEntry] {
        &self.log
    }

    /// Number of good/bad verdicts so far (skips excluded).
    #[must_use]
    pub fn marks(&self) -> usize {
        self.log
            .iter()
            .filter(|e| e.verdict != Verdict::Skip)
            .count()
    }

    /// The next step.
    #[must_use]
    pub fn next_candidate(&self) -> BisectStep {
        let untested: Vec<(usize, ObjectId)> = self
            .suspects
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, c)| *c != self.bad && !self.skipped.contains(c))
            .collect();
        if untested.is_empty() {
            return if self.suspects.len() == 1 {
                BisectStep::Done(self.bad)
            } else {
                BisectStep::Inconclusive(self.suspects.clone())
            };
        }

        let n = self.suspects.len();
        if self.is_linear() {
            // Testing index i leaves i + 1 suspects if bad, n - 1 - i if good.
            let mid = n.saturating_sub(2) / 2;
            let best = untested
                .iter()
                .min_by_key(|(i, _)| (i.abs_diff(mid), *i))
                .map(|(_, c)| *c);
            if let Some(commit) = best {
                return BisectStep::Test(commit);
            }
        }

        let mut best: Option<(usize, usize, ObjectId)> = None;
        for (index, commit) in untested {
            let reach = self.reachable_within(commit).len();
            let score = reach.min(n - reach);
            let better = match best {
                None => true,
                Some((best_score, best_index, _)) => {
                    score > best_score || (score == best_score && index < best_index)
                }
            };
            if better {
                best = Some((score, index, commit));
            }
        }
        best.map_or(BisectStep::Done(self.bad), |(_, _, c)| BisectStep::Test(c))
    }

    /// Record a verdict for `commit`.
    ///
    /// # Errors
    /// [`BisectError::OutOfRange`] if `commit` is not a suspect,
    /// [`BisectError::Contradiction`] if the known bad commit is marked good.
    pub fn mark(&mut self, commit: ObjectId, verdict: Verdict) -> Result<(), BisectError> {
        if !self.suspects.contains(&commit) {
            return Err(BisectError::OutOfRange { commit });
        }
        match verdict {
            Verdict::Bad => {
                let keep = self.reachable_within(commit);
                self.suspects.retain(|c| keep.contains(c));
                self.bad = commit;
            }
            Verdict::Good => {
                if commit == self.bad {
                    return Err(BisectError::Contradiction { commit });
                }
                let drop = self.reachable_within(commit);
                self.suspects.retain(|c| !drop.contains(c));
            }
            Verdict::Skip => {
                self.skipped.insert(commit);
            }
        }
        self.skipped.retain(|c| self.suspects.contains(c));
        self.log.push(BisectLogEntry {
            commit,
            verdict,
            remaining: self.suspects.len(),
        });
        debug!(commit = %commit.short(), ?verdict, remaining = self.suspects.len(), "bisect verdict");
        Ok(())
    }

    /// Drive the session to the end, asking `oracle` for each verdict.
    ///
    /// Returns [`BisectStep::Done`] or [`BisectStep::Inconclusive`].
    ///
    /// # Errors
    /// Propagates [`BisectSession::mark`] failures.
    pub fn run<F>(&mut self, mut oracle: F) -> Result<BisectStep, BisectError>
    where
        F: FnMut(ObjectId) -> Verdict,
    {
        loop {
            match self.next_candidate() {
                BisectStep::Test(commit) => {
                    let verdict = oracle(commit);
                    self.mark(commit, verdict)?;
                }
                done => {
                    info!(marks = self.marks(), result = ?done, "bisect finished");
                    return Ok(done);
                }
            }
        }
    }

    /// `true` if the suspects form a single chain.
    fn is_linear(&self) -> bool {
        let live: HashSet<&ObjectId> = self.suspects.iter().collect();
        self.suspects.iter().enumerate().all(|(i, c)| {
            let inside: Vec<&ObjectId> = self
                .parents
                .get(c)
                .into_iter()
                .flatten()
                .filter(|p| live.contains(p))
                .collect();
            match i {
                0 => inside.is_empty(),
                _ => inside.len() == 1 && *inside[0] == self.suspects[i - 1],
            }
        })
    }

    /// Suspects reachable from `start` (inclusive).
    fn reachable_within(&self, start: ObjectId) -> HashSet<ObjectId> {
        let live: HashSet<&ObjectId> = self.suspects.iter().collect();
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            for parent in self.parents.get(&id).into_iter().flatten() {
                if live.contains(parent) && seen.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use grove_store::{Commit, MemoryObjectStore, ObjectStore, Signature, Tree};

    use super::*;

    fn chain(store: &MemoryObjectStore, n: usize) -> Vec<ObjectId> {
        let tree = store.write_tree(&Tree::empty()).unwrap();
        let mut ids: Vec<ObjectId> = Vec::new();
        for i in 0..n {
            let sig = Signature::new("B", "b@x", i64::try_from(i).unwrap(), 0).unwrap();
            let id = store
                .write_commit(&Commit {
                    tree,
                    parents: ids.last().copied().into_iter().collect(),
                    author: sig.clone(),
                    committer: sig,
                    message: format!("{i}\n"),
                })
                .unwrap();
            ids.push(id);
        }
        ids
    }

    #[test]
    fn finds_first_bad_in_chain() {
        let store = MemoryObjectStore::new();
        let ids = chain(&store, 17);
        let graph = CommitGraph::new(&store);
        let first_bad = 11;
        let mut session = BisectSession::new(&graph, &[ids[0]], ids[16]).unwrap();
        let index: HashMap<ObjectId, usize> = ids.iter().enumerate().map(|(i, c)| (*c, i)).collect();
        let result = session
            .run(|c| if index[&c] >= first_bad { Verdict::Bad } else { Verdict::Good })
            .unwrap();
        assert_eq!(result, BisectStep::Done(ids[first_bad]));
        // 16 suspects → at most 4 marks.
        assert!(session.marks() <= 4, "took {} marks", session.marks());
    }

    #[test]
    fn skip_is_never_proposed_again() {
        let store = MemoryObjectStore::new();
        let ids = chain(&store, 6);
        let graph = CommitGraph::new(&store);
        let mut session = BisectSession::new(&graph, &[ids[0]], ids[5]).unwrap();
        let BisectStep::Test(first) = session.next_candidate() else {
            panic!("expected a candidate");
        };
        session.mark(first, Verdict::Skip).unwrap();
        assert_ne!(session.next_candidate(), BisectStep::Test(first));
    }

    #[test]
    fn all_skipped_is_inconclusive() {
        let store = MemoryObjectStore::new();
        let ids = chain(&store, 4);
        let graph = CommitGraph::new(&store);
        let mut session = BisectSession::new(&graph, &[ids[0]], ids[3]).unwrap();
        session.mark(ids[1], Verdict::Skip).unwrap();
        session.mark(ids[2], Verdict::Skip).unwrap();
        assert_eq!(
            session.next_candidate(),
            BisectStep::Inconclusive(vec![ids[1], ids[2], ids[3]])
        );
    }

    #[test]
    fn marking_outside_range_is_an_error() {
        let store = MemoryObjectStore::new();
        let ids = chain(&store, 4);
        let graph = CommitGraph::new(&store);
        let mut session = BisectSession::new(&graph, &[ids[1]], ids[3]).unwrap();
        assert!(matches!(
            session.mark(ids[0], Verdict::Good),
            Err(BisectError::OutOfRange { .. })
        ));
        assert!(matches!(
            session.mark(ids[3], Verdict::Good),
            Err(BisectError::Contradiction { .. })
        ));
    }

    #[test]
    fn bad_reachable_from_good_is_empty_range() {
        let store = MemoryObjectStore::new();
        let ids = chain(&store, 3);
        let graph = CommitGraph::new(&store);
        assert!(matches!(
            BisectSession::new(&graph, &[ids[2]], ids[1]),
            Err(BisectError::EmptyRange { .. })
        ));
        assert!(matches!(
            BisectSession::new(&graph, &[], ids[1]),
            Err(BisectError::MissingGood)
        ));
    }

    #[test]
    fn single_suspect_is_done_immediately() {
        let store = MemoryObjectStore::new();
        let ids = chain(&store, 2);
        let graph = CommitGraph::new(&store);
        let session = BisectSession::new(&graph, &[ids[0]], ids[1]).unwrap();
        assert_eq!(session.next_candidate(), BisectStep::Done(ids[1]));
    }

    #[test]
    fn dag_range_picks_balanced_candidate() {
        //   g - a - b - m (bad)
        //        \     /
        //         c --
        let store = MemoryObjectStore::new();
        let tree = store.write_tree(&Tree::empty()).unwrap();
        let mk = |ts: i64, parents: Vec<ObjectId>| {
            let sig = Signature::new("B", "b@x", ts, 0).unwrap();
            store
                .write_commit(&Commit {
                    tree,
                    parents,
                    author: sig.clone(),
                    committer: sig,
                    message: format!("{ts}\n"),
                })
                .unwrap()
        };
        let g = mk(1, vec![]);
        let a = mk(2, vec![g]);
        let b = mk(3, vec![a]);
        let c = mk(4, vec![a]);
        let m = mk(5, vec![b, c]);
        let graph = CommitGraph::new(&store);
        let mut session = BisectSession::new(&graph, &[g], m).unwrap();
        assert_eq!(session.next_candidate(), BisectStep::Test(b));

        // c introduced the problem.
        let result = session
            .run(|x| if x == c || x == m { Verdict::Bad } else { Verdict::Good })
            .unwrap();
        assert_eq!(result, BisectStep::Done(c));
        assert_eq!(session.log().last().map(|e| e.remaining), Some(1));
    }
}
