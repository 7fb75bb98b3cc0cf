//! Concurrent safety: racing writers against the on-disk stores.
//!
//! # What is verified
//!
//! - **Single winner**: N threads released together by a `Barrier`, all
//!   compare-and-swapping the same ref from the same expected value. Exactly
//!   one succeeds; every loser sees a retryable error and the ref holds the
//!   winner's value.
//! - **No lost updates**: threads running a read/CAS/retry loop on a shared
//!   counter ref end with the counter equal to the total number of
//!   increments, and one reflog entry per increment.
//! - **Idempotent object writes**: concurrent writers of identical content
//!   all get the same id and the store verifies clean afterwards.
//! - **Shared repository**: scoped threads creating distinct branches
//!   through one `&Repository` all succeed.
//! - **Seeds**: each scenario is driven by a seeded `StdRng`; failures print
//!   the seed for reproduction.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use grove::refs::RefLogMessage;
use grove::{FsObjectStore, FsRefStore, ObjectId, ObjectStore, RefError, RefName, RefStore, RefValue};

use common::{snapshot, temp_repo};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of racing threads per scenario.
const THREAD_COUNT: usize = 8;

/// Number of random scenarios for the single-winner race.
const SCENARIO_COUNT: u64 = 10;

/// Increments performed by each thread in the counter scenario.
const INCREMENTS_PER_THREAD: u64 = 10;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn random_id(rng: &mut StdRng) -> ObjectId {
    let mut bytes = [0u8; 32];
    for b in &mut bytes {
        *b = rng.random();
    }
    ObjectId::from_bytes(bytes)
}

/// Encode a counter in the first eight bytes of an id.
fn counter_id(n: u64) -> ObjectId {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&n.to_be_bytes());
    ObjectId::from_bytes(bytes)
}

fn counter_of(id: ObjectId) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&id.as_bytes()[..8]);
    u64::from_be_bytes(raw)
}

fn message(actor: usize, reason: &str) -> RefLogMessage {
    RefLogMessage::new(format!("thread-{actor} <t@example.com>"), 1_000, reason)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn racing_cas_has_exactly_one_winner() {
    for seed in 0..SCENARIO_COUNT {
        let mut rng = StdRng::seed_from_u64(seed);
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsRefStore::open(dir.path()).unwrap());
        let name = RefName::branch("main").unwrap();

        let base = RefValue::Direct(random_id(&mut rng));
        store.update(&name, None, &base, &message(0, "create")).unwrap();

        let candidates: Vec<RefValue> = (0..THREAD_COUNT)
            .map(|_| RefValue::Direct(random_id(&mut rng)))
            .collect();
        let barrier = Arc::new(Barrier::new(THREAD_COUNT));

        let handles: Vec<_> = candidates
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, new)| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let name = name.clone();
                let base = base.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.update(&name, Some(&base), &new, &message(i, "race"))
                })
            })
            .collect();
        let results: Vec<Result<(), RefError>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_ok())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(winners.len(), 1, "seed {seed}: winners {winners:?}");
        for (i, result) in results.iter().enumerate() {
            if let Err(e) = result {
                assert!(e.is_retryable(), "seed {seed}: thread {i} got {e}");
            }
        }

        let winner = winners[0];
        assert_eq!(
            store.read(&name).unwrap(),
            Some(candidates[winner].clone()),
            "seed {seed}"
        );
        let log = store.reflog(&name).unwrap();
        assert_eq!(log.len(), 2, "seed {seed}");
        assert_eq!(log[1].actor, format!("thread-{winner} <t@example.com>"));
        assert_eq!(log[1].old, base.as_direct().unwrap());
    }
}

#[test]
fn retry_loops_lose_no_increments() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FsRefStore::open(dir.path()).unwrap());
    let name = RefName::branch("counter").unwrap();
    store
        .update(&name, None, &RefValue::Direct(counter_id(0)), &message(0, "init"))
        .unwrap();
    let barrier = Arc::new(Barrier::new(THREAD_COUNT));

    let handles: Vec<_> = (0..THREAD_COUNT)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let name = name.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(i as u64);
                let mut retries = 0usize;
                barrier.wait();
                for _ in 0..INCREMENTS_PER_THREAD {
                    loop {
                        let current = store.read(&name).unwrap().unwrap();
                        let n = counter_of(current.as_direct().unwrap());
                        let next = RefValue::Direct(counter_id(n + 1));
                        match store.update(&name, Some(&current), &next, &message(i, "increment")) {
                            Ok(()) => break,
                            Err(e) if e.is_retryable() => {
                                retries += 1;
                                // Jitter so the same threads don't collide in lockstep.
                                thread::sleep(std::time::Duration::from_micros(
                                    rng.random_range(0..200),
                                ));
                            }
                            Err(e) => panic!("thread {i}: {e}"),
                        }
                    }
                }
                retries
            })
        })
        .collect();
    let retries: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let total = THREAD_COUNT as u64 * INCREMENTS_PER_THREAD;
    let value = store.read(&name).unwrap().unwrap();
    assert_eq!(counter_of(value.as_direct().unwrap()), total, "after {retries} retries");

    let log = store.reflog(&name).unwrap();
    assert_eq!(log.len() as u64, total + 1);
    for pair in log.windows(2) {
        assert_eq!(pair[0].new, pair[1].old, "reflog chain is contiguous");
    }
}

#[test]
fn concurrent_identical_object_writes_agree() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FsObjectStore::open(dir.path().join("objects")).unwrap());
    let mut rng = StdRng::seed_from_u64(7);
    let payloads: Vec<Vec<u8>> = (0..4)
        .map(|_| (0..rng.random_range(1..4096)).map(|_| rng.random()).collect())
        .collect();
    let payloads = Arc::new(payloads);
    let barrier = Arc::new(Barrier::new(THREAD_COUNT));

    let handles: Vec<_> = (0..THREAD_COUNT)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let payloads = Arc::clone(&payloads);
            thread::spawn(move || {
                barrier.wait();
                payloads
                    .iter()
                    .map(|p| store.write_blob(p).unwrap())
                    .collect::<Vec<ObjectId>>()
            })
        })
        .collect();
    let ids: Vec<Vec<ObjectId>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for other in &ids[1..] {
        assert_eq!(other, &ids[0]);
    }
    for (id, payload) in ids[0].iter().zip(payloads.iter()) {
        assert_eq!(&store.read_blob(*id).unwrap(), payload);
    }
    assert_eq!(store.verify().unwrap(), payloads.len());
}

#[test]
fn shared_repository_creates_branches_from_many_threads() {
    let (_dir, repo) = temp_repo();
    let base = repo.commit_snapshot(&snapshot(&[("f", "base\n")]), "base").unwrap();

    thread::scope(|s| {
        for i in 0..THREAD_COUNT {
            let repo = &repo;
            s.spawn(move || {
                repo.create_branch(&format!("agent-{i}"), base).unwrap();
            });
        }
    });

    let branches = repo.branches().unwrap();
    for i in 0..THREAD_COUNT {
        let name = RefName::branch(&format!("agent-{i}")).unwrap();
        assert!(branches.iter().any(|(n, _)| *n == name), "missing {name}");
    }
}
