//! Contention tests for the shared state tree.
//!
//! Each worker opens its own lock file descriptors, so `flock` conflicts
//! between threads exactly as it does between hook processes.

use std::sync::{Arc, Barrier};
use std::time::Duration;

use chrono::Utc;
use hookline_core::approval::{ApprovalGate, ApprovalStatus, ResolveOutcome};
use hookline_core::thread::{self, BindOutcome};
use hookline_core::{debounce, sentinel, Scope, StorageConfig, Store};
use hookline_protocol::Decision;
use tempfile::tempdir;

fn store(root: &std::path::Path) -> Store {
    Store::new(StorageConfig::with_root(root.to_path_buf())).with_lock_timeout(Duration::from_secs(10))
}

#[test]
fn racing_binders_agree_on_one_root() {
    let temp = tempdir().unwrap();
    let store = Arc::new(store(temp.path()));
    let demo = Scope::project("demo");
    sentinel::enable(&store, &demo, Utc::now()).unwrap();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let demo = demo.clone();
            std::thread::spawn(move || {
                barrier.wait();
                thread::bind(&store, &demo, 100 + i as i64, None, Utc::now()).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<BindOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let bound: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, BindOutcome::Bound(_)))
        .collect();
    assert_eq!(bound.len(), 1);

    let root = bound[0].root();
    assert!(outcomes.iter().all(|o| o.root() == root));
    assert_eq!(thread::get(&store, &demo).unwrap(), Some(root));
}

#[test]
fn concurrent_accumulate_loses_nothing_and_flushes_once() {
    let temp = tempdir().unwrap();
    let store = Arc::new(store(temp.path()));
    let demo = Scope::project("demo");
    let start = Utc::now();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let store = Arc::clone(&store);
            let demo = demo.clone();
            std::thread::spawn(move || {
                for _ in 0..5 {
                    let label = format!("agent-{}", i);
                    debounce::accumulate(&store, &demo, "SubagentStop", Some(&label), start).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let window = chrono::Duration::seconds(30);
    let later = start + window;
    let barrier = Arc::new(Barrier::new(4));
    let flushers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let demo = demo.clone();
            std::thread::spawn(move || {
                barrier.wait();
                debounce::flush_if_stale(&store, &demo, window, later).unwrap()
            })
        })
        .collect();

    let taken: Vec<_> = flushers
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(taken.len(), 1);
    let summary = taken[0].summary();
    assert_eq!(summary.total, 30);
    assert_eq!(summary.kinds[0].labels.len(), 6);
}

#[test]
fn conflicting_decisions_apply_exactly_one() {
    let temp = tempdir().unwrap();
    let gate = ApprovalGate::new(store(temp.path())).with_timeout(Duration::from_secs(10));
    let pending = gate
        .open(&Scope::project("demo"), "Bash", "make deploy", Utc::now())
        .unwrap();
    let id = pending.request_id().to_string();

    let barrier = Arc::new(Barrier::new(2));
    let deciders: Vec<_> = [(Decision::Approve, "ana"), (Decision::Block, "bo")]
        .into_iter()
        .map(|(decision, who)| {
            let gate = gate.clone();
            let barrier = Arc::clone(&barrier);
            let id = id.clone();
            std::thread::spawn(move || {
                barrier.wait();
                gate.resolve(&id, decision, who, Utc::now()).unwrap()
            })
        })
        .collect();
    let results: Vec<ResolveOutcome> = deciders.into_iter().map(|h| h.join().unwrap()).collect();

    let applied: Vec<_> = results
        .iter()
        .filter_map(|r| match r {
            ResolveOutcome::Resolved(record) => Some(record.status),
            _ => None,
        })
        .collect();
    assert_eq!(applied.len(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, ResolveOutcome::AlreadyResolved(_))));

    let outcome = pending.wait().unwrap();
    assert_eq!(outcome.status, applied[0]);
    assert_ne!(outcome.status, ApprovalStatus::Pending);
}

#[test]
fn decision_racing_timeout_is_never_overwritten() {
    let temp = tempdir().unwrap();
    let gate = ApprovalGate::new(store(temp.path())).with_timeout(Duration::from_millis(200));
    let pending = gate
        .open(&Scope::project("demo"), "Bash", "ls", Utc::now())
        .unwrap();
    let id = pending.request_id().to_string();

    let resolver = gate.clone();
    let decider = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(190));
        resolver.resolve(&id, Decision::Approve, "ana", Utc::now()).unwrap()
    });
    let outcome = pending.wait().unwrap();
    let resolved = decider.join().unwrap();

    // Whichever transition won, both sides see the same terminal state.
    match resolved {
        ResolveOutcome::Resolved(_) => assert_eq!(outcome.status, ApprovalStatus::Approved),
        ResolveOutcome::AlreadyResolved(status) => {
            assert_eq!(status, ApprovalStatus::TimedOut);
            assert_eq!(outcome.status, ApprovalStatus::TimedOut);
        }
        ResolveOutcome::Unknown => panic!("request vanished"),
    }
}
