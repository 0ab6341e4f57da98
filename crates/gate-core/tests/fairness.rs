//! End-to-end FIFO fairness scenarios.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gate_core::{AcquireRequest, LockStore, Mode};

fn req(path: &str, mode: Mode, owner: &str, timeout_ms: Option<u64>) -> AcquireRequest {
    AcquireRequest {
        path: path.to_string(),
        mode,
        owner: owner.to_string(),
        timeout_ms,
        lease_ms: 60_000,
        max_hold_ms: None,
    }
}

#[test]
fn writer_priority_over_later_readers() {
    // Writer B enqueues behind reader A (who already holds the lock);
    // reader C arrives after B and must not jump the queue ahead of B.
    let store = Arc::new(LockStore::open_in_memory().unwrap());
    let a = store
        .acquire(req("f", Mode::Read, "a", Some(1000)))
        .unwrap()
        .unwrap();

    let store_b = Arc::clone(&store);
    let writer_b = thread::spawn(move || {
        store_b
            .acquire(req("f", Mode::Write, "b", Some(3000)))
            .unwrap()
    });
    thread::sleep(Duration::from_millis(100));

    let store_c = Arc::clone(&store);
    let reader_c = thread::spawn(move || {
        store_c
            .acquire(req("f", Mode::Read, "c", Some(3000)))
            .unwrap()
    });
    thread::sleep(Duration::from_millis(100));

    store.release(&a.lock_id, "a").unwrap();

    let b_result = writer_b.join().unwrap();
    assert!(b_result.is_some(), "writer b should have been granted the lock");
    let b = b_result.unwrap();
    assert_eq!(b.owner, "b");

    // Reader c is still queued behind writer b; release b and it should
    // then be granted.
    store.release(&b.lock_id, "b").unwrap();
    let c = reader_c.join().unwrap();
    assert!(c.is_some(), "reader c should eventually be granted");
    assert_eq!(c.unwrap().owner, "c");
}

#[test]
fn concurrent_readers_proceed_without_blocking() {
    let store = Arc::new(LockStore::open_in_memory().unwrap());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .acquire(req("shared", Mode::Read, &format!("reader-{i}"), Some(500)))
                    .unwrap()
            })
        })
        .collect();

    for h in handles {
        assert!(h.join().unwrap().is_some());
    }

    let snapshot = store.status(Some("shared")).unwrap();
    assert_eq!(snapshot.locks.len(), 8);
}

#[test]
fn multi_path_sorted_acquisition_avoids_deadlock() {
    // Simulates the filesystem adapter's rule: always acquire write locks
    // across several paths in sorted order. Two "renames" touching the
    // same pair of paths in opposite request order must not deadlock when
    // both sort their acquisitions before issuing them.
    let store = Arc::new(LockStore::open_in_memory().unwrap());

    fn acquire_sorted_then_release(store: &LockStore, owner: &str, mut paths: Vec<&str>) {
        paths.sort_unstable();
        let locks: Vec<String> = paths
            .into_iter()
            .map(|p| {
                store
                    .acquire(req(p, Mode::Write, owner, Some(2000)))
                    .unwrap()
                    .expect("sorted acquisition should not deadlock")
                    .lock_id
            })
            .collect();
        for lock_id in locks {
            store.release(&lock_id, owner).unwrap();
        }
    }

    let store1 = Arc::clone(&store);
    let t1 = thread::spawn(move || acquire_sorted_then_release(&store1, "renamer-1", vec!["b", "a"]));
    let store2 = Arc::clone(&store);
    let t2 = thread::spawn(move || acquire_sorted_then_release(&store2, "renamer-2", vec!["a", "b"]));

    t1.join().unwrap();
    t2.join().unwrap();

    let snapshot = store.status(None).unwrap();
    assert!(snapshot.locks.is_empty(), "both renamers must fully release");
}
