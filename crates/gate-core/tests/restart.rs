//! Durability: a lock survives closing and reopening the store over the
//! same database file.

use gate_core::{AcquireRequest, LockStore, Mode};

#[test]
fn lock_survives_store_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("locks.db");

    let lock_id = {
        let store = LockStore::open(&db_path).unwrap();
        let lock = store
            .acquire(AcquireRequest {
                path: "project/file.txt".into(),
                mode: Mode::Write,
                owner: "agent-a".into(),
                timeout_ms: Some(1000),
                lease_ms: 60_000,
                max_hold_ms: None,
            })
            .unwrap()
            .unwrap();
        lock.lock_id
    };

    let store = LockStore::open(&db_path).unwrap();
    let snapshot = store.status(Some("project/file.txt")).unwrap();
    assert_eq!(snapshot.locks.len(), 1);
    assert_eq!(snapshot.locks[0].lock_id, lock_id);
    assert_eq!(snapshot.locks[0].owner, "agent-a");

    assert!(store.release(&lock_id, "agent-a").unwrap());
    let snapshot = store.status(Some("project/file.txt")).unwrap();
    assert!(snapshot.locks.is_empty());
}

#[test]
fn schema_upgrade_adds_missing_columns() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("locks.db");

    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE locks (
                lock_id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                mode TEXT NOT NULL,
                owner TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                lease_expires_at TEXT NOT NULL
            );
            CREATE TABLE queue (
                req_id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL,
                mode TEXT NOT NULL,
                owner TEXT NOT NULL,
                requested_at TEXT NOT NULL
            );",
        )
        .unwrap();
    }

    // Opening through LockStore must not fail even though the on-disk
    // schema predates `max_hold_ms`/`hold_count`.
    let store = LockStore::open(&db_path).unwrap();
    let lock = store
        .acquire(AcquireRequest {
            path: "f".into(),
            mode: Mode::Read,
            owner: "a".into(),
            timeout_ms: Some(1000),
            lease_ms: 60_000,
            max_hold_ms: Some(5_000),
        })
        .unwrap()
        .unwrap();
    assert_eq!(lock.max_hold_ms, Some(5_000));
}
