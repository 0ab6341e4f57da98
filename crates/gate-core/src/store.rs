//! Durable, FIFO-fair read/write lock store.
//!
//! One [`LockStore`] backs one broker process. All mutation happens behind a
//! single `parking_lot::Mutex` guarding the SQLite connection; a single
//! `parking_lot::Condvar` wakes every waiter whenever the `locks` table
//! changes, mirroring the single-condition-variable design of the in-process
//! RW-lock manager this store generalizes.

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{AcquireRequest, LockInfo, Mode, QueueEntry, StatusSnapshot};

/// How many recently-evicted-for-exceeding-max-hold lock ids to remember, so
/// the owner's next call gets `HoldCapExceeded` instead of a bare `NotFound`.
const HOLD_CAP_TOMBSTONE_CAPACITY: usize = 1024;

/// Poll interval used when a caller's `acquire` has no `timeout_ms`, matching
/// the original implementation's one-second wake cadence.
const UNBOUNDED_POLL: Duration = Duration::from_secs(1);

struct Inner {
    conn: Connection,
    tombstones: VecDeque<String>,
}

/// The lock store. Cheap to clone via `Arc` at the call site; this type
/// itself holds the mutex and condvar directly.
pub struct LockStore {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl LockStore {
    /// Open (creating if absent) the SQLite-backed store at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
            })?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::init_schema(&conn)?;

        debug!(path = %db_path.display(), "lock store opened");

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                tombstones: VecDeque::with_capacity(HOLD_CAP_TOMBSTONE_CAPACITY),
            }),
            cond: Condvar::new(),
        })
    }

    /// Open an in-memory store, used by tests that don't need durability.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                tombstones: VecDeque::with_capacity(HOLD_CAP_TOMBSTONE_CAPACITY),
            }),
            cond: Condvar::new(),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS locks (
                lock_id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                mode TEXT NOT NULL,
                owner TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                lease_expires_at TEXT NOT NULL,
                max_hold_ms INTEGER,
                hold_count INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS queue (
                req_id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL,
                mode TEXT NOT NULL,
                owner TEXT NOT NULL,
                requested_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_queue_path ON queue(path);
            CREATE INDEX IF NOT EXISTS idx_locks_path ON locks(path);",
        )?;
        Self::ensure_lock_columns(conn)?;
        Ok(())
    }

    /// Schema-evolution helper: add columns later versions of this store
    /// expect, to databases created by an older version.
    fn ensure_lock_columns(conn: &Connection) -> Result<(), StoreError> {
        let mut stmt = conn.prepare("PRAGMA table_info(locks)")?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        if !columns.iter().any(|c| c == "max_hold_ms") {
            conn.execute("ALTER TABLE locks ADD COLUMN max_hold_ms INTEGER", [])?;
        }
        if !columns.iter().any(|c| c == "hold_count") {
            conn.execute(
                "ALTER TABLE locks ADD COLUMN hold_count INTEGER NOT NULL DEFAULT 1",
                [],
            )?;
        }
        Ok(())
    }

    /// Acquire a lock, blocking the calling thread until it is granted or
    /// `request.timeout_ms` elapses. Returns `Ok(None)` on timeout, never an
    /// error, per the store's contract that a timed-out wait is not
    /// exceptional.
    pub fn acquire(&self, request: AcquireRequest) -> Result<Option<LockInfo>, StoreError> {
        if request.path.is_empty() {
            return Err(StoreError::InvalidArgument("path must not be empty".into()));
        }

        let mut guard = self.inner.lock();

        if let Some(info) = Self::try_reentrant_acquire(&mut guard.conn, &request)? {
            self.cond.notify_all();
            return Ok(Some(info));
        }

        let requested_at = Utc::now();
        let req_id: i64 = {
            guard.conn.execute(
                "INSERT INTO queue(path, mode, owner, requested_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    request.path,
                    request.mode.as_str(),
                    request.owner,
                    requested_at.to_rfc3339()
                ],
            )?;
            guard.conn.last_insert_rowid()
        };

        let start = Instant::now();
        loop {
            let hold_cap_evicted = Self::cleanup_expired(&mut guard.conn)?;
            for id in hold_cap_evicted {
                Self::tombstone(&mut guard, id);
            }

            if Self::can_grant(&guard.conn, &request.path, request.mode, req_id)? {
                let lock_id = Uuid::new_v4().to_string();
                let acquired_at = Utc::now();
                let lease_expires_at =
                    acquired_at + chrono::Duration::milliseconds(request.lease_ms as i64);

                // Granting the lock and dequeuing this request are one
                // logical operation; commit them together so a crash between
                // the two can never leave an orphaned queue entry blocking
                // every later writer on this path.
                let tx = guard.conn.transaction()?;
                tx.execute(
                    "INSERT INTO locks(lock_id, path, mode, owner, acquired_at, lease_expires_at, max_hold_ms, hold_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
                    params![
                        lock_id,
                        request.path,
                        request.mode.as_str(),
                        request.owner,
                        acquired_at.to_rfc3339(),
                        lease_expires_at.to_rfc3339(),
                        request.max_hold_ms.map(|v| v as i64),
                    ],
                )?;
                tx.execute("DELETE FROM queue WHERE req_id = ?1", params![req_id])?;
                tx.commit()?;
                self.cond.notify_all();

                return Ok(Some(LockInfo {
                    lock_id,
                    path: request.path,
                    mode: request.mode,
                    owner: request.owner,
                    acquired_at,
                    lease_expires_at,
                    max_hold_ms: request.max_hold_ms.map(|v| v as i64),
                    hold_count: 1,
                }));
            }

            let wait_for = match request.timeout_ms {
                Some(timeout_ms) => {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    if elapsed_ms >= timeout_ms {
                        guard
                            .conn
                            .execute("DELETE FROM queue WHERE req_id = ?1", params![req_id])?;
                        self.cond.notify_all();
                        return Ok(None);
                    }
                    Duration::from_millis(timeout_ms - elapsed_ms).min(UNBOUNDED_POLL)
                }
                None => UNBOUNDED_POLL,
            };

            self.cond.wait_for(&mut guard, wait_for);
        }
    }

    /// Check for a reentrant hold (same path, same owner) and either extend
    /// the existing lease or upgrade read to write in place, without
    /// touching the queue. Mirrors the original's pre-enqueue reentrancy
    /// check exactly, including the upgrade-only-when-sole-holder rule.
    fn try_reentrant_acquire(
        conn: &mut Connection,
        request: &AcquireRequest,
    ) -> Result<Option<LockInfo>, StoreError> {
        let existing = conn
            .query_row(
                "SELECT lock_id, mode, owner, acquired_at, lease_expires_at, max_hold_ms, hold_count
                 FROM locks WHERE path = ?1 AND owner = ?2 LIMIT 1",
                params![request.path, request.owner],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((lock_id, existing_mode, existing_owner, acquired_at, _old_lease, max_hold_ms, hold_count)) =
            existing
        else {
            return Ok(None);
        };
        let existing_mode: Mode = existing_mode.parse()?;
        let acquired_at: DateTime<Utc> = acquired_at.parse().map_err(|_| {
            StoreError::Backend(rusqlite::Error::ToSqlConversionFailure(Box::new(
                std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt acquired_at timestamp"),
            )))
        })?;

        let can_reenter = existing_mode == Mode::Write || existing_mode == request.mode;
        if can_reenter {
            let new_lease = Utc::now() + chrono::Duration::milliseconds(request.lease_ms as i64);
            conn.execute(
                "UPDATE locks SET lease_expires_at = ?1, hold_count = hold_count + 1 WHERE lock_id = ?2",
                params![new_lease.to_rfc3339(), lock_id],
            )?;
            return Ok(Some(LockInfo {
                lock_id,
                path: request.path.clone(),
                mode: existing_mode,
                owner: existing_owner,
                acquired_at,
                lease_expires_at: new_lease,
                max_hold_ms,
                hold_count: hold_count + 1,
            }));
        }

        if existing_mode == Mode::Read && request.mode == Mode::Write {
            let sole_holder: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM locks WHERE path = ?1 AND owner != ?2 LIMIT 1",
                    params![request.path, request.owner],
                    |row| row.get(0),
                )
                .optional()?;
            if sole_holder.is_none() {
                let new_lease =
                    Utc::now() + chrono::Duration::milliseconds(request.lease_ms as i64);
                conn.execute(
                    "UPDATE locks SET mode = 'write', lease_expires_at = ?1, hold_count = hold_count + 1
                     WHERE lock_id = ?2",
                    params![new_lease.to_rfc3339(), lock_id],
                )?;
                return Ok(Some(LockInfo {
                    lock_id,
                    path: request.path.clone(),
                    mode: Mode::Write,
                    owner: existing_owner,
                    acquired_at,
                    lease_expires_at: new_lease,
                    max_hold_ms,
                    hold_count: hold_count + 1,
                }));
            }
        }

        Ok(None)
    }

    fn can_grant(
        conn: &Connection,
        path: &str,
        mode: Mode,
        req_id: i64,
    ) -> Result<bool, StoreError> {
        if mode == Mode::Write {
            let earliest: Option<i64> = conn
                .query_row(
                    "SELECT MIN(req_id) FROM queue WHERE path = ?1",
                    params![path],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            if earliest != Some(req_id) {
                return Ok(false);
            }
            let any_lock: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM locks WHERE path = ?1 LIMIT 1",
                    params![path],
                    |row| row.get(0),
                )
                .optional()?;
            return Ok(any_lock.is_none());
        }

        let write_lock: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM locks WHERE path = ?1 AND mode = 'write' LIMIT 1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        if write_lock.is_some() {
            return Ok(false);
        }
        let writer_ahead: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM queue WHERE path = ?1 AND mode = 'write' AND req_id < ?2 LIMIT 1",
                params![path, req_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(writer_ahead.is_none())
    }

    /// Delete expired or over-max-hold locks. Returns only the lock ids
    /// evicted for exceeding `max_hold_ms`, since those are the ones whose
    /// owner should see a distinct `HoldCapExceeded` on their next call; an
    /// ordinary lease expiry reports a plain `NotFound`, matching the
    /// distinction drawn for the `max_hold_ms` open question.
    fn cleanup_expired(conn: &mut Connection) -> Result<Vec<String>, StoreError> {
        let now = Utc::now();
        let now_iso = now.to_rfc3339();

        // The lease-expiry delete and the per-lock hold-cap deletes below are
        // one logical reclamation sweep; they commit together so a crash
        // mid-sweep never leaves a half-evicted lock behind.
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM locks WHERE lease_expires_at <= ?1",
            params![now_iso],
        )?;

        let over_cap: Vec<(String, String, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT lock_id, acquired_at, max_hold_ms FROM locks WHERE max_hold_ms IS NOT NULL",
            )?;
            stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<_, _>>()?
        };
        let mut hold_cap_evicted = Vec::new();
        for (lock_id, acquired_at, max_hold_ms) in over_cap {
            let Ok(acquired) = DateTime::parse_from_rfc3339(&acquired_at) else {
                continue;
            };
            let held_ms = (now - acquired.with_timezone(&Utc)).num_milliseconds();
            if held_ms >= max_hold_ms {
                tx.execute("DELETE FROM locks WHERE lock_id = ?1", params![lock_id])?;
                hold_cap_evicted.push(lock_id);
            }
        }

        tx.commit()?;
        Ok(hold_cap_evicted)
    }

    fn tombstone(inner: &mut Inner, lock_id: String) {
        if inner.tombstones.len() >= HOLD_CAP_TOMBSTONE_CAPACITY {
            inner.tombstones.pop_front();
        }
        inner.tombstones.push_back(lock_id);
    }

    /// Release a held lock. A reentrant lock with `hold_count > 1` is
    /// decremented rather than dropped, matching the original's nested
    /// acquire/release bookkeeping.
    pub fn release(&self, lock_id: &str, owner: &str) -> Result<bool, StoreError> {
        let mut guard = self.inner.lock();
        let evicted = Self::cleanup_expired(&mut guard.conn)?;
        for id in &evicted {
            Self::tombstone(&mut guard, id.clone());
        }

        let row: Option<(String, i64)> = guard
            .conn
            .query_row(
                "SELECT owner, hold_count FROM locks WHERE lock_id = ?1",
                params![lock_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((held_owner, hold_count)) = row else {
            if guard.tombstones.iter().any(|id| id == lock_id) {
                return Err(StoreError::HoldCapExceeded(lock_id.to_string()));
            }
            return Ok(false);
        };
        if held_owner != owner {
            return Err(StoreError::PermissionDenied(format!(
                "{owner} does not own lock {lock_id}"
            )));
        }

        if hold_count > 1 {
            guard.conn.execute(
                "UPDATE locks SET hold_count = hold_count - 1 WHERE lock_id = ?1",
                params![lock_id],
            )?;
        } else {
            guard
                .conn
                .execute("DELETE FROM locks WHERE lock_id = ?1", params![lock_id])?;
        }
        self.cond.notify_all();
        Ok(true)
    }

    /// Extend a lock's lease. Fails (returns `Ok(false)`) if the lock was
    /// already reclaimed for ordinary lease expiry; returns
    /// `HoldCapExceeded` instead if it was reclaimed for exceeding
    /// `max_hold_ms`, matching the policy documented for `acquire`.
    pub fn heartbeat(&self, lock_id: &str, owner: &str, lease_ms: u64) -> Result<bool, StoreError> {
        let mut guard = self.inner.lock();

        let row: Option<(String, String, Option<i64>)> = guard
            .conn
            .query_row(
                "SELECT owner, acquired_at, max_hold_ms FROM locks WHERE lock_id = ?1",
                params![lock_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((held_owner, acquired_at, max_hold_ms)) = row else {
            if guard.tombstones.iter().any(|id| id == lock_id) {
                return Err(StoreError::HoldCapExceeded(lock_id.to_string()));
            }
            return Ok(false);
        };
        if held_owner != owner {
            return Err(StoreError::PermissionDenied(format!(
                "{owner} does not own lock {lock_id}"
            )));
        }

        if let Some(max_hold_ms) = max_hold_ms {
            if let Ok(acquired) = DateTime::parse_from_rfc3339(&acquired_at) {
                let held_ms = (Utc::now() - acquired.with_timezone(&Utc)).num_milliseconds();
                if held_ms >= max_hold_ms {
                    guard
                        .conn
                        .execute("DELETE FROM locks WHERE lock_id = ?1", params![lock_id])?;
                    Self::tombstone(&mut guard, lock_id.to_string());
                    self.cond.notify_all();
                    warn!(lock_id = %lock_id, "lock exceeded max_hold_ms, reclaimed on heartbeat");
                    return Err(StoreError::HoldCapExceeded(lock_id.to_string()));
                }
            }
        }

        let new_lease = Utc::now() + chrono::Duration::milliseconds(lease_ms as i64);
        guard.conn.execute(
            "UPDATE locks SET lease_expires_at = ?1 WHERE lock_id = ?2",
            params![new_lease.to_rfc3339(), lock_id],
        )?;
        Ok(true)
    }

    /// Snapshot current locks and queue entries, optionally filtered to one path.
    pub fn status(&self, path: Option<&str>) -> Result<StatusSnapshot, StoreError> {
        let guard = self.inner.lock();

        let locks = match path {
            Some(path) => {
                let mut stmt = guard.conn.prepare(
                    "SELECT lock_id, path, mode, owner, acquired_at, lease_expires_at, max_hold_ms, hold_count
                     FROM locks WHERE path = ?1",
                )?;
                stmt.query_map(params![path], Self::row_to_lock_info)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = guard.conn.prepare(
                    "SELECT lock_id, path, mode, owner, acquired_at, lease_expires_at, max_hold_ms, hold_count
                     FROM locks",
                )?;
                stmt.query_map([], Self::row_to_lock_info)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        let queue = match path {
            Some(path) => {
                let mut stmt = guard.conn.prepare(
                    "SELECT req_id, path, mode, owner, requested_at FROM queue WHERE path = ?1 ORDER BY req_id",
                )?;
                stmt.query_map(params![path], Self::row_to_queue_entry)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = guard.conn.prepare(
                    "SELECT req_id, path, mode, owner, requested_at FROM queue ORDER BY req_id",
                )?;
                stmt.query_map([], Self::row_to_queue_entry)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(StatusSnapshot { locks, queue })
    }

    fn row_to_lock_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<LockInfo> {
        let mode: String = row.get(2)?;
        let acquired_at: String = row.get(4)?;
        let lease_expires_at: String = row.get(5)?;
        Ok(LockInfo {
            lock_id: row.get(0)?,
            path: row.get(1)?,
            mode: mode.parse().unwrap_or(Mode::Read),
            owner: row.get(3)?,
            acquired_at: acquired_at
                .parse()
                .unwrap_or_else(|_| Utc::now()),
            lease_expires_at: lease_expires_at
                .parse()
                .unwrap_or_else(|_| Utc::now()),
            max_hold_ms: row.get(6)?,
            hold_count: row.get(7)?,
        })
    }

    fn row_to_queue_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
        let mode: String = row.get(2)?;
        let requested_at: String = row.get(4)?;
        Ok(QueueEntry {
            req_id: row.get(0)?,
            path: row.get(1)?,
            mode: mode.parse().unwrap_or(Mode::Read),
            owner: row.get(3)?,
            requested_at: requested_at.parse().unwrap_or_else(|_| Utc::now()),
        })
    }
}
