use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A lock mode. Readers may coexist; a writer excludes everyone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Read,
    Write,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Read => "read",
            Mode::Write => "write",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = crate::error::StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Mode::Read),
            "write" => Ok(Mode::Write),
            other => Err(crate::error::StoreError::InvalidArgument(format!(
                "mode must be 'read' or 'write', got {other:?}"
            ))),
        }
    }
}

/// A granted lock, as persisted in the `locks` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub lock_id: String,
    pub path: String,
    pub mode: Mode,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
    pub max_hold_ms: Option<i64>,
    pub hold_count: i64,
}

/// A waiting request, as persisted in the `queue` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub req_id: i64,
    pub path: String,
    pub mode: Mode,
    pub owner: String,
    pub requested_at: DateTime<Utc>,
}

/// Snapshot returned by `LockStore::status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub locks: Vec<LockInfo>,
    pub queue: Vec<QueueEntry>,
}

/// Parameters accepted by `LockStore::acquire`.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub path: String,
    pub mode: Mode,
    pub owner: String,
    pub timeout_ms: Option<u64>,
    pub lease_ms: u64,
    pub max_hold_ms: Option<u64>,
}
