//! Durable FIFO-fair lock store used by the Gate broker.
//!
//! This crate has no network or filesystem-adapter concerns of its own; it
//! is the single source of truth for which owner holds which path, shared
//! by `gate-broker` (over HTTP) and by anything else embedding the store
//! directly (tests, future in-process front-ends).

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::GateConfig;
pub use error::StoreError;
pub use store::LockStore;
pub use types::{AcquireRequest, LockInfo, Mode, QueueEntry, StatusSnapshot};
