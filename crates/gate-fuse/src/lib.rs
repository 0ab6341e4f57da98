//! FUSE passthrough filesystem that enforces broker-issued locks.
//!
//! `gate-fuse` has no knowledge of the broker's storage or transport
//! internals; it only ever talks to one through `gate_client::BrokerClient`.
//! Mounting is left to the binary that embeds this crate (`gate-cli`), which
//! owns the `fuser::mount2` call and process lifetime.

pub mod error;
pub mod fs;

pub use error::AdapterError;
pub use fs::{GateFs, MountOptions};
