//! Error types for the filesystem adapter.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("broker call failed: {0}")]
    Broker(#[from] gate_client::ClientError),

    #[error("filesystem call failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown file handle {0}")]
    UnknownHandle(u64),

    #[error("unknown inode {0}")]
    UnknownInode(u64),
}

impl AdapterError {
    /// Translate to the errno `fuser` reply APIs expect.
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::Broker(e) => e.to_errno(),
            Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Self::UnknownHandle(_) => libc::EBADF,
            Self::UnknownInode(_) => libc::ENOENT,
        }
    }
}
