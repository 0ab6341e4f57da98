//! Error types for the broker client, with FUSE errno mapping so adapters
//! can translate a failed broker call directly into a syscall return code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Broker responded 400: the request itself was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Broker responded 403: caller does not own the lock.
    #[error("owner mismatch")]
    OwnerMismatch,

    /// Broker responded 404: lock or path not known.
    #[error("not found: {0}")]
    NotFound(String),

    /// Broker responded 408: acquire did not resolve before the deadline.
    #[error("acquire timed out")]
    TimedOut,

    /// Broker responded with an unexpected status code.
    #[error("broker error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Connection could not be established or was interrupted.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Broker response body was not the shape we expected.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Map to a FUSE errno, mirroring the adapter's own error-to-errno rule.
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::InvalidRequest(_) => libc::EINVAL,
            Self::OwnerMismatch => libc::EACCES,
            Self::NotFound(_) => libc::ENOENT,
            Self::TimedOut => libc::ETIMEDOUT,
            Self::ServerError { .. } => libc::EIO,
            Self::Transport(e) => {
                if e.is_timeout() {
                    libc::ETIMEDOUT
                } else if e.is_connect() {
                    libc::ECONNREFUSED
                } else {
                    libc::EIO
                }
            }
            Self::InvalidResponse(_) => libc::EPROTO,
        }
    }

    /// Whether a retry at the call site might succeed without
    /// application-level changes (broker down / overloaded / slow).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TimedOut | Self::ServerError { .. } | Self::Transport(_)
        )
    }
}
