//! Sync Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Failures from the store and the
//! remote API keep their own error tree as a child of the sync error.

use derive_more::{Display, Error};
use lss_remote::error::{Error as RemoteError, ErrorKind as RemoteErrorKind};
use lss_store::error::{Error as StoreError, ErrorKind as StoreErrorKind};

/// A sync error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reading from or writing to the local store failed.
    #[display("store error: {_0}")]
    Store(StoreErrorKind),
    /// Fetching from the game API failed.
    #[display("remote error: {_0}")]
    Remote(RemoteErrorKind),
    /// The API answered, but not with what this resource expects.
    #[display("invalid response for {_0}")]
    InvalidResponse(#[error(not(source))] &'static str),
}
impl ErrorKind {
    /// Convert a store error into a sync error, preserving the store crate's
    /// `Exn` frame as a child in its own error tree.
    #[track_caller]
    pub fn store(err: StoreError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Store(inner))
    }

    /// Convert a remote API error into a sync error, preserving the remote
    /// crate's `Exn` frame as a child in its own error tree.
    #[track_caller]
    pub fn remote(err: RemoteError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Remote(inner))
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(kind) => kind.is_retryable(),
            Self::Remote(kind) => kind.is_retryable(),
            Self::InvalidResponse(_) => false,
        }
    }
}
