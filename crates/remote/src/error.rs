//! Remote Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A remote API error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote API operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request never got a response (DNS, connection, timeout, etc.)
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// The server answered with a non-success status.
    #[display("unexpected HTTP status {_0}")]
    Status(#[error(not(source))] u16),
    /// The requested endpoint or entity does not exist.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The request could not be built (bad base URL or header value).
    #[display("invalid request: {_0}")]
    InvalidRequest(#[error(not(source))] String),
    /// The body was not JSON, or not in any of the accepted shapes.
    #[display("could not decode response: {_0}")]
    Decode(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status(status) => *status == 429 || *status >= 500,
            Self::NotFound(_) | Self::InvalidRequest(_) | Self::Decode(_) => false,
        }
    }
}
