//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    /// A structural operation failed while upgrading the schema. The store is
    /// unusable until the cause is resolved (or the database file removed).
    #[display("database migration error")]
    Migration,
    #[display("unknown schema version: {_0}")]
    UnknownVersion(#[error(not(source))] u32),
    /// The database on disk was written by a newer schema than requested.
    #[display("database is at schema version {_0}, cannot open at older version {_1}")]
    Downgrade(u32, u32),
    #[display("unknown table: {_0}")]
    UnknownTable(#[error(not(source))] String),
    #[display("unknown index: {_0}.{_1}")]
    UnknownIndex(#[error(not(source))] String, String),
    /// A record does not carry its table's primary key path, or carries a
    /// value that cannot be used as a key.
    #[display("record has no usable key at path `{_0}`")]
    MissingKey(#[error(not(source))] String),
    /// Serialization/deserialization error.
    #[display("invalid store data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exn::ResultExt;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::UnknownVersion(9).to_string(), "unknown schema version: 9");
        assert_eq!(
            ErrorKind::UnknownIndex("vehicles".to_string(), "colour".to_string()).to_string(),
            "unknown index: vehicles.colour"
        );
        assert_eq!(ErrorKind::MissingKey("id".to_string()).to_string(), "record has no usable key at path `id`");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Database.is_retryable());
        assert!(!ErrorKind::Migration.is_retryable());
        assert!(!ErrorKind::InvalidData("value").is_retryable());
    }

    #[test]
    fn error_from_result() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"));
        let err: Result<()> = result.or_raise(|| ErrorKind::Database);
        assert_eq!(*err.unwrap_err(), ErrorKind::Database);
    }
}
