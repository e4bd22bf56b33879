//! Metadata Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A metadata error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for metadata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    #[display("cannot create metadata directory: {}", _0.display())]
    Directory(#[error(not(source))] PathBuf),
    #[display("identity not found: {_0}")]
    IdentityNotFound(#[error(not(source))] String),
    #[display("version not found: {_0} v{_1}")]
    VersionNotFound(#[error(not(source))] String, u32),
    /// The `(identity, version)` pair is already recorded.
    #[display("version already exists: {_0} v{_1}")]
    DuplicateVersion(#[error(not(source))] String, u32),
    /// Another identity of the same owner already uses the name.
    #[display("name already taken: {_0}")]
    NameCollision(#[error(not(source))] String),
    /// The object id is already referenced by a committed version.
    #[display("object already referenced: {_0}/{_1}")]
    ObjectCollision(#[error(not(source))] String, String),
    /// Stored data doesn't fit the model (or the model doesn't fit the column).
    #[display("invalid metadata: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // SQLITE_BUSY after the busy timeout, mostly.
        matches!(self, Self::Database)
    }
}

/// Columns of the unique constraint that rejected the statement, if that's
/// what the error is (`"table.column, table.column"`).
pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => db.message().rsplit(": ").next(),
        _ => None,
    }
}
