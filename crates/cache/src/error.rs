//! Cache Error Types

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Callers are expected to log these and carry on: the cache is never the
/// source of truth.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The cache service could not be reached or refused the operation.
    #[display("cache unavailable: {_0}")]
    Unavailable(#[error(not(source))] String),
    /// Version `0` only exists as an invalidation wildcard.
    #[display("version 0 cannot be used as a read key")]
    WildcardVersion,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
