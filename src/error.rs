//! Binary Error Types

use derive_more::{Display, Error};

/// A command-line error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for command-line operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not set up the blob store")]
    Storage,
    #[display("could not open the metadata store")]
    Metadata,
    /// The request was refused or failed; carries the message safe to show.
    #[display("{_0}")]
    Request(#[error(not(source))] String),
    #[display("{_0}")]
    Usage(#[error(not(source))] &'static str),
    #[display("could not read or write {_0}")]
    File(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Wrap a core error, keeping only its public message on top.
#[track_caller]
pub fn request(err: sqlhub_core::error::Error) -> Error {
    let message = err.public_message();
    err.raise(ErrorKind::Request(message))
}
