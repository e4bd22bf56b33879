//! Core Error Types
//!
//! Errors from the storage, metadata and cache crates are folded into the
//! categories below before they leave this crate. The underlying error stays
//! attached as a child of the [`exn::Exn`] tree for logging.

use derive_more::{Display, Error};

/// A core error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong, from the point of view of whoever made the request.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Identity, version or table doesn't exist.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Denied by the access guard. Says nothing about whether the target exists.
    #[display("access denied")]
    Forbidden,
    #[display("version already exists: {_0} v{_1}")]
    DuplicateVersion(#[error(not(source))] String, u32),
    #[display("name already taken: {_0}")]
    NameCollision(#[error(not(source))] String),
    #[display("cannot fork a database into its own owner")]
    SameOwner,
    /// Blob or metadata store failed or timed out.
    #[display("{_0} unavailable")]
    UpstreamUnavailable(#[error(not(source))] &'static str),
    #[display("invalid name: {_0}")]
    InvalidName(#[error(not(source))] String),
    #[display("invalid input: {_0}")]
    InvalidInput(#[error(not(source))] String),
    /// The bytes aren't a readable SQLite database with at least one table.
    #[display("invalid database: {_0}")]
    InvalidDatabase(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }

    /// Whether the request itself was at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::UpstreamUnavailable(_))
    }

    /// HTTP status a front-end should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidName(_) | Self::InvalidInput(_) | Self::InvalidDatabase(_) => 400,
            Self::Forbidden => 403,
            Self::NotFound(_) => 404,
            Self::DuplicateVersion(..) | Self::NameCollision(_) | Self::SameOwner => 409,
            Self::UpstreamUnavailable(_) => 503,
        }
    }

    /// Message that is safe to show the requester.
    pub fn public_message(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        } else {
            "the service is temporarily unavailable, please try again later".to_string()
        }
    }
}

/// Fold a metadata store error into a core error, keeping it as the cause.
#[track_caller]
pub(crate) fn from_metadata(err: sqlhub_metadata::error::Error) -> Error {
    use sqlhub_metadata::error::ErrorKind as MetadataErrorKind;
    let kind = match &*err {
        MetadataErrorKind::IdentityNotFound(key) => ErrorKind::NotFound(key.clone()),
        MetadataErrorKind::VersionNotFound(key, version) => ErrorKind::NotFound(format!("{key} v{version}")),
        MetadataErrorKind::DuplicateVersion(key, version) => ErrorKind::DuplicateVersion(key.clone(), *version),
        MetadataErrorKind::NameCollision(key) => ErrorKind::NameCollision(key.clone()),
        MetadataErrorKind::ObjectCollision(..)
        | MetadataErrorKind::Database
        | MetadataErrorKind::Migration
        | MetadataErrorKind::Directory(_)
        | MetadataErrorKind::InvalidData(_) => ErrorKind::UpstreamUnavailable("metadata store"),
    };
    err.raise(kind)
}

/// Fold a blob store error into a core error, keeping it as the cause.
#[track_caller]
pub(crate) fn from_storage(err: sqlhub_storage::error::Error) -> Error {
    use sqlhub_storage::error::ErrorKind as StorageErrorKind;
    let kind = match &*err {
        // A committed version whose blob is gone is a broken store, not a bad request.
        StorageErrorKind::NotFound(_)
        | StorageErrorKind::PermissionDenied(_)
        | StorageErrorKind::AlreadyExists(_)
        | StorageErrorKind::Io(_)
        | StorageErrorKind::Network(_)
        | StorageErrorKind::InvalidPath(_)
        | StorageErrorKind::BackendError(_) => ErrorKind::UpstreamUnavailable("blob store"),
    };
    err.raise(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::NotFound("alice/sales.db".into()), 404)]
    #[case(ErrorKind::Forbidden, 403)]
    #[case(ErrorKind::DuplicateVersion("alice/sales.db".into(), 2), 409)]
    #[case(ErrorKind::NameCollision("bob/sales.db".into()), 409)]
    #[case(ErrorKind::SameOwner, 409)]
    #[case(ErrorKind::InvalidName(".hidden".into()), 400)]
    #[case(ErrorKind::InvalidInput("empty upload".into()), 400)]
    #[case(ErrorKind::InvalidDatabase("no tables".into()), 400)]
    fn test_client_errors(#[case] kind: ErrorKind, #[case] status: u16) {
        assert!(kind.is_client_error());
        assert!(!kind.is_retryable());
        assert_eq!(kind.status_code(), status);
        assert_eq!(kind.public_message(), kind.to_string());
    }

    #[test]
    fn test_upstream_detail_is_not_public() {
        let kind = ErrorKind::UpstreamUnavailable("metadata store");
        assert!(!kind.is_client_error());
        assert!(kind.is_retryable());
        assert_eq!(kind.status_code(), 503);
        assert!(!kind.public_message().contains("metadata"));
    }

    #[test]
    fn test_forbidden_leaks_nothing() {
        assert_eq!(ErrorKind::Forbidden.public_message(), "access denied");
    }

    #[test]
    fn test_from_metadata() {
        use sqlhub_metadata::error::ErrorKind as MetadataErrorKind;
        let err = from_metadata(exn::Exn::from(MetadataErrorKind::VersionNotFound("alice/db".into(), 3)));
        assert!(matches!(&*err, ErrorKind::NotFound(what) if what == "alice/db v3"));
        let err = from_metadata(exn::Exn::from(MetadataErrorKind::Database));
        assert!(err.is_retryable());
    }
}
