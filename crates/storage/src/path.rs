//! Path validation and security utilities.
//!
//! This module provides functions to validate storage paths and prevent
//! security issues like path traversal attacks.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use sqlhub_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("3f9a01bc/a1B2c3D4.db").is_ok());
/// assert!(validate_path("a/../file.db").is_ok()); // (never leaves storage root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err()); // (leaves storage root)
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("wrong/../still-wrong/.././correct//./object.db/").unwrap(),
///     Path::new("correct/object.db")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    // Use Rust's built-in path component parser for robust handling. Means we
    // don't have to deal with non-UTF8, or the maniacs on Unix that use
    // backslashes in their filenames.
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls, reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Builds the relative storage path of an object: `{bucket}/{id}`.
///
/// Both the bucket and the id must be a single, plain path segment. Anything
/// that would nest, climb or otherwise reshape the path is rejected rather
/// than normalized, so that two different `(bucket, id)` pairs can never
/// resolve to the same object.
///
/// ```
/// use std::path::Path;
/// use sqlhub_storage::object_path;
/// assert_eq!(object_path("3f9a01bc", "a1B2c3D4.db").unwrap(), Path::new("3f9a01bc/a1B2c3D4.db"));
/// assert!(object_path("3f9a01bc", "../a1B2c3D4.db").is_err());
/// assert!(object_path("a/b", "a1B2c3D4.db").is_err());
/// ```
pub fn object_path(bucket: &str, id: &str) -> Result<PathBuf> {
    let path = PathBuf::from(bucket).join(id);
    if !is_segment(bucket) || !is_segment(id) {
        exn::bail!(ErrorKind::InvalidPath(path));
    }
    validate(path)
}

fn is_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && !s.contains(['/', '\\', '\0'])
        && Path::new(s).components().count() == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_valid_paths() {
        assert_eq!(validate(Path::new("bucket/object.db")).unwrap(), Path::new("bucket/object.db"));
        assert_eq!(validate(Path::new("a/b/c/file.db")).unwrap(), Path::new("a/b/c/file.db"));
        assert_eq!(validate(Path::new("simple.db")).unwrap(), Path::new("simple.db"));
    }

    #[test]
    fn test_path_normalization() {
        // Double slashes are normalized
        assert_eq!(validate(Path::new("a//b//c")).unwrap(), Path::new("a/b/c"));
        // Current directory references removed
        assert_eq!(validate(Path::new("a/./b/./c")).unwrap(), Path::new("a/b/c"));
    }

    #[test]
    fn test_traversal_attempts() {
        // Basic parent directory reference
        assert!(validate(Path::new("../etc/passwd")).is_err());
        // Traversal in the middle
        assert!(validate(Path::new("a/../../b")).is_err());
        // Only parent references
        assert!(validate(Path::new("..")).is_err());
        assert!(validate(Path::new("../..")).is_err());
    }

    #[test]
    fn test_invalid_characters() {
        assert!(validate(Path::new("a\0b")).is_err());
        assert!(validate(Path::new("\0")).is_err());
    }

    #[test]
    fn test_empty_paths() {
        assert!(validate(Path::new("")).is_err());
        assert!(validate(Path::new(".")).is_err());
        assert!(validate(Path::new("./")).is_err());
        assert!(validate(Path::new("//")).is_err());
    }

    #[test]
    fn test_object_path() {
        assert_eq!(object_path("bucket", "abc.db").unwrap(), Path::new("bucket/abc.db"));
    }

    #[rstest]
    #[case("", "abc.db")]
    #[case("bucket", "")]
    #[case("..", "abc.db")]
    #[case("bucket", "..")]
    #[case("bucket", ".")]
    #[case("a/b", "abc.db")]
    #[case("bucket", "x/abc.db")]
    #[case("bucket", "x\\abc.db")]
    #[case("bucket", "abc\0.db")]
    #[case("/bucket", "abc.db")]
    fn test_object_path_rejects_non_segments(#[case] bucket: &str, #[case] id: &str) {
        let err = object_path(bucket, id).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }
}
