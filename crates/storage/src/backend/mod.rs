//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for blob operations across different backends (local filesystem,
//! S3-compatible services, in-memory for tests).

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::Result;
use crate::models::ObjectInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::io::Read;
use std::pin::Pin;

pub(crate) type ObjectInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<ObjectInfo>> + Send + 'a>>;
pub type BoxSyncRead = Box<dyn Read + Send + 'static>;

/// Unified interface for blob storage backends.
///
/// Objects are immutable once stored: nothing in this interface appends to or
/// patches an object, a new version of a database is always a new object.
///
/// # Addressing
/// Every object is addressed by a `(bucket, id)` pair. Both halves must be a
/// single path segment, see [`object_path`](crate::object_path).
/// Implementations must reject anything else with
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use sqlhub_storage::{backend::StorageBackend, error::Result};
///
/// async fn size_of(backend: &dyn StorageBackend, bucket: &str, id: &str) -> Result<u64> {
///     if backend.exists(bucket, id).await? {
///         let data = backend.read(bucket, id).await?;
///         Ok(data.len() as u64)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend. Used for logging only.
    fn name(&self) -> &str;

    /// List every object in a bucket.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, bucket: &str) -> Result<Vec<ObjectInfo>> {
        self.list_stream(bucket).try_collect().await
    }

    /// Stream object metadata for a bucket.
    ///
    /// A bucket that has never been written to is an empty stream, not an
    /// error.
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// # use sqlhub_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream("3f9a01bc2d4e5f60");
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{}: {} bytes", info.id, info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, bucket: &'a str) -> ObjectInfoStream<'a>;

    /// Check if an object exists.
    async fn exists(&self, bucket: &str, id: &str) -> Result<bool>;

    /// Store an object, overwriting any object already at `(bucket, id)`.
    ///
    /// Returns the number of bytes written. Callers are expected to have
    /// reserved the id beforehand; the backend itself doesn't arbitrate.
    ///
    /// ```no_run
    /// # use sqlhub_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let bytes = std::fs::read("/tmp/inventory.sqlite").unwrap();
    /// backend.store("3f9a01bc2d4e5f60", "a1B2c3D4.db", &bytes, "application/x-sqlite3").await?;
    /// # Ok(())
    /// # }
    /// ```
    async fn store(&self, bucket: &str, id: &str, data: &[u8], content_type: &str) -> Result<u64>;

    /// Read object contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn read(&self, bucket: &str, id: &str) -> Result<Vec<u8>>;

    /// Open an object for streaming reads.
    ///
    /// Returns a `'static` boxed [`Read`](std::io::Read) suitable for use
    /// inside [`spawn_blocking`](tokio::task::spawn_blocking). The async
    /// setup (opening the file/connection) happens before returning.
    ///
    /// ```no_run
    /// # use sqlhub_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut reader = backend.reader("3f9a01bc2d4e5f60", "a1B2c3D4.db").await?;
    /// let copied = tokio::task::spawn_blocking(move || {
    ///     let mut file = std::fs::File::create("/tmp/copy.sqlite").unwrap();
    ///     std::io::copy(&mut reader, &mut file).unwrap()
    /// }).await.unwrap();
    /// # Ok(())
    /// # }
    /// ```
    async fn reader(&self, bucket: &str, id: &str) -> Result<BoxSyncRead>;

    /// Server-side copy of an object to a new location.
    ///
    /// The destination is a distinct object: later changes to either copy
    /// never show through in the other. Returns the number of bytes copied.
    ///
    /// The default implementation reads the whole source into memory and
    /// stores it again. Backends with a native copy should override it.
    async fn copy(&self, src_bucket: &str, src_id: &str, dest_bucket: &str, dest_id: &str) -> Result<u64> {
        let data = self.read(src_bucket, src_id).await?;
        self.store(dest_bucket, dest_id, &data, "application/octet-stream").await
    }
}
