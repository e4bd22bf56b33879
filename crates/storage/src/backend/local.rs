//! Local filesystem storage backend.
//!
//! Objects live at `{root}/{bucket}/{id}`, accessed via `tokio::fs` for async
//! I/O. Writes go to a temporary sibling first and are renamed into place, so
//! readers never observe a half-written object.

use crate::backend::{BoxSyncRead, ObjectInfoStream};
use crate::error::ErrorKind;
use crate::{ObjectInfo, StorageBackend, error::Result, path::object_path};
use async_stream::stream;
use async_trait::async_trait;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirEntry};

/// Local filesystem storage backend.
///
/// # Examples
///
/// ```no_run
/// use sqlhub_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/var/lib/sqlhub/objects")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory holding one sub-directory per bucket
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists but isn't a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Non-async; it only happens once at startup and it's not worth
            // making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    fn absolute_path(&self, bucket: &str, id: &str) -> Result<PathBuf> {
        Ok(self.root.join(object_path(bucket, id)?))
    }

    fn metadata(bucket: &str, id: &str, metadata: Metadata) -> Result<ObjectInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?;
        Ok(ObjectInfo::new(bucket, id, metadata.len(), modified))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Hidden sibling a write goes to before it's renamed into place. Creates
    /// the bucket directory on first use.
    async fn staging_path(&self, bucket: &str, id: &str) -> Result<(PathBuf, PathBuf)> {
        let abs_path = self.absolute_path(bucket, id)?;
        let dir = self.root.join(bucket);
        fs::create_dir_all(&dir).await.map_err(|e| Self::map_io_error(e, &dir))?;
        Ok((dir.join(format!(".{id}.partial")), abs_path))
    }

    async fn commit(staging: &Path, abs_path: &Path) -> Result<()> {
        if let Err(e) = fs::rename(staging, abs_path).await {
            let _ = fs::remove_file(staging).await;
            exn::bail!(Self::map_io_error(e, abs_path));
        }
        Ok(())
    }

    /// Pulled out of the stream loop so that `?` can be used.
    async fn process_entry(bucket: &str, entry: DirEntry) -> Result<Option<ObjectInfo>> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        if !metadata.is_file() {
            return Ok(None);
        }
        let Some(id) = entry.file_name().to_str().map(str::to_string) else {
            return Ok(None);
        };
        // In-flight writes.
        if id.starts_with('.') {
            return Ok(None);
        }
        Ok(Some(Self::metadata(bucket, &id, metadata)?))
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, bucket: &'a str) -> ObjectInfoStream<'a> {
        if let Err(e) = object_path(bucket, "_") {
            return Box::pin(futures::stream::once(async { Result::Err(e) }));
        }
        let dir = self.root.join(bucket);

        Box::pin(stream! {
            match fs::read_dir(&dir).await {
                Ok(mut entries) => loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &dir))); break; },
                    };
                    match Self::process_entry(bucket, entry).await {
                        Ok(Some(info)) => yield Ok(info),
                        Ok(None) => {},
                        Err(e) => yield Err(e),
                    }
                },
                // Consistent with S3: an unknown bucket is empty, not an error.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
                Err(err) => yield Err(exn::Exn::from(Self::map_io_error(err, &dir))),
            }
        })
    }

    async fn exists(&self, bucket: &str, id: &str) -> Result<bool> {
        let abs_path = self.absolute_path(bucket, id)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn store(&self, bucket: &str, id: &str, data: &[u8], _content_type: &str) -> Result<u64> {
        let (staging, abs_path) = self.staging_path(bucket, id).await?;
        fs::write(&staging, data).await.map_err(|e| Self::map_io_error(e, &staging))?;
        Self::commit(&staging, &abs_path).await?;
        tracing::debug!(backend = %self.name, bucket, id, bytes = data.len(), "stored object");
        Ok(data.len() as u64)
    }

    async fn read(&self, bucket: &str, id: &str) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(bucket, id)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, &abs_path))?)
    }

    async fn reader(&self, bucket: &str, id: &str) -> Result<BoxSyncRead> {
        let abs_path = self.absolute_path(bucket, id)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, &abs_path))?;
        Ok(Box::new(file.into_std().await))
    }

    async fn copy(&self, src_bucket: &str, src_id: &str, dest_bucket: &str, dest_id: &str) -> Result<u64> {
        let from = self.absolute_path(src_bucket, src_id)?;
        let (staging, to) = self.staging_path(dest_bucket, dest_id).await?;
        // A real copy, never a hard link: the two objects must stay independent.
        let copied = match fs::copy(&from, &staging).await {
            Ok(copied) => copied,
            Err(e) => {
                let _ = fs::remove_file(&staging).await;
                exn::bail!(Self::map_io_error(e, &from));
            },
        };
        Self::commit(&staging, &to).await?;
        tracing::debug!(backend = %self.name, src_bucket, src_id, dest_bucket, dest_id, bytes = copied, "copied object");
        Ok(copied)
    }
}
