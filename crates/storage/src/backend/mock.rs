//! In-memory storage backend for testing.

use super::{BoxSyncRead, ObjectInfoStream};
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::ObjectInfo;
use crate::path::object_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use time::UtcDateTime;
use tokio::sync::RwLock;

type Key = (String, String);

struct Stored {
    inserted: UtcDateTime,
    content_type: String,
    data: Vec<u8>,
}

/// In-memory storage backend for testing.
///
/// Objects are stored in a `HashMap` behind a [`RwLock`], so all trait
/// methods can operate on `&self` without external synchronisation.
///
/// # Examples
///
/// ```
/// use sqlhub_storage::backend::{MockBackend, StorageBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_objects([
///     ("alice", "a1B2c3D4.db", b"SQLite format 3\0"),
/// ]);
/// assert!(backend.exists("alice", "a1B2c3D4.db").await?);
///
/// backend.store("bob", "e5F6g7H8.db", b"data...", "application/x-sqlite3").await?;
/// assert!(backend.exists("bob", "e5F6g7H8.db").await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<Key, Stored>>,
    unavailable: AtomicBool,
}

impl MockBackend {
    /// Create a mock backend pre-populated with objects.
    ///
    /// Panics if any bucket or id fails validation. If test setup is wrong,
    /// then test should not pass.
    pub fn with_objects(
        objects: impl IntoIterator<Item = (impl Into<String>, impl Into<String>, impl Into<Vec<u8>>)>,
    ) -> Self {
        let mut map = HashMap::new();
        let now = UtcDateTime::now();
        for (bucket, id, data) in objects {
            let (bucket, id) = (bucket.into(), id.into());
            if object_path(&bucket, &id).is_err() {
                panic!("MockBackend::with_objects: invalid path {bucket}/{id}");
            }
            let stored = Stored {
                inserted: now,
                content_type: String::new(),
                data: data.into(),
            };
            map.insert((bucket, id), stored);
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make every subsequent operation fail with a retryable
    /// [`Network`](ErrorKind::Network) error, or recover from it.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Content type the object was stored with, if it exists.
    pub async fn content_type(&self, bucket: &str, id: &str) -> Option<String> {
        let guard = self.storage.read().await;
        guard.get(&(bucket.to_string(), id.to_string())).map(|s| s.content_type.clone())
    }

    /// Total number of objects across all buckets.
    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check(&self, bucket: &str, id: &str) -> Result<Key> {
        if self.unavailable.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Network(format!("{} is unavailable", self.name)));
        }
        object_path(bucket, id)?;
        Ok((bucket.to_string(), id.to_string()))
    }

    fn not_found((bucket, id): &Key) -> ErrorKind {
        ErrorKind::NotFound([bucket.as_str(), id.as_str()].iter().collect())
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let objects: [(&str, &str, &[u8]); 0] = [];
        Self::with_objects(objects)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, bucket: &'a str) -> ObjectInfoStream<'a> {
        if let Err(e) = self.check(bucket, "_") {
            return Box::pin(futures::stream::once(async { Err(e) }));
        }

        Box::pin(stream! {
            // Snapshot under the read lock, then drop it before yielding to
            // avoid holding the lock across yield points.
            let entries: Vec<ObjectInfo> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|((b, _), _)| b == bucket)
                    .map(|((b, id), s)| ObjectInfo::new(b, id, s.data.len() as u64, s.inserted))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, bucket: &str, id: &str) -> Result<bool> {
        let key = self.check(bucket, id)?;
        Ok(self.storage.read().await.contains_key(&key))
    }

    async fn store(&self, bucket: &str, id: &str, data: &[u8], content_type: &str) -> Result<u64> {
        let key = self.check(bucket, id)?;
        let stored = Stored {
            inserted: UtcDateTime::now(),
            content_type: content_type.to_string(),
            data: data.to_vec(),
        };
        self.storage.write().await.insert(key, stored);
        Ok(data.len() as u64)
    }

    async fn read(&self, bucket: &str, id: &str) -> Result<Vec<u8>> {
        let key = self.check(bucket, id)?;
        let guard = self.storage.read().await;
        let stored = guard.get(&key).ok_or_else(|| exn::Exn::from(Self::not_found(&key)))?;
        Ok(stored.data.clone())
    }

    async fn reader(&self, bucket: &str, id: &str) -> Result<BoxSyncRead> {
        let data = self.read(bucket, id).await?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn copy(&self, src_bucket: &str, src_id: &str, dest_bucket: &str, dest_id: &str) -> Result<u64> {
        let from = self.check(src_bucket, src_id)?;
        let to = self.check(dest_bucket, dest_id)?;
        let mut guard = self.storage.write().await;
        let source = guard.get(&from).ok_or_else(|| exn::Exn::from(Self::not_found(&from)))?;
        let copied = Stored {
            inserted: UtcDateTime::now(),
            content_type: source.content_type.clone(),
            data: source.data.clone(),
        };
        let size = copied.data.len() as u64;
        guard.insert(to, copied);
        Ok(size)
    }
}
