//! In-process cache implementations.

use crate::error::Result;
use crate::{Fingerprint, ResultCache, Scope};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry {
    expires: Instant,
    value: Vec<u8>,
}

/// Bounded in-memory cache with per-entry TTL.
///
/// Expired entries are dropped lazily, on lookup and whenever the cache is
/// full. When still full after that, the entry closest to expiry makes room.
///
/// ```
/// use sqlhub_cache::{MemoryCache, ResultCache, Scope, ViewKey};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = MemoryCache::new(1000);
/// let key = ViewKey {
///     viewer: None, owner: "alice", folder: "/", name: "sales.db", version: 1,
///     table: "orders", sort_column: "", sort_direction: "", offset: 0, row_cap: 10,
/// }.fingerprint()?;
/// cache.set(&key, b"[]".to_vec(), Duration::from_secs(60)).await?;
/// assert!(cache.get(&key).await?.is_some());
///
/// cache.invalidate(&Scope::new("alice", "/", "sales.db"), 0).await?;
/// assert!(cache.get(&key).await?.is_none());
/// # Ok(())
/// # }
/// ```
pub struct MemoryCache {
    max_entries: usize,
    entries: RwLock<HashMap<Fingerprint, Entry>>,
}
impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of entries held, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        {
            let guard = self.entries.read().await;
            match guard.get(key) {
                Some(entry) if entry.expires > now => return Ok(Some(entry.value.clone())),
                Some(_) => {},
                None => return Ok(None),
            }
        }
        // Expired: take the write lock and drop it, unless it was refreshed meanwhile.
        let mut guard = self.entries.write().await;
        if guard.get(key).is_some_and(|entry| entry.expires <= now) {
            guard.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &Fingerprint, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut guard = self.entries.write().await;
        if guard.len() >= self.max_entries && !guard.contains_key(key) {
            guard.retain(|_, entry| entry.expires > now);
            if guard.len() >= self.max_entries {
                let soonest = guard.iter().min_by_key(|(_, entry)| entry.expires).map(|(k, _)| k.clone());
                if let Some(evicted) = soonest {
                    guard.remove(&evicted);
                }
            }
        }
        guard.insert(key.clone(), Entry { expires: now + ttl, value });
        Ok(())
    }

    async fn invalidate(&self, scope: &Scope, version: u32) -> Result<u64> {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|key, _| !key.matches(scope, version));
        let removed = (before - guard.len()) as u64;
        tracing::trace!(owner = %scope.owner, name = %scope.name, version, removed, "cache invalidated");
        Ok(removed)
    }
}

/// A cache that never holds anything. Used when caching is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCache;

#[async_trait]
impl ResultCache for DisabledCache {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn get(&self, _key: &Fingerprint) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &Fingerprint, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn invalidate(&self, _scope: &Scope, _version: u32) -> Result<u64> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ViewKey;

    const TTL: Duration = Duration::from_secs(60);

    fn key(owner: &str, name: &str, version: u32, offset: u64) -> Fingerprint {
        ViewKey {
            viewer: Some("bob"),
            owner,
            folder: "/",
            name,
            version,
            table: "t",
            sort_column: "",
            sort_direction: "",
            offset,
            row_cap: 10,
        }
        .fingerprint()
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_miss_is_not_an_error() {
        let cache = MemoryCache::new(10);
        assert_eq!(cache.get(&key("alice", "db", 1, 0)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = MemoryCache::new(10);
        let key = key("alice", "db", 1, 0);
        cache.set(&key, b"value".to_vec(), TTL).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some(&b"value"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = MemoryCache::new(10);
        let key = key("alice", "db", 1, 0);
        cache.set(&key, b"value".to_vec(), TTL).await.unwrap();
        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        assert!(cache.get(&key).await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key).await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_all_versions() {
        let cache = MemoryCache::new(10);
        let v1 = key("alice", "db", 1, 0);
        let v2 = key("alice", "db", 2, 20);
        let other = key("alice", "other", 1, 0);
        for k in [&v1, &v2, &other] {
            cache.set(k, b"value".to_vec(), TTL).await.unwrap();
        }
        let removed = cache.invalidate(&Scope::new("alice", "/", "db"), 0).await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get(&v1).await.unwrap().is_none());
        assert!(cache.get(&v2).await.unwrap().is_none());
        assert!(cache.get(&other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalidate_single_version() {
        let cache = MemoryCache::new(10);
        let v1 = key("alice", "db", 1, 0);
        let v2 = key("alice", "db", 2, 0);
        cache.set(&v1, b"one".to_vec(), TTL).await.unwrap();
        cache.set(&v2, b"two".to_vec(), TTL).await.unwrap();
        assert_eq!(cache.invalidate(&Scope::new("alice", "/", "db"), 1).await.unwrap(), 1);
        assert!(cache.get(&v1).await.unwrap().is_none());
        assert!(cache.get(&v2).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_evicts_soonest_expiry() {
        let cache = MemoryCache::new(2);
        let short = key("alice", "db", 1, 0);
        let long = key("alice", "db", 1, 10);
        let new = key("alice", "db", 1, 20);
        cache.set(&short, b"short".to_vec(), Duration::from_secs(10)).await.unwrap();
        cache.set(&long, b"long".to_vec(), Duration::from_secs(100)).await.unwrap();
        cache.set(&new, b"new".to_vec(), TTL).await.unwrap();
        assert_eq!(cache.len().await, 2);
        assert!(cache.get(&short).await.unwrap().is_none());
        assert!(cache.get(&long).await.unwrap().is_some());
        assert!(cache.get(&new).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disabled_cache_always_misses() {
        let cache = DisabledCache;
        let key = key("alice", "db", 1, 0);
        cache.set(&key, b"value".to_vec(), TTL).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
    }
}
