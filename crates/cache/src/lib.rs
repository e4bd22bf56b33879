//! Result cache for derived views of stored databases.
//!
//! Rendering a page of a table means fetching a blob, opening it and running a
//! query; the result is cached under a [`Fingerprint`] of everything that went
//! into it, *including the viewer*. Entries are never shared between viewers.
//!
//! The cache is not a source of truth. Every operation may fail, and callers
//! are expected to log the failure and carry on as if it were a miss.

pub mod error;
mod fingerprint;
mod memory;

pub use crate::fingerprint::{Fingerprint, Scope, ViewKey};
pub use crate::memory::{DisabledCache, MemoryCache};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub type CacheHandle = Arc<dyn ResultCache + Send + Sync>;

/// Key/value cache service with per-entry time-to-live.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Name of the cache implementation, for logging.
    fn name(&self) -> &str;

    /// Look up a cached value. A miss is `Ok(None)`, never an error.
    async fn get(&self, key: &Fingerprint) -> Result<Option<Vec<u8>>>;

    /// Store a value for at most `ttl`.
    async fn set(&self, key: &Fingerprint, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Remove every entry of `scope` for `version`, or for all versions when
    /// `version` is `0`. Returns how many entries were removed.
    async fn invalidate(&self, scope: &Scope, version: u32) -> Result<u64>;
}
