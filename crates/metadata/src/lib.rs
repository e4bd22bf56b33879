//! SQLite metadata store.
//!
//! Unlike a cache, this database **is** the source of truth for which
//! versions exist and where their bytes live. Losing it loses the mapping from
//! identities to blobs; the blobs themselves are opaque ids.
//!
//! # Architecture
//! - **Identities**: one row per `(owner, folder, name)`, holding the access
//!   policy (`public`), display metadata and fork lineage.
//! - **Versions**: the Blob Locator Table. Append-only; version numbers are
//!   allocated by the same statement that records them, so concurrent
//!   uploads to one identity can't be handed the same number.
//! - **Object reservations**: ids handed out to in-flight uploads and forks,
//!   so that two writers never pick the same id within a bucket.
//! - **Stars**: one row per `(identity, viewer)`.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{BlobRef, Identity, IdentityKey, Lineage, NewVersion, ROOT_FOLDER, Settings, VersionRecord};
pub use crate::repo::Repository;
