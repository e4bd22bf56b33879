//! Blob storage for uploaded database files.
//!
//! Objects are addressed by a `(bucket, id)` pair. A bucket is a storage
//! partition scoped to a single owner, and an id is an opaque token that is
//! unique within its bucket. This crate doesn't generate ids or decide which
//! bucket belongs to whom; it only moves bytes around.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::ObjectInfo;
pub use crate::path::{object_path, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
