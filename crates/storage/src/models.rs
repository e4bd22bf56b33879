//! Storage models.

use time::OffsetDateTime;

/// Object metadata returned by storage backends.
///
/// Used for listing a bucket. Content digests live in the metadata store,
/// not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Storage partition (one per owner)
    pub bucket: String,
    /// Object id, unique within the bucket
    pub id: String,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl ObjectInfo {
    pub fn new(bucket: impl Into<String>, id: impl Into<String>, size: u64, modified: impl Into<OffsetDateTime>) -> Self {
        Self {
            bucket: bucket.into(),
            id: id.into(),
            size,
            modified: modified.into(),
        }
    }
}
