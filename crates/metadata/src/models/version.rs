use super::{IdentityKey, from_timestamp, version_from_column};
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use serde::Serialize;
use time::OffsetDateTime;

/// Where the bytes of one version live, plus what they looked like when they
/// were stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobRef {
    pub bucket: String,
    pub object_id: String,
    pub size: u64,
    /// Hex content digest, computed once at upload time. Advisory only.
    pub digest: String,
}

/// A row of the Blob Locator Table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    #[serde(flatten)]
    pub key: IdentityKey,
    pub version: u32,
    pub blob: BlobRef,
    pub content_type: String,
    /// Note attached to this particular upload.
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Everything needed to commit an upload.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub key: IdentityKey,
    pub public: bool,
    pub description: String,
    pub readme: String,
    pub blob: BlobRef,
    pub content_type: String,
}

#[derive(sqlx::FromRow)]
pub(crate) struct VersionRow {
    owner: String,
    folder: String,
    name: String,
    version: i64,
    bucket: String,
    object_id: String,
    size: i64,
    digest: String,
    content_type: String,
    description: String,
    created_at: i64,
}
impl TryFrom<VersionRow> for VersionRecord {
    type Error = Error;
    fn try_from(row: VersionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            key: IdentityKey {
                owner: row.owner,
                folder: row.folder,
                name: row.name,
            },
            version: version_from_column(row.version)?,
            blob: BlobRef {
                bucket: row.bucket,
                object_id: row.object_id,
                size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("object size"))?,
                digest: row.digest,
            },
            content_type: row.content_type,
            description: row.description,
            created_at: from_timestamp(row.created_at, "created at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_to_model() {
        let row = VersionRow {
            owner: "alice".to_string(),
            folder: "/".to_string(),
            name: "sales.db".to_string(),
            version: 3,
            bucket: "2bd806c97f0e00af".to_string(),
            object_id: "Xq3k9LmZ.db".to_string(),
            size: 8192,
            digest: "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262".to_string(),
            content_type: "application/x-sqlite3".to_string(),
            description: "March figures".to_string(),
            created_at: 1_700_000_000,
        };
        let record = VersionRecord::try_from(row).unwrap();
        assert_eq!(record.version, 3);
        assert_eq!(record.blob.size, 8192);
        assert_eq!(record.key.to_string(), "alice/sales.db");
    }

    #[test]
    fn test_negative_version_is_invalid() {
        let row = VersionRow {
            owner: "alice".to_string(),
            folder: "/".to_string(),
            name: "sales.db".to_string(),
            version: -1,
            bucket: "b".to_string(),
            object_id: "o.db".to_string(),
            size: 1,
            digest: String::new(),
            content_type: String::new(),
            description: String::new(),
            created_at: 0,
        };
        let err = VersionRecord::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("version")));
    }
}
