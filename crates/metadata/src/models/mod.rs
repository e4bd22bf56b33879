mod identity;
mod version;

pub use self::identity::{Identity, IdentityKey, Lineage, Settings};
pub(crate) use self::identity::IdentityRow;
pub use self::version::{BlobRef, NewVersion, VersionRecord};
pub(crate) use self::version::VersionRow;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use time::OffsetDateTime;

/// Folder of every identity until folders are more than a reserved segment.
pub const ROOT_FOLDER: &str = "/";

pub(crate) fn from_timestamp(timestamp: i64, field: &'static str) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(timestamp).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn version_from_column(version: i64) -> Result<u32> {
    u32::try_from(version).or_raise(|| ErrorKind::InvalidData("version"))
}
