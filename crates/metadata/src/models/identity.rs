use super::{ROOT_FOLDER, from_timestamp, version_from_column};
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FmtResult};
use time::OffsetDateTime;

/// The `(owner, folder, name)` triple naming one logical database across all
/// of its versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IdentityKey {
    pub owner: String,
    pub folder: String,
    pub name: String,
}
impl IdentityKey {
    /// Identity in the root folder.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            folder: ROOT_FOLDER.to_string(),
            name: name.into(),
        }
    }

    /// Key of the identity a fork of this one creates for `owner`: same name,
    /// root folder.
    pub fn fork_for(&self, owner: impl Into<String>) -> Self {
        Self::new(owner, self.name.clone())
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            owner: self.owner.clone(),
            folder: self.folder.clone(),
            name: name.into(),
        }
    }
}
impl Display for IdentityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        // Folders always start and end with a slash: "alice/sales.db", "alice/reports/q3.db".
        write!(f, "{}{}{}", self.owner, self.folder, self.name)
    }
}

/// Where a forked identity was copied from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lineage {
    #[serde(flatten)]
    pub source: IdentityKey,
    pub version: u32,
}

/// An identity together with its access policy and display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    #[serde(flatten)]
    pub key: IdentityKey,
    pub public: bool,
    pub description: String,
    pub readme: String,
    pub default_table: Option<String>,
    pub forked_from: Option<Lineage>,
    pub stars: u64,
    /// Zero only for an identity created by [`put`](crate::Repository::put)
    /// that never got a version committed.
    pub highest_version: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Editable metadata of an identity. Saving never touches versions or blobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub description: String,
    pub readme: String,
    pub default_table: Option<String>,
    pub public: bool,
    /// Rename the identity when different from the current name.
    pub new_name: Option<String>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct IdentityRow {
    #[allow(dead_code)]
    id: i64,
    owner: String,
    folder: String,
    name: String,
    public: bool,
    description: String,
    readme: String,
    default_table: Option<String>,
    forked_from_owner: Option<String>,
    forked_from_folder: Option<String>,
    forked_from_name: Option<String>,
    forked_from_version: Option<i64>,
    created_at: i64,
    updated_at: i64,
    stars: i64,
    highest_version: i64,
}
impl TryFrom<IdentityRow> for Identity {
    type Error = Error;
    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        let forked_from = match (row.forked_from_owner, row.forked_from_folder, row.forked_from_name, row.forked_from_version) {
            (Some(owner), Some(folder), Some(name), Some(version)) => Some(Lineage {
                source: IdentityKey { owner, folder, name },
                version: version_from_column(version)?,
            }),
            (None, None, None, None) => None,
            _ => exn::bail!(ErrorKind::InvalidData("partial fork lineage")),
        };
        Ok(Self {
            key: IdentityKey {
                owner: row.owner,
                folder: row.folder,
                name: row.name,
            },
            public: row.public,
            description: row.description,
            readme: row.readme,
            default_table: row.default_table,
            forked_from,
            stars: u64::try_from(row.stars).or_raise(|| ErrorKind::InvalidData("star count"))?,
            highest_version: version_from_column(row.highest_version)?,
            created_at: from_timestamp(row.created_at, "created at")?,
            updated_at: from_timestamp(row.updated_at, "updated at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> IdentityRow {
        IdentityRow {
            id: 1,
            owner: "alice".to_string(),
            folder: "/".to_string(),
            name: "sales.db".to_string(),
            public: true,
            description: "Quarterly sales".to_string(),
            readme: String::new(),
            default_table: Some("orders".to_string()),
            forked_from_owner: None,
            forked_from_folder: None,
            forked_from_name: None,
            forked_from_version: None,
            created_at: 1_700_000_000,
            updated_at: 1_700_000_100,
            stars: 3,
            highest_version: 2,
        }
    }

    #[test]
    fn test_display_key() {
        assert_eq!(IdentityKey::new("alice", "sales.db").to_string(), "alice/sales.db");
    }

    #[test]
    fn test_row_to_model() {
        let identity = Identity::try_from(row()).unwrap();
        assert_eq!(identity.key, IdentityKey::new("alice", "sales.db"));
        assert_eq!(identity.stars, 3);
        assert_eq!(identity.highest_version, 2);
        assert!(identity.forked_from.is_none());
        assert_eq!(identity.created_at.unix_timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_row_with_lineage() {
        let mut row = row();
        row.forked_from_owner = Some("bob".to_string());
        row.forked_from_folder = Some("/".to_string());
        row.forked_from_name = Some("sales.db".to_string());
        row.forked_from_version = Some(7);
        let lineage = Identity::try_from(row).unwrap().forked_from.unwrap();
        assert_eq!(lineage.source, IdentityKey::new("bob", "sales.db"));
        assert_eq!(lineage.version, 7);
    }

    #[test]
    fn test_partial_lineage_is_invalid() {
        let mut row = row();
        row.forked_from_owner = Some("bob".to_string());
        let err = Identity::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(_)));
    }

    #[test]
    fn test_negative_stars_are_invalid() {
        let mut row = row();
        row.stars = -1;
        assert!(Identity::try_from(row).is_err());
    }
}
