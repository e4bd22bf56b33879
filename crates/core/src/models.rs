use crate::table::RecordSet;
use serde::{Deserialize, Serialize};
use sqlhub_metadata::{BlobRef, IdentityKey};

pub const DEFAULT_CONTENT_TYPE: &str = "application/x-sqlite3";

/// A database file to store as the next version of `owner/name`.
#[derive(Debug, Clone)]
pub struct Upload {
    pub owner: String,
    pub name: String,
    pub data: Vec<u8>,
    pub public: bool,
    /// Short description, shown in listings. Empty keeps the current one.
    pub description: String,
    /// Full description. Empty keeps the current one.
    pub readme: String,
    /// Defaults to [`DEFAULT_CONTENT_TYPE`].
    pub content_type: Option<String>,
}
impl Upload {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            data: data.into(),
            public: false,
            description: String::new(),
            readme: String::new(),
            content_type: None,
        }
    }

    pub fn public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn readme(mut self, readme: impl Into<String>) -> Self {
        self.readme = readme.into();
        self
    }
}

/// The new identity a fork created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Forked {
    #[serde(flatten)]
    pub key: IdentityKey,
    pub version: u32,
    pub blob: BlobRef,
}

/// A request to view one page of one table.
///
/// Everything here (apart from `version: None` and `row_cap`, which are
/// resolved first) ends up in the cache fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRequest {
    pub viewer: Option<String>,
    pub owner: String,
    pub name: String,
    /// `None` (or `0`) is the highest version.
    pub version: Option<u32>,
    /// `None` (or empty) is the identity's default table, else the first one.
    pub table: Option<String>,
    pub sort_column: String,
    /// `ASC`, `DESC` (any case) or empty.
    pub sort_direction: String,
    pub offset: u64,
    pub row_cap: Option<u32>,
}
impl TableRequest {
    pub fn new(viewer: Option<&str>, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            viewer: viewer.map(str::to_string),
            owner: owner.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A rendered page of a table, as cached.
///
/// Carries the identity details a page shows next to the rows (the star
/// count among them), which is why stars invalidate the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableView {
    pub owner: String,
    pub folder: String,
    pub name: String,
    pub version: u32,
    pub highest_version: u32,
    pub public: bool,
    pub stars: u64,
    pub description: String,
    pub tables: Vec<String>,
    pub row_cap: u32,
    pub records: RecordSet,
}
