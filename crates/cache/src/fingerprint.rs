//! Cache key construction.

use crate::error::{ErrorKind, Result};
use std::fmt::{Display, Formatter, Result as FmtResult};

const DOMAIN: &str = "sqlhub.view.v1";

/// The identity a cache entry belongs to: `(owner, folder, name)`.
///
/// Invalidation works at this granularity, so it's kept in the clear next to
/// the digest rather than hashed away.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub owner: String,
    pub folder: String,
    pub name: String,
}
impl Scope {
    pub fn new(owner: impl Into<String>, folder: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            folder: folder.into(),
            name: name.into(),
        }
    }
}

/// Everything a cached table view depends on.
///
/// `viewer` is `None` for anonymous viewers, which is a different key from
/// every named viewer (including one whose name is the empty string).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewKey<'a> {
    pub viewer: Option<&'a str>,
    pub owner: &'a str,
    pub folder: &'a str,
    pub name: &'a str,
    pub version: u32,
    pub table: &'a str,
    pub sort_column: &'a str,
    pub sort_direction: &'a str,
    pub offset: u64,
    pub row_cap: u32,
}
impl ViewKey<'_> {
    /// Deterministic fingerprint of the view.
    ///
    /// Every field is fed to one hasher, tagged and length-prefixed, so that
    /// no two different inputs share an encoding: `("ab", "c")` and
    /// `("a", "bc")` hash differently. Fails for version `0`, which is only
    /// meaningful as an invalidation wildcard.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        if self.version == 0 {
            exn::bail!(ErrorKind::WildcardVersion);
        }
        let mut hasher = blake3::Hasher::new();
        write_str(&mut hasher, DOMAIN);
        match self.viewer {
            None => hasher.update(&[0]),
            Some(viewer) => {
                hasher.update(&[1]);
                write_str(&mut hasher, viewer)
            },
        };
        write_str(&mut hasher, self.owner);
        write_str(&mut hasher, self.folder);
        write_str(&mut hasher, self.name);
        hasher.update(&self.version.to_le_bytes());
        write_str(&mut hasher, self.table);
        write_str(&mut hasher, self.sort_column);
        write_str(&mut hasher, self.sort_direction);
        hasher.update(&self.offset.to_le_bytes());
        hasher.update(&self.row_cap.to_le_bytes());
        Ok(Fingerprint {
            scope: Scope::new(self.owner, self.folder, self.name),
            version: self.version,
            digest: *hasher.finalize().as_bytes(),
        })
    }
}

fn write_str<'h>(hasher: &'h mut blake3::Hasher, value: &str) -> &'h mut blake3::Hasher {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes())
}

/// Cache key of one derived view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    scope: Scope,
    version: u32,
    digest: [u8; 32],
}
impl Fingerprint {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Always a concrete version, never `0`.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Whether an invalidation of `(scope, version)` covers this key.
    pub fn matches(&self, scope: &Scope, version: u32) -> bool {
        &self.scope == scope && (version == 0 || version == self.version)
    }
}
impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for byte in &self.digest {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
