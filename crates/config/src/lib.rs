//! Configuration for sqlhub.
//!
//! Values are layered: built-in defaults, then an optional file (TOML, YAML
//! or JSON, chosen by extension), then environment variables prefixed with
//! `SQLHUB_`. Nested keys are separated by a double underscore, so
//! `SQLHUB_STORAGE__ROOT=/srv/sqlhub` sets `storage.root`.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "SQLHUB_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub metadata: MetadataConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub limits: Limits,
}

impl Config {
    /// Load configuration from defaults, the given file (or the default
    /// location when `None`), and the environment.
    ///
    /// An explicitly given file must exist. The default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match path {
            Some(path) if !path.is_file() => {
                exn::bail!(ErrorKind::Load(format!("{} does not exist", path.display())));
            },
            Some(path) => figment = merge_file(figment, path)?,
            None => {
                if let Some(path) = Self::default_path().filter(|p| p.is_file()) {
                    tracing::debug!(path = %path.display(), "using default configuration file");
                    figment = merge_file(figment, &path)?;
                }
            },
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate a configuration from an already-assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().map_err(|e| ErrorKind::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// `config.toml` in the platform's configuration directory.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.metadata.path.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("metadata.path must not be empty".into()));
        }
        self.storage.validate()?;
        self.cache.validate()?;
        self.limits.validate()
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "sqlhub")
}

fn data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/var/lib/sqlhub"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// SQLite database file holding identities, versions and stars.
    pub path: PathBuf,
}
impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("metadata.sqlite"),
        }
    }
}

/// Where uploaded database files live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Local {
        root: PathBuf,
    },
    S3 {
        bucket: String,
        /// Key prefix inside the bucket. Owner buckets are nested below it.
        #[serde(default)]
        prefix: Option<String>,
        region: String,
        /// Custom endpoint for S3-compatible services.
        #[serde(default)]
        endpoint: Option<String>,
        key_id: String,
        key_secret: String,
    },
}
impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local {
            root: data_dir().join("objects"),
        }
    }
}
impl StorageConfig {
    fn validate(&self) -> Result<()> {
        match self {
            Self::Local { root } if !root.is_absolute() => {
                exn::bail!(ErrorKind::Invalid(format!(
                    "storage.root must be an absolute path, got {}",
                    root.display()
                )));
            },
            Self::Local { .. } => Ok(()),
            Self::S3 { bucket, region, .. } => {
                if bucket.is_empty() {
                    exn::bail!(ErrorKind::Invalid("storage.bucket must not be empty".into()));
                }
                if region.is_empty() {
                    exn::bail!(ErrorKind::Invalid("storage.region must not be empty".into()));
                }
                Ok(())
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            max_entries: 10_000,
        }
    }
}
impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.enabled && self.ttl_secs == 0 {
            exn::bail!(ErrorKind::Invalid("cache.ttl_secs must be greater than zero".into()));
        }
        if self.enabled && self.max_entries == 0 {
            exn::bail!(ErrorKind::Invalid("cache.max_entries must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Request limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Rows per table page when the caller doesn't ask for a number.
    pub default_rows: u32,
    pub max_rows: u32,
    /// Maximum length of a short description, in characters.
    pub max_description: usize,
    /// Upper bound for any single blob or metadata operation.
    pub timeout_secs: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            default_rows: 10,
            max_rows: 500,
            max_description: 80,
            timeout_secs: 30,
        }
    }
}
impl Limits {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Clamp a requested row cap into `1..=max_rows`, using `default_rows`
    /// when absent.
    /// Limits that fail validation still yield at least one row.
    pub fn row_cap(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default_rows).min(self.max_rows).max(1)
    }

    fn validate(&self) -> Result<()> {
        if self.default_rows == 0 || self.max_rows == 0 {
            exn::bail!(ErrorKind::Invalid("row limits must be greater than zero".into()));
        }
        if self.default_rows > self.max_rows {
            exn::bail!(ErrorKind::Invalid(format!(
                "limits.default_rows ({}) exceeds limits.max_rows ({})",
                self.default_rows, self.max_rows
            )));
        }
        if self.timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("limits.timeout_secs must be greater than zero".into()));
        }
        Ok(())
    }
}
