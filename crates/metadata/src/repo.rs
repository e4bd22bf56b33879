//! Repository for identities, versions, object reservations and stars.
//!
//! Every operation that writes more than one row runs in a single
//! transaction: either the whole record is visible afterwards or none of it
//! is. Dropping an uncommitted transaction (a timeout cancelling the future,
//! say) rolls it back.

use crate::Database;
use crate::error::{ErrorKind, Result, unique_violation};
use crate::models::{
    BlobRef, Identity, IdentityKey, IdentityRow, NewVersion, Settings, VersionRecord, VersionRow, version_from_column,
};
use exn::ResultExt;
use sqlx::{Sqlite, SqlitePool, Transaction};
use time::OffsetDateTime;
use tracing::instrument;

/// Repository for the metadata store.
///
/// # Relationships
///
/// - An identity has zero or more versions; a version belongs to exactly one
///   identity and is never deleted.
/// - A `(bucket, object_id)` pair is referenced by at most one version, or
///   reserved by at most one in-flight writer, never both.
/// - A fork is an ordinary identity that remembers the `(identity, version)`
///   it was copied from. Lineage has no effect on access.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn now() -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }

    fn size_column(blob: &BlobRef) -> Result<i64> {
        i64::try_from(blob.size).or_raise(|| ErrorKind::InvalidData("object size"))
    }

    async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await.or_raise(|| ErrorKind::Database)
    }

    /// Record the next version of an identity, inside the caller's transaction.
    async fn insert_next_version(
        tx: &mut Transaction<'static, Sqlite>,
        identity_id: i64,
        blob: &BlobRef,
        content_type: &str,
        description: &str,
        now: i64,
    ) -> Result<u32> {
        let result = sqlx::query_scalar(include_str!("../queries/insert_next_version.sql"))
            .bind(identity_id)
            .bind(&blob.bucket)
            .bind(&blob.object_id)
            .bind(Self::size_column(blob)?)
            .bind(&blob.digest)
            .bind(content_type)
            .bind(description)
            .bind(now)
            .fetch_one(&mut **tx)
            .await;
        let version: i64 = match result {
            Ok(version) => version,
            Err(e) if unique_violation(&e).is_some_and(|c| c.contains("versions.object_id")) => {
                exn::bail!(ErrorKind::ObjectCollision(blob.bucket.clone(), blob.object_id.clone()))
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Database),
        };
        // The id is now owned by a version, it no longer needs reserving.
        sqlx::query(include_str!("../queries/release_object.sql"))
            .bind(&blob.bucket)
            .bind(&blob.object_id)
            .execute(&mut **tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        version_from_column(version)
    }

    // =========================================================================
    // Object ids
    // =========================================================================

    /// Reserve an object id within a bucket.
    ///
    /// Returns `false` if the id is already reserved or referenced by a
    /// committed version. This is a single conditional insert, so two
    /// concurrent callers can never both be handed the same id.
    pub async fn reserve_object(&self, bucket: &str, object_id: &str) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/reserve_object.sql"))
            .bind(bucket)
            .bind(object_id)
            .bind(Self::now())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() == 1)
    }

    /// Give a reserved id back. Releasing an id that isn't reserved is a no-op.
    pub async fn release_object(&self, bucket: &str, object_id: &str) -> Result<()> {
        sqlx::query(include_str!("../queries/release_object.sql"))
            .bind(bucket)
            .bind(object_id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Every object id of a bucket that is either committed or reserved.
    pub async fn bucket_objects(&self, bucket: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(include_str!("../queries/list_bucket_objects.sql"))
            .bind(bucket)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    // =========================================================================
    // Versions
    // =========================================================================

    /// Commit an upload: create or update the identity and record the blob
    /// under the next version number, atomically.
    ///
    /// The identity upsert is the first statement of the transaction, so the
    /// write lock is taken before the highest version is read. Concurrent
    /// commits to the same identity are serialized and each observes the
    /// previous one's version.
    #[instrument(level = "debug", skip_all, fields(identity = %new.key))]
    pub async fn commit_upload(&self, new: &NewVersion) -> Result<u32> {
        let now = Self::now();
        let mut tx = self.begin().await?;
        let identity_id: i64 = sqlx::query_scalar(include_str!("../queries/upsert_identity.sql"))
            .bind(&new.key.owner)
            .bind(&new.key.folder)
            .bind(&new.key.name)
            .bind(new.public)
            .bind(&new.description)
            .bind(&new.readme)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let version =
            Self::insert_next_version(&mut tx, identity_id, &new.blob, &new.content_type, &new.description, now).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::debug!(version, object_id = %new.blob.object_id, "version committed");
        Ok(version)
    }

    /// Commit a fork: create the destination identity, seeded from `source`,
    /// with the copied blob as its first version.
    ///
    /// Fails with [`NameCollision`](ErrorKind::NameCollision) if the
    /// destination identity already exists. Forks never add versions to an
    /// existing identity.
    #[instrument(level = "debug", skip_all, fields(source = %source.key, dest = %dest))]
    pub async fn commit_fork(
        &self,
        source: &Identity,
        source_version: u32,
        dest: &IdentityKey,
        blob: &BlobRef,
        content_type: &str,
    ) -> Result<u32> {
        let now = Self::now();
        let mut tx = self.begin().await?;
        let result = sqlx::query_scalar(include_str!("../queries/insert_fork_identity.sql"))
            .bind(&dest.owner)
            .bind(&dest.folder)
            .bind(&dest.name)
            .bind(source.public)
            .bind(&source.description)
            .bind(&source.readme)
            .bind(&source.default_table)
            .bind(&source.key.owner)
            .bind(&source.key.folder)
            .bind(&source.key.name)
            .bind(i64::from(source_version))
            .bind(now)
            .fetch_one(&mut *tx)
            .await;
        let identity_id: i64 = match result {
            Ok(id) => id,
            Err(e) if unique_violation(&e).is_some_and(|c| c.starts_with("identities.")) => {
                exn::bail!(ErrorKind::NameCollision(dest.to_string()))
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Database),
        };
        let description = format!("Forked from {} v{}", source.key, source_version);
        let version = Self::insert_next_version(&mut tx, identity_id, blob, content_type, &description, now).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(version)
    }

    /// Record a blob under an explicit version number.
    ///
    /// Creates the identity (private, empty metadata) if needed. Fails with
    /// [`DuplicateVersion`](ErrorKind::DuplicateVersion) if the version is
    /// already recorded. Uploads go through
    /// [`commit_upload`](Self::commit_upload) instead, which picks the number
    /// itself.
    pub async fn put(&self, key: &IdentityKey, version: u32, blob: &BlobRef, content_type: &str) -> Result<()> {
        if version == 0 {
            exn::bail!(ErrorKind::InvalidData("version"));
        }
        let now = Self::now();
        let mut tx = self.begin().await?;
        let identity_id: i64 = sqlx::query_scalar(include_str!("../queries/ensure_identity.sql"))
            .bind(&key.owner)
            .bind(&key.folder)
            .bind(&key.name)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let result = sqlx::query(include_str!("../queries/insert_version.sql"))
            .bind(identity_id)
            .bind(i64::from(version))
            .bind(&blob.bucket)
            .bind(&blob.object_id)
            .bind(Self::size_column(blob)?)
            .bind(&blob.digest)
            .bind(content_type)
            .bind("")
            .bind(now)
            .execute(&mut *tx)
            .await;
        match result {
            Ok(_) => {},
            Err(e) => match unique_violation(&e) {
                Some(c) if c.contains("versions.version") => {
                    exn::bail!(ErrorKind::DuplicateVersion(key.to_string(), version))
                },
                Some(c) if c.contains("versions.object_id") => {
                    exn::bail!(ErrorKind::ObjectCollision(blob.bucket.clone(), blob.object_id.clone()))
                },
                _ => return Err(e).or_raise(|| ErrorKind::Database),
            },
        }
        sqlx::query(include_str!("../queries/release_object.sql"))
            .bind(&blob.bucket)
            .bind(&blob.object_id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    /// Highest committed version of an identity, or `0` if it has none.
    pub async fn highest_version(&self, key: &IdentityKey) -> Result<u32> {
        let version: i64 = sqlx::query_scalar(include_str!("../queries/highest_version.sql"))
            .bind(&key.owner)
            .bind(&key.folder)
            .bind(&key.name)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        version_from_column(version)
    }

    /// The version number the next upload to this identity would get.
    ///
    /// Informational only: the number is allocated again, atomically, at
    /// commit time.
    pub async fn next_version(&self, key: &IdentityKey) -> Result<u32> {
        let highest = self.highest_version(key).await?;
        highest.checked_add(1).ok_or_else(|| exn::Exn::from(ErrorKind::InvalidData("version")))
    }

    /// Resolve an identity's version to where its bytes live.
    pub async fn resolve(&self, key: &IdentityKey, version: u32) -> Result<VersionRecord> {
        let row: Option<VersionRow> = sqlx::query_as(include_str!("../queries/get_version.sql"))
            .bind(&key.owner)
            .bind(&key.folder)
            .bind(&key.name)
            .bind(i64::from(version))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        match row {
            Some(row) => row.try_into(),
            None => exn::bail!(ErrorKind::VersionNotFound(key.to_string(), version)),
        }
    }

    /// Every version of an identity, oldest first.
    pub async fn versions(&self, key: &IdentityKey) -> Result<Vec<VersionRecord>> {
        let rows: Vec<VersionRow> = sqlx::query_as(include_str!("../queries/list_versions.sql"))
            .bind(&key.owner)
            .bind(&key.folder)
            .bind(&key.name)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(|r| r.try_into()).collect()
    }

    // =========================================================================
    // Identities
    // =========================================================================

    pub async fn identity(&self, key: &IdentityKey) -> Result<Option<Identity>> {
        let row: Option<IdentityRow> = sqlx::query_as(include_str!("../queries/get_identity.sql"))
            .bind(&key.owner)
            .bind(&key.folder)
            .bind(&key.name)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|r| r.try_into()).transpose()
    }

    /// Direct forks of an identity.
    pub async fn forks(&self, key: &IdentityKey) -> Result<Vec<Identity>> {
        let rows: Vec<IdentityRow> = sqlx::query_as(include_str!("../queries/list_forks.sql"))
            .bind(&key.owner)
            .bind(&key.folder)
            .bind(&key.name)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Save an identity's settings, renaming it when asked to.
    ///
    /// Returns the identity's key after the save (the new name, if renamed).
    /// Forks of a renamed identity follow it: their lineage is updated in the
    /// same transaction.
    #[instrument(level = "debug", skip(self, settings), fields(identity = %key))]
    pub async fn save_settings(&self, key: &IdentityKey, settings: &Settings) -> Result<IdentityKey> {
        let now = Self::now();
        let mut tx = self.begin().await?;
        let updated = sqlx::query(include_str!("../queries/update_settings.sql"))
            .bind(&key.owner)
            .bind(&key.folder)
            .bind(&key.name)
            .bind(&settings.description)
            .bind(&settings.readme)
            .bind(&settings.default_table)
            .bind(settings.public)
            .bind(now)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if updated.rows_affected() == 0 {
            exn::bail!(ErrorKind::IdentityNotFound(key.to_string()));
        }
        let renamed = match settings.new_name.as_deref() {
            Some(new_name) if new_name != key.name => key.with_name(new_name),
            _ => {
                tx.commit().await.or_raise(|| ErrorKind::Database)?;
                return Ok(key.clone());
            },
        };
        let result = sqlx::query(include_str!("../queries/rename_identity.sql"))
            .bind(&key.owner)
            .bind(&key.folder)
            .bind(&key.name)
            .bind(&renamed.name)
            .bind(now)
            .execute(&mut *tx)
            .await;
        match result {
            Ok(_) => {},
            Err(e) if unique_violation(&e).is_some_and(|c| c.starts_with("identities.")) => {
                exn::bail!(ErrorKind::NameCollision(renamed.to_string()))
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Database),
        }
        sqlx::query(include_str!("../queries/rename_lineage.sql"))
            .bind(&key.owner)
            .bind(&key.folder)
            .bind(&key.name)
            .bind(&renamed.name)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(renamed)
    }

    /// Star or unstar an identity on behalf of a viewer.
    ///
    /// Returns whether the viewer now stars it, and the identity's new star
    /// count.
    pub async fn toggle_star(&self, key: &IdentityKey, viewer: &str) -> Result<(bool, u64)> {
        let mut tx = self.begin().await?;
        let identity_id: Option<i64> = sqlx::query_scalar(include_str!("../queries/get_identity_id.sql"))
            .bind(&key.owner)
            .bind(&key.folder)
            .bind(&key.name)
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let Some(identity_id) = identity_id else {
            exn::bail!(ErrorKind::IdentityNotFound(key.to_string()));
        };
        let removed = sqlx::query(include_str!("../queries/delete_star.sql"))
            .bind(identity_id)
            .bind(viewer)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let starred = removed.rows_affected() == 0;
        if starred {
            sqlx::query(include_str!("../queries/insert_star.sql"))
                .bind(identity_id)
                .bind(viewer)
                .bind(Self::now())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        let count: i64 = sqlx::query_scalar(include_str!("../queries/count_stars.sql"))
            .bind(identity_id)
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        let count = u64::try_from(count).or_raise(|| ErrorKind::InvalidData("star count"))?;
        Ok((starred, count))
    }
}
