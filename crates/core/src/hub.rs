//! The operations front-ends call.

use crate::access::{self, Viewer};
use crate::digest::digest;
use crate::error::{ErrorKind, Result, from_metadata, from_storage};
use crate::ident;
use crate::models::{DEFAULT_CONTENT_TYPE, Forked, TableRequest, TableView, Upload};
use crate::table::{Page, SortDirection, SqliteFile};
use crate::validate;
use sqlhub_cache::{CacheHandle, Fingerprint, Scope, ViewKey};
use sqlhub_config::Limits;
use sqlhub_metadata::{BlobRef, Identity, IdentityKey, NewVersion, Repository, Settings, VersionRecord};
use sqlhub_storage::{BackendHandle, ObjectInfo};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::instrument;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Coordinates the blob store, the metadata store and the result cache.
///
/// Callers resolve who the viewer is; nothing in here reads ambient session
/// state. Blob and metadata operations are bounded by
/// [`Limits::timeout`]; one that runs out is an
/// [`UpstreamUnavailable`](ErrorKind::UpstreamUnavailable) failure and never
/// leaves a partial version behind. Cache failures are logged and otherwise
/// ignored.
#[derive(Clone)]
pub struct Hub {
    storage: BackendHandle,
    repo: Repository,
    cache: CacheHandle,
    limits: Limits,
    cache_ttl: Duration,
}

impl Hub {
    pub fn new(storage: BackendHandle, repo: Repository, cache: CacheHandle) -> Self {
        Self {
            storage,
            repo,
            cache,
            limits: Limits::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store a database file as the next version of `owner/name`, creating
    /// the identity on first upload.
    #[instrument(skip_all, fields(owner = %upload.owner, name = %upload.name))]
    pub async fn upload(&self, upload: Upload) -> Result<u32> {
        validate::owner(&upload.owner)?;
        validate::name(&upload.name)?;
        validate::description(&upload.description, self.limits.max_description)?;
        if upload.data.is_empty() {
            exn::bail!(ErrorKind::InvalidInput("upload is empty".into()));
        }
        let mut file = SqliteFile::open(&upload.data).await?;
        let checked = file.check().await;
        file.close().await;
        checked?;

        let key = IdentityKey::new(&upload.owner, &upload.name);
        let bucket = ident::bucket_for(&key.owner);
        let object_id = ident::allocate(&self.repo, &self.storage, &bucket, self.limits.timeout()).await?;
        let blob = BlobRef {
            bucket,
            object_id,
            size: upload.data.len() as u64,
            digest: digest(&upload.data),
        };
        let content_type = upload.content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let new = NewVersion {
            key,
            public: upload.public,
            description: upload.description,
            readme: upload.readme,
            blob,
            content_type,
        };

        let committed = match self
            .blobs(self.storage.store(&new.blob.bucket, &new.blob.object_id, &upload.data, &new.content_type))
            .await
        {
            Ok(_) => self.metadata(self.repo.commit_upload(&new)).await,
            Err(e) => Err(e),
        };
        let version = match committed {
            Ok(version) => version,
            Err(e) => {
                self.abandon(&new.blob).await;
                return Err(e);
            },
        };

        self.invalidate(&new.key, 0).await;
        tracing::info!(
            version,
            bucket = %new.blob.bucket,
            object_id = %new.blob.object_id,
            size = new.blob.size,
            "database uploaded"
        );
        Ok(version)
    }

    /// Copy one version of `owner/name` into a new identity owned by
    /// `viewer`.
    ///
    /// The fork gets its own blob, so nothing done to the source afterwards
    /// affects it. Fails with [`SameOwner`](ErrorKind::SameOwner) when the
    /// viewer already owns the source, and with
    /// [`NameCollision`](ErrorKind::NameCollision) when the viewer already
    /// has a database of that name.
    #[instrument(skip(self))]
    pub async fn fork(&self, viewer: &str, owner: &str, name: &str, version: Option<u32>) -> Result<Forked> {
        if viewer == owner {
            exn::bail!(ErrorKind::SameOwner);
        }
        validate::owner(viewer)?;
        let source_key = IdentityKey::new(owner, name);
        let source = self.authorized(Some(viewer), &source_key).await?;
        let version = Self::pick_version(&source, version)?;
        let record = self.metadata(self.repo.resolve(&source_key, version)).await?;

        let dest = source_key.fork_for(viewer);
        if self.metadata(self.repo.identity(&dest)).await?.is_some() {
            exn::bail!(ErrorKind::NameCollision(dest.to_string()));
        }
        let bucket = ident::bucket_for(viewer);
        let object_id = ident::allocate(&self.repo, &self.storage, &bucket, self.limits.timeout()).await?;
        let blob = BlobRef {
            bucket,
            object_id,
            size: record.blob.size,
            digest: record.blob.digest.clone(),
        };

        let copy = self.storage.copy(&record.blob.bucket, &record.blob.object_id, &blob.bucket, &blob.object_id);
        let committed = match self.blobs(copy).await {
            Ok(_) => {
                let commit = self.repo.commit_fork(&source, version, &dest, &blob, &record.content_type);
                self.metadata(commit).await
            },
            Err(e) => Err(e),
        };
        let new_version = match committed {
            Ok(new_version) => new_version,
            Err(e) => {
                self.abandon(&blob).await;
                return Err(e);
            },
        };

        self.invalidate(&dest, 0).await;
        // The source's lineage gained a fork.
        self.invalidate(&source_key, 0).await;
        tracing::info!(source = %source_key, source_version = version, dest = %dest, version = new_version, "database forked");
        Ok(Forked {
            key: dest,
            version: new_version,
            blob,
        })
    }

    /// Save an identity's settings. Only its owner may.
    ///
    /// Returns the identity's key afterwards, which differs from the one
    /// passed in when the settings rename it.
    #[instrument(skip(self, settings))]
    pub async fn save_settings(&self, viewer: &str, owner: &str, name: &str, settings: Settings) -> Result<IdentityKey> {
        let key = IdentityKey::new(owner, name);
        let Some(identity) = self.metadata(self.repo.identity(&key)).await? else {
            exn::bail!(ErrorKind::NotFound(key.to_string()));
        };
        if !access::can_write(viewer, &identity) {
            exn::bail!(ErrorKind::Forbidden);
        }
        validate::description(&settings.description, self.limits.max_description)?;
        if let Some(new_name) = &settings.new_name {
            validate::name(new_name)?;
        }
        let mut settings = settings;
        settings.default_table = settings.default_table.filter(|t| !t.is_empty());
        if let Some(table) = &settings.default_table {
            let tables = self.load_tables(&identity, identity.highest_version).await?;
            if !tables.contains(table) {
                exn::bail!(ErrorKind::NotFound(format!("table {table}")));
            }
        }

        let saved = self.metadata(self.repo.save_settings(&key, &settings)).await?;
        self.invalidate(&key, 0).await;
        if saved != key {
            self.invalidate(&saved, 0).await;
        }
        tracing::info!(identity = %saved, public = settings.public, "settings saved");
        Ok(saved)
    }

    /// Star `owner/name` for the viewer, or remove their star. Returns the
    /// new star count.
    pub async fn toggle_star(&self, viewer: &str, owner: &str, name: &str) -> Result<u64> {
        let key = IdentityKey::new(owner, name);
        self.authorized(Some(viewer), &key).await?;
        let (starred, stars) = self.metadata(self.repo.toggle_star(&key, viewer)).await?;
        self.invalidate(&key, 0).await;
        tracing::info!(viewer, identity = %key, starred, stars, "star toggled");
        Ok(stars)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// One page of one table of one version.
    ///
    /// The viewer is authorized before the cache is looked at. On a miss the
    /// page is read from the blob and written back to the cache.
    #[instrument(skip_all, fields(viewer = ?request.viewer, owner = %request.owner, name = %request.name))]
    pub async fn read_table(&self, request: &TableRequest) -> Result<TableView> {
        let key = IdentityKey::new(&request.owner, &request.name);
        let viewer = request.viewer.as_deref();
        let identity = self.authorized(viewer, &key).await?;
        let version = Self::pick_version(&identity, request.version)?;
        let sort_direction = SortDirection::parse(&request.sort_direction)?;
        let row_cap = self.limits.row_cap(request.row_cap);
        let requested_table = request.table.as_deref().filter(|t| !t.is_empty());

        let direction = sort_direction.map(|d| d.to_string()).unwrap_or_default();
        let view_key = ViewKey {
            viewer,
            owner: &key.owner,
            folder: &key.folder,
            name: &key.name,
            version,
            table: requested_table.unwrap_or(""),
            sort_column: &request.sort_column,
            sort_direction: &direction,
            offset: request.offset,
            row_cap,
        };
        let fingerprint = match view_key.fingerprint() {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                tracing::warn!(version, error = ?e, "could not fingerprint view, bypassing cache");
                None
            },
        };
        if let Some(fingerprint) = &fingerprint
            && let Some(view) = self.cache_get(fingerprint).await
        {
            tracing::debug!(version, key = %fingerprint, "cache hit");
            return Ok(view);
        }

        let record = self.metadata(self.repo.resolve(&key, version)).await?;
        let data = self.blobs(self.storage.read(&record.blob.bucket, &record.blob.object_id)).await?;
        let mut file = SqliteFile::open(&data).await?;
        let read = async {
            let tables = file.tables().await?;
            let table = choose_table(requested_table, identity.default_table.as_deref(), &tables)?;
            let page = Page {
                sort_column: Some(request.sort_column.clone()).filter(|c| !c.is_empty()),
                sort_direction,
                offset: request.offset,
                limit: row_cap,
            };
            let records = file.page(&table, &page).await?;
            Ok::<_, crate::error::Error>((tables, records))
        }
        .await;
        file.close().await;
        let (tables, records) = read?;

        let view = TableView {
            owner: key.owner.clone(),
            folder: key.folder.clone(),
            name: key.name.clone(),
            version,
            highest_version: identity.highest_version,
            public: identity.public,
            stars: identity.stars,
            description: identity.description.clone(),
            tables,
            row_cap,
            records,
        };
        if let Some(fingerprint) = &fingerprint {
            self.cache_set(fingerprint, &view).await;
            self.discard_if_changed(&key, &identity).await;
        }
        Ok(view)
    }

    /// The raw bytes of one version. Not cached.
    pub async fn download(
        &self,
        viewer: Viewer<'_>,
        owner: &str,
        name: &str,
        version: Option<u32>,
    ) -> Result<(VersionRecord, Vec<u8>)> {
        let key = IdentityKey::new(owner, name);
        let identity = self.authorized(viewer, &key).await?;
        let version = Self::pick_version(&identity, version)?;
        let record = self.metadata(self.repo.resolve(&key, version)).await?;
        let data = self.blobs(self.storage.read(&record.blob.bucket, &record.blob.object_id)).await?;
        tracing::debug!(identity = %key, version, size = data.len(), "database downloaded");
        Ok((record, data))
    }

    /// Table names of one version.
    pub async fn tables(&self, viewer: Viewer<'_>, owner: &str, name: &str, version: Option<u32>) -> Result<Vec<String>> {
        let key = IdentityKey::new(owner, name);
        let identity = self.authorized(viewer, &key).await?;
        let version = Self::pick_version(&identity, version)?;
        self.load_tables(&identity, version).await
    }

    pub async fn identity(&self, viewer: Viewer<'_>, owner: &str, name: &str) -> Result<Identity> {
        self.authorized(viewer, &IdentityKey::new(owner, name)).await
    }

    /// Every version of `owner/name`, oldest first.
    pub async fn versions(&self, viewer: Viewer<'_>, owner: &str, name: &str) -> Result<Vec<VersionRecord>> {
        let key = IdentityKey::new(owner, name);
        self.authorized(viewer, &key).await?;
        self.metadata(self.repo.versions(&key)).await
    }

    /// Direct forks of `owner/name` the viewer is allowed to see.
    pub async fn forks(&self, viewer: Viewer<'_>, owner: &str, name: &str) -> Result<Vec<Identity>> {
        let key = IdentityKey::new(owner, name);
        self.authorized(viewer, &key).await?;
        let forks = self.metadata(self.repo.forks(&key)).await?;
        Ok(forks.into_iter().filter(|fork| access::can_read(viewer, fork)).collect())
    }

    /// Objects in an owner's bucket that no version references and no
    /// in-flight writer has reserved.
    ///
    /// These are left behind by commits that failed or timed out after the
    /// bytes were stored. Nothing is deleted.
    pub async fn orphaned_objects(&self, owner: &str) -> Result<Vec<ObjectInfo>> {
        let bucket = ident::bucket_for(owner);
        let known: HashSet<String> = self.metadata(self.repo.bucket_objects(&bucket)).await?.into_iter().collect();
        let stored = self.blobs(self.storage.list(&bucket)).await?;
        let orphans: Vec<_> = stored.into_iter().filter(|o| !known.contains(&o.id)).collect();
        if !orphans.is_empty() {
            tracing::info!(owner, bucket = %bucket, count = orphans.len(), "orphaned objects found");
        }
        Ok(orphans)
    }

    /// Drop every cached view of `owner/name`, across all versions.
    pub async fn invalidate_all(&self, owner: &str, name: &str) {
        self.invalidate(&IdentityKey::new(owner, name), 0).await;
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn authorized(&self, viewer: Viewer<'_>, key: &IdentityKey) -> Result<Identity> {
        let identity = self.metadata(self.repo.identity(key)).await?;
        access::authorize(viewer, &key.to_string(), identity)
    }

    /// `None` and `0` both mean the highest version.
    fn pick_version(identity: &Identity, requested: Option<u32>) -> Result<u32> {
        match requested.filter(|v| *v != 0) {
            Some(version) => Ok(version),
            None if identity.highest_version == 0 => {
                exn::bail!(ErrorKind::NotFound(format!("{} has no versions", identity.key)))
            },
            None => Ok(identity.highest_version),
        }
    }

    async fn load_tables(&self, identity: &Identity, version: u32) -> Result<Vec<String>> {
        let record = self.metadata(self.repo.resolve(&identity.key, version)).await?;
        let data = self.blobs(self.storage.read(&record.blob.bucket, &record.blob.object_id)).await?;
        let mut file = SqliteFile::open(&data).await?;
        let tables = file.tables().await;
        file.close().await;
        tables
    }

    async fn within<T>(&self, service: &'static str, operation: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.limits.timeout();
        match tokio::time::timeout(timeout, operation).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(service, ?timeout, "operation timed out");
                exn::bail!(ErrorKind::UpstreamUnavailable(service))
            },
        }
    }

    async fn metadata<T>(&self, operation: impl Future<Output = sqlhub_metadata::error::Result<T>>) -> Result<T> {
        self.within("metadata store", async { operation.await.map_err(from_metadata) }).await
    }

    async fn blobs<T>(&self, operation: impl Future<Output = sqlhub_storage::error::Result<T>>) -> Result<T> {
        self.within("blob store", async { operation.await.map_err(from_storage) }).await
    }

    /// Give up on a blob whose version never got committed.
    ///
    /// The reservation is released; any bytes already stored stay put and
    /// show up in [`orphaned_objects`](Self::orphaned_objects).
    async fn abandon(&self, blob: &BlobRef) {
        tracing::warn!(bucket = %blob.bucket, object_id = %blob.object_id, "commit failed, abandoning object");
        if let Err(e) = self.metadata(self.repo.release_object(&blob.bucket, &blob.object_id)).await {
            tracing::warn!(bucket = %blob.bucket, object_id = %blob.object_id, error = ?e, "could not release object id");
        }
    }

    async fn cache_get(&self, key: &Fingerprint) -> Option<TableView> {
        let bytes = match tokio::time::timeout(self.limits.timeout(), self.cache.get(key)).await {
            Ok(Ok(bytes)) => bytes?,
            Ok(Err(e)) => {
                tracing::warn!(cache = self.cache.name(), %key, error = ?e, "cache lookup failed");
                return None;
            },
            Err(_) => {
                tracing::warn!(cache = self.cache.name(), %key, "cache lookup timed out");
                return None;
            },
        };
        match serde_json::from_slice(&bytes) {
            Ok(view) => Some(view),
            Err(e) => {
                tracing::warn!(cache = self.cache.name(), %key, error = %e, "cached view is unreadable");
                None
            },
        }
    }

    async fn cache_set(&self, key: &Fingerprint, view: &TableView) {
        let bytes = match serde_json::to_vec(view) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%key, error = %e, "could not serialize view");
                return;
            },
        };
        match tokio::time::timeout(self.limits.timeout(), self.cache.set(key, bytes, self.cache_ttl)).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => tracing::warn!(cache = self.cache.name(), %key, error = ?e, "cache write failed"),
            Err(_) => tracing::warn!(cache = self.cache.name(), %key, "cache write timed out"),
        }
    }

    /// Drop the views just cached for `key` if the identity no longer looks
    /// like `seen`.
    ///
    /// A mutation that commits while a view is being built may invalidate
    /// before that view is written back. Checking after the write closes the
    /// gap: either this sees the change, or the mutation's own invalidation
    /// comes after the write.
    async fn discard_if_changed(&self, key: &IdentityKey, seen: &Identity) {
        match self.metadata(self.repo.identity(key)).await {
            Ok(current) if current.as_ref() == Some(seen) => {},
            Ok(_) => {
                tracing::debug!(identity = %key, "identity changed while reading, discarding cached views");
                self.invalidate(key, 0).await;
            },
            Err(e) => {
                tracing::warn!(identity = %key, error = ?e, "could not recheck identity, discarding cached views");
                self.invalidate(key, 0).await;
            },
        }
    }

    /// Best effort: a failed invalidation leaves stale views until they expire.
    async fn invalidate(&self, key: &IdentityKey, version: u32) {
        let scope = Scope::new(&key.owner, &key.folder, &key.name);
        match tokio::time::timeout(self.limits.timeout(), self.cache.invalidate(&scope, version)).await {
            Ok(Ok(removed)) => tracing::debug!(identity = %key, version, removed, "cache invalidated"),
            Ok(Err(e)) => tracing::warn!(cache = self.cache.name(), identity = %key, version, error = ?e, "cache invalidation failed"),
            Err(_) => tracing::warn!(cache = self.cache.name(), identity = %key, version, "cache invalidation timed out"),
        }
    }
}

/// The table a request shows: the requested one, else the identity's
/// default (if this version has it), else the first by name.
fn choose_table(requested: Option<&str>, default: Option<&str>, tables: &[String]) -> Result<String> {
    if let Some(requested) = requested {
        return match tables.iter().find(|t| *t == requested) {
            Some(table) => Ok(table.clone()),
            None => exn::bail!(ErrorKind::NotFound(format!("table {requested}"))),
        };
    }
    default
        .and_then(|d| tables.iter().find(|t| *t == d))
        .or_else(|| tables.first())
        .cloned()
        .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound("no tables".into())))
}
