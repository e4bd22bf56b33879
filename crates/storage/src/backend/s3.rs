//! S3-compatible storage backend.
//!
//! This module provides a storage backend implementation for S3-compatible
//! services including AWS S3, MinIO, Backblaze B2 and others.
//!
//! Storage buckets are not S3 buckets. Everything lives in the one configured
//! S3 bucket, and a storage bucket is a key prefix within it:
//! `{prefix}/{bucket}/{id}`.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file.

use crate::{
    ObjectInfo, StorageBackend,
    backend::{BoxSyncRead, ObjectInfoStream},
    error::{ErrorKind, Result},
    object_path, validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, SdkError},
    primitives::{ByteStream, DateTime},
};
use exn::{OptionExt, ResultExt};
use std::io::Cursor;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

/// S3-compatible storage backend.
///
/// # Examples
///
/// ```no_run
/// use sqlhub_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "minio",
///     "sqlhub",
///     Some("objects".to_string()),
///     "us-east-1",
///     Some("http://localhost:9000".to_string()),
///     "access_key_id",
///     "secret_access_key",
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    s3_bucket: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 storage backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging)
    /// * `s3_bucket` - The S3 bucket every object is stored in
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - AWS region or provider-specific region
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - Access key ID
    /// * `key_secret` - Secret access key
    pub async fn new(
        name: impl Into<String>,
        s3_bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix
            .map(validate_path)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p)))
            .transpose()?;
        let region = Region::new(region.into());
        let credentials = Credentials::new(key_id, key_secret, None, None, "sqlhub-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(region)
            // Exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for S3-compatible services (MinIO, etc.)
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config_builder.build()),
            s3_bucket: s3_bucket.into(),
            prefix,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    fn full_key(&self, bucket: &str, id: &str) -> Result<String> {
        object_key(self.prefix.as_deref(), bucket, id)
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }

    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    fn map_sdk_error<E, R>(err: SdkError<E, R>) -> ErrorKind
    where
        E: std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug,
    {
        let message = DisplayErrorContext(&err).to_string();
        match err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                ErrorKind::Network(message)
            },
            _ => ErrorKind::BackendError(message),
        }
    }

    async fn head(&self, bucket: &str, id: &str) -> Result<Option<ObjectInfo>> {
        let key = self.full_key(bucket, id)?;
        let _permit = self.acquire_permit().await?;
        let output = match self.client.head_object().bucket(&self.s3_bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => return Ok(None),
            Err(err) => exn::bail!(Self::map_sdk_error(err)),
        };
        let size = output.content_length().and_then(|len| u64::try_from(len).ok()).unwrap_or(0);
        let modified = output.last_modified().map(Self::parse_datetime).transpose()?;
        Ok(Some(ObjectInfo::new(bucket, id, size, modified.unwrap_or(OffsetDateTime::UNIX_EPOCH))))
    }
}

/// Builds the S3 key for an object: `{prefix}/{bucket}/{id}`.
fn object_key(prefix: Option<&str>, bucket: &str, id: &str) -> Result<String> {
    let path = object_path(bucket, id)?;
    let path_str = path.to_str().ok_or_raise(|| ErrorKind::InvalidPath(path.clone()))?;
    Ok(match prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path_str),
        None => path_str.to_string(),
    })
}

/// Key prefix under which every object of a bucket is listed.
fn bucket_prefix(prefix: Option<&str>, bucket: &str) -> Result<String> {
    let key = object_key(prefix, bucket, "_")?;
    Ok(key[..key.len() - 1].to_string())
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, bucket: &'a str) -> ObjectInfoStream<'a> {
        let list_prefix = match bucket_prefix(self.prefix.as_deref(), bucket) {
            Ok(prefix) => prefix,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.s3_bucket)
                .prefix(&list_prefix)
                .into_paginator()
                .send();
            loop {
                let page = {
                    let _permit = match self.acquire_permit().await {
                        Ok(permit) => permit,
                        Err(e) => { yield Err(e); break; },
                    };
                    pages.next().await
                };
                let page = match page {
                    Some(Ok(page)) => page,
                    Some(Err(err)) => { yield Err(exn::Exn::from(Self::map_sdk_error(err))); break; },
                    None => break,
                };
                for object in page.contents() {
                    let Some(id) = object.key().and_then(|key| key.strip_prefix(list_prefix.as_str())) else {
                        continue;
                    };
                    // Anything nested deeper wasn't written by this backend.
                    if id.is_empty() || id.contains('/') {
                        continue;
                    }
                    let size = object.size().and_then(|len| u64::try_from(len).ok()).unwrap_or(0);
                    match object.last_modified().map(Self::parse_datetime).transpose() {
                        Ok(modified) => {
                            yield Ok(ObjectInfo::new(bucket, id, size, modified.unwrap_or(OffsetDateTime::UNIX_EPOCH)))
                        },
                        Err(e) => yield Err(e),
                    }
                }
            }
        })
    }

    async fn exists(&self, bucket: &str, id: &str) -> Result<bool> {
        Ok(self.head(bucket, id).await?.is_some())
    }

    async fn store(&self, bucket: &str, id: &str, data: &[u8], content_type: &str) -> Result<u64> {
        let key = self.full_key(bucket, id)?;
        let _permit = self.acquire_permit().await?;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.s3_bucket)
            .key(&key)
            .body(ByteStream::from(data.to_vec()));
        if !content_type.is_empty() {
            request = request.content_type(content_type);
        }
        request.send().await.map_err(Self::map_sdk_error)?;
        tracing::debug!(backend = %self.name, key, bytes = data.len(), "stored object");
        Ok(data.len() as u64)
    }

    async fn read(&self, bucket: &str, id: &str) -> Result<Vec<u8>> {
        let key = self.full_key(bucket, id)?;
        let _permit = self.acquire_permit().await?;
        let output = match self.client.get_object().bucket(&self.s3_bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(key.into()))
            },
            Err(err) => exn::bail!(Self::map_sdk_error(err)),
        };
        let body = output.body.collect().await.or_raise(|| ErrorKind::Network(format!("reading body of {key}")))?;
        Ok(body.into_bytes().to_vec())
    }

    /// Buffers the whole object before handing out the reader.
    async fn reader(&self, bucket: &str, id: &str) -> Result<BoxSyncRead> {
        let data = self.read(bucket, id).await?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn copy(&self, src_bucket: &str, src_id: &str, dest_bucket: &str, dest_id: &str) -> Result<u64> {
        let source = self.head(src_bucket, src_id).await?;
        let source = source.ok_or_else(|| exn::Exn::from(ErrorKind::NotFound([src_bucket, src_id].iter().collect())))?;
        let src_key = self.full_key(src_bucket, src_id)?;
        let dest_key = self.full_key(dest_bucket, dest_id)?;
        let _permit = self.acquire_permit().await?;
        self.client
            .copy_object()
            .bucket(&self.s3_bucket)
            .copy_source(format!("{}/{}", self.s3_bucket, src_key))
            .key(&dest_key)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(source.size)
    }

}
