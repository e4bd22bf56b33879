//! Bucket naming and object id allocation.

use crate::error::{ErrorKind, Result, from_metadata, from_storage};
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use sqlhub_metadata::Repository;
use sqlhub_storage::BackendHandle;
use std::time::Duration;

const ID_LENGTH: usize = 8;
const ID_SUFFIX: &str = ".db";
const MAX_ATTEMPTS: usize = 16;

/// Storage bucket holding every blob of one owner.
///
/// Owner names may contain characters no backend is happy with, so the
/// bucket is a fixed-length hex prefix of their digest instead.
pub fn bucket_for(owner: &str) -> String {
    let hash = blake3::hash(owner.as_bytes()).to_hex();
    hash[..16].to_string()
}

fn candidate() -> String {
    let token: String = thread_rng().sample_iter(&Alphanumeric).take(ID_LENGTH).map(char::from).collect();
    token + ID_SUFFIX
}

/// Allocate a fresh object id inside `bucket`.
///
/// Each candidate is reserved in the metadata store with a conditional
/// insert, so concurrent allocators never share an id. A reserved candidate
/// that nonetheless exists in the blob store (left there by an interrupted
/// commit) is handed back and skipped.
///
/// Every call to either store is bounded by `timeout`, and a candidate whose
/// check runs out is released before this returns, so a slow blob store
/// never strands a reservation.
///
/// The caller owns the reservation: it is released by the commit that
/// records the id, or must be released explicitly on failure.
pub async fn allocate(repo: &Repository, storage: &BackendHandle, bucket: &str, timeout: Duration) -> Result<String> {
    for attempt in 1..=MAX_ATTEMPTS {
        let id = candidate();
        let reserved = match tokio::time::timeout(timeout, repo.reserve_object(bucket, &id)).await {
            Ok(reserved) => reserved.map_err(from_metadata)?,
            Err(_) => {
                // The insert may have landed before the timer fired.
                release(repo, bucket, &id, timeout).await;
                exn::bail!(ErrorKind::UpstreamUnavailable("metadata store"));
            },
        };
        if !reserved {
            tracing::debug!(bucket, object_id = %id, attempt, "object id taken, retrying");
            continue;
        }
        match tokio::time::timeout(timeout, storage.exists(bucket, &id)).await {
            Ok(Ok(false)) => return Ok(id),
            Ok(Ok(true)) => {
                tracing::warn!(bucket, object_id = %id, "unreferenced object occupies id, skipping");
                release(repo, bucket, &id, timeout).await;
            },
            Ok(Err(e)) => {
                release(repo, bucket, &id, timeout).await;
                return Err(from_storage(e));
            },
            Err(_) => {
                tracing::warn!(bucket, object_id = %id, ?timeout, "blob store did not answer");
                release(repo, bucket, &id, timeout).await;
                exn::bail!(ErrorKind::UpstreamUnavailable("blob store"));
            },
        }
    }
    exn::bail!(ErrorKind::UpstreamUnavailable("identifier generator"))
}

async fn release(repo: &Repository, bucket: &str, id: &str, timeout: Duration) {
    match tokio::time::timeout(timeout, repo.release_object(bucket, id)).await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => tracing::warn!(bucket, object_id = %id, error = ?e, "could not release object id"),
        Err(_) => tracing::warn!(bucket, object_id = %id, "releasing object id timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlhub_metadata::Database;
    use sqlhub_storage::backend::MockBackend;
    use std::collections::HashSet;
    use std::sync::Arc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_bucket_for() {
        let bucket = bucket_for("alice");
        assert_eq!(bucket.len(), 16);
        assert!(bucket.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(bucket, bucket_for("alice"));
        assert_ne!(bucket, bucket_for("bob"));
        assert!(sqlhub_storage::object_path(&bucket, "abcdefgh.db").is_ok());
    }

    #[test]
    fn test_candidate_shape() {
        let id = candidate();
        assert_eq!(id.len(), ID_LENGTH + ID_SUFFIX.len());
        assert!(id.ends_with(".db"));
        assert!(id[..ID_LENGTH].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_allocate_reserves_unique_ids() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let storage: BackendHandle = Arc::new(MockBackend::default());
        let mut ids = HashSet::new();
        for _ in 0..50 {
            let id = allocate(&repo, &storage, "bucket", TIMEOUT).await.unwrap();
            assert!(ids.insert(id.clone()));
            // Reserved, so it can't be reserved again.
            assert!(!repo.reserve_object("bucket", &id).await.unwrap());
        }
        assert_eq!(repo.bucket_objects("bucket").await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_allocate_fails_when_storage_is_down() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = Repository::from(&db);
        let mock = Arc::new(MockBackend::default());
        mock.set_unavailable(true);
        let storage: BackendHandle = mock;
        let err = allocate(&repo, &storage, "bucket", TIMEOUT).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UpstreamUnavailable(_)));
    }
}
