//! Atomic resource compute primitive
//!
//! [`ResourceService::compute_resource`] is the sole mutation path for every
//! higher-level service. It performs an atomic read-modify-write on a single
//! resource key: no interleaved read-modify-write from another caller can
//! observe a stale value between this caller's read and write. In-process
//! writers are serialized by a per-key mutex; writers in other processes are
//! fenced by the etag-conditional write and retried transparently.

use crate::storage::blob::{BlobStore, CopyOutcome, EtagPrecondition, FolderPage, ResourceMetadata};
use crate::utils::error::{ControlPlaneError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Upper bound on transparent retries after a cross-process write conflict
const MAX_CONFLICT_RETRIES: usize = 16;

/// Read-modify-write service over the blob store
pub struct ResourceService {
    store: Arc<dyn BlobStore>,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ResourceService {
    /// Create a service over the given blob store
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            key_locks: DashMap::new(),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fetch the serialized value for a key
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.store.get(key).await
    }

    /// Fetch the value together with its metadata
    pub async fn get_with_metadata(&self, key: &str) -> Result<Option<(ResourceMetadata, String)>> {
        self.store.get_with_metadata(key).await
    }

    /// Copy every key under a folder prefix
    pub async fn copy_folder(
        &self,
        src_prefix: &str,
        dst_prefix: &str,
        overwrite: bool,
    ) -> Result<CopyOutcome> {
        self.store.copy_folder(src_prefix, dst_prefix, overwrite).await
    }

    /// Delete every key under a folder prefix
    pub async fn delete_folder(&self, prefix: &str) -> Result<bool> {
        self.store.delete_folder(prefix).await
    }

    /// List keys under a folder prefix with pagination
    pub async fn list_folder(
        &self,
        prefix: &str,
        token: Option<&str>,
        limit: usize,
    ) -> Result<FolderPage> {
        self.store.list_folder(prefix, token, limit).await
    }

    /// Atomically read-modify-write a single resource key.
    ///
    /// The mutator receives the current serialized value (`None` if absent)
    /// and returns the new value (`None` deletes). An `Err` from the mutator
    /// aborts the call without writing anything. Returns the new metadata, or
    /// `None` when the mutation deleted the value or no-op'd on an absent key.
    pub async fn compute_resource<F>(
        &self,
        key: &str,
        precondition: EtagPrecondition,
        mut mutator: F,
    ) -> Result<Option<ResourceMetadata>>
    where
        F: FnMut(Option<&str>) -> Result<Option<String>> + Send,
    {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        for attempt in 0..MAX_CONFLICT_RETRIES {
            let current = self.store.get_with_metadata(key).await?;

            match (&current, &precondition) {
                (Some(_), EtagPrecondition::NewOnly) => {
                    return Err(ControlPlaneError::Concurrency(format!(
                        "resource {} already exists",
                        key
                    )));
                }
                (Some((meta, _)), EtagPrecondition::IfMatch(etag)) if &meta.etag != etag => {
                    return Err(ControlPlaneError::Concurrency(format!(
                        "etag mismatch for {}: expected {}, found {}",
                        key, etag, meta.etag
                    )));
                }
                (None, EtagPrecondition::IfMatch(_)) => {
                    return Err(ControlPlaneError::Concurrency(format!(
                        "etag precondition on absent resource {}",
                        key
                    )));
                }
                _ => {}
            }

            let body = current.as_ref().map(|(_, b)| b.as_str());
            let next = mutator(body)?;

            // Fence the write on the exact version observed by the mutator.
            let write_precondition = match &current {
                Some((meta, _)) => EtagPrecondition::IfMatch(meta.etag.clone()),
                None => EtagPrecondition::NewOnly,
            };

            let outcome = match next {
                Some(new_body) => self
                    .store
                    .put(key, &new_body, write_precondition)
                    .await
                    .map(Some),
                None => {
                    if current.is_none() {
                        return Ok(None);
                    }
                    self.store.delete(key, write_precondition).await.map(|_| None)
                }
            };

            match outcome {
                Ok(metadata) => return Ok(metadata),
                Err(ControlPlaneError::Concurrency(_)) if precondition == EtagPrecondition::Any => {
                    debug!("Write conflict on {}, retrying (attempt {})", key, attempt + 1);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ControlPlaneError::Concurrency(format!(
            "too many write conflicts on {}",
            key
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::blob::InMemoryBlobStore;

    fn service() -> Arc<ResourceService> {
        Arc::new(ResourceService::new(Arc::new(InMemoryBlobStore::new())))
    }

    #[tokio::test]
    async fn creates_and_updates_value() {
        let resources = service();
        let meta = resources
            .compute_resource("k", EtagPrecondition::NewOnly, |current| {
                assert!(current.is_none());
                Ok(Some("1".to_string()))
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.content_length, 1);

        resources
            .compute_resource("k", EtagPrecondition::Any, |current| {
                assert_eq!(current, Some("1"));
                Ok(Some("2".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(resources.get("k").await.unwrap().unwrap(), "2");
    }

    #[tokio::test]
    async fn mutator_error_aborts_without_writing() {
        let resources = service();
        resources
            .compute_resource("k", EtagPrecondition::Any, |_| Ok(Some("v1".to_string())))
            .await
            .unwrap();

        let err = resources
            .compute_resource("k", EtagPrecondition::Any, |_| {
                Err(ControlPlaneError::Concurrency("changed under us".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Concurrency(_)));
        assert_eq!(resources.get("k").await.unwrap().unwrap(), "v1");
    }

    #[tokio::test]
    async fn returning_none_deletes() {
        let resources = service();
        resources
            .compute_resource("k", EtagPrecondition::Any, |_| Ok(Some("v".to_string())))
            .await
            .unwrap();

        let meta = resources
            .compute_resource("k", EtagPrecondition::Any, |_| Ok(None))
            .await
            .unwrap();
        assert!(meta.is_none());
        assert!(resources.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_if_match_fails() {
        let resources = service();
        resources
            .compute_resource("k", EtagPrecondition::Any, |_| Ok(Some("v".to_string())))
            .await
            .unwrap();

        let err = resources
            .compute_resource("k", EtagPrecondition::IfMatch("stale".into()), |_| {
                Ok(Some("other".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Concurrency(_)));
    }

    #[tokio::test]
    async fn concurrent_increments_never_lose_updates() {
        let resources = service();
        resources
            .compute_resource("counter", EtagPrecondition::Any, |_| Ok(Some("0".to_string())))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let resources = resources.clone();
            handles.push(tokio::spawn(async move {
                resources
                    .compute_resource("counter", EtagPrecondition::Any, |current| {
                        let n: u64 = current.unwrap().parse().unwrap();
                        Ok(Some((n + 1).to_string()))
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(resources.get("counter").await.unwrap().unwrap(), "50");
    }
}
