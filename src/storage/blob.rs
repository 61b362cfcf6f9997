//! Blob store abstraction
//!
//! Resource documents live in an abstract key-value blob namespace. Writes are
//! guarded by etag preconditions so that concurrent writers surface as
//! [`ControlPlaneError::Concurrency`] instead of silently clobbering each
//! other. The in-memory implementation backs tests and single-node setups;
//! remote byte-level storage plugs in behind the same trait.

use crate::utils::error::{ControlPlaneError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Etag precondition for conditional writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EtagPrecondition {
    /// No check; last write wins against the value seen at read time
    Any,
    /// Fail if the key already exists
    NewOnly,
    /// Fail if the current etag differs
    IfMatch(String),
}

/// Metadata recorded for every stored resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceMetadata {
    /// Opaque version tag, refreshed on every successful write
    pub etag: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Serialized body length in bytes
    pub content_length: usize,
}

/// One page of a folder listing
#[derive(Debug, Clone, Default)]
pub struct FolderPage {
    /// Keys in this page, lexicographically ordered
    pub keys: Vec<String>,
    /// Continuation token; `None` when the listing is complete
    pub next_token: Option<String>,
}

/// Outcome of a folder copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Every key under the source prefix was copied
    Copied,
    /// No keys exist under the source prefix
    EmptySource,
    /// Destination already has content and overwrite was not requested
    OccupiedDestination,
}

/// Abstract key-value blob namespace
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the serialized value for a key
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Fetch the value together with its metadata
    async fn get_with_metadata(&self, key: &str) -> Result<Option<(ResourceMetadata, String)>>;

    /// Conditionally write a value, returning the new metadata
    async fn put(
        &self,
        key: &str,
        body: &str,
        precondition: EtagPrecondition,
    ) -> Result<ResourceMetadata>;

    /// Conditionally delete a key; deleting an absent key is a no-op
    async fn delete(&self, key: &str, precondition: EtagPrecondition) -> Result<()>;

    /// Copy every key under `src_prefix` to `dst_prefix`
    async fn copy_folder(
        &self,
        src_prefix: &str,
        dst_prefix: &str,
        overwrite: bool,
    ) -> Result<CopyOutcome>;

    /// Delete every key under `prefix`; returns `false` when nothing matched
    async fn delete_folder(&self, prefix: &str) -> Result<bool>;

    /// List keys under `prefix` with an opaque pagination token
    async fn list_folder(
        &self,
        prefix: &str,
        token: Option<&str>,
        limit: usize,
    ) -> Result<FolderPage>;
}

#[derive(Debug, Clone)]
struct Blob {
    metadata: ResourceMetadata,
    body: String,
}

/// In-memory blob store
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Blob>>,
}

impl InMemoryBlobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn check_precondition(
        current: Option<&Blob>,
        precondition: &EtagPrecondition,
        key: &str,
    ) -> Result<()> {
        match (current, precondition) {
            (_, EtagPrecondition::Any) => Ok(()),
            (None, EtagPrecondition::NewOnly) => Ok(()),
            (Some(_), EtagPrecondition::NewOnly) => Err(ControlPlaneError::Concurrency(format!(
                "resource {} already exists",
                key
            ))),
            (Some(blob), EtagPrecondition::IfMatch(etag)) => {
                if &blob.metadata.etag == etag {
                    Ok(())
                } else {
                    Err(ControlPlaneError::Concurrency(format!(
                        "etag mismatch for {}: expected {}, found {}",
                        key, etag, blob.metadata.etag
                    )))
                }
            }
            (None, EtagPrecondition::IfMatch(_)) => Err(ControlPlaneError::Concurrency(format!(
                "etag precondition on absent resource {}",
                key
            ))),
        }
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.blobs.read().get(key).map(|b| b.body.clone()))
    }

    async fn get_with_metadata(&self, key: &str) -> Result<Option<(ResourceMetadata, String)>> {
        Ok(self
            .blobs
            .read()
            .get(key)
            .map(|b| (b.metadata.clone(), b.body.clone())))
    }

    async fn put(
        &self,
        key: &str,
        body: &str,
        precondition: EtagPrecondition,
    ) -> Result<ResourceMetadata> {
        let mut blobs = self.blobs.write();
        let current = blobs.get(key);
        Self::check_precondition(current, &precondition, key)?;

        let now = Utc::now();
        let created_at = current.map(|b| b.metadata.created_at).unwrap_or(now);
        let metadata = ResourceMetadata {
            etag: Uuid::new_v4().to_string(),
            created_at,
            updated_at: now,
            content_length: body.len(),
        };
        blobs.insert(
            key.to_string(),
            Blob {
                metadata: metadata.clone(),
                body: body.to_string(),
            },
        );
        Ok(metadata)
    }

    async fn delete(&self, key: &str, precondition: EtagPrecondition) -> Result<()> {
        let mut blobs = self.blobs.write();
        if let Some(current) = blobs.get(key) {
            Self::check_precondition(Some(current), &precondition, key)?;
            blobs.remove(key);
        }
        Ok(())
    }

    async fn copy_folder(
        &self,
        src_prefix: &str,
        dst_prefix: &str,
        overwrite: bool,
    ) -> Result<CopyOutcome> {
        let mut blobs = self.blobs.write();
        if !overwrite {
            let occupied = blobs.range(dst_prefix.to_string()..).next().is_some_and(|(k, _)| k.starts_with(dst_prefix));
            if occupied {
                return Ok(CopyOutcome::OccupiedDestination);
            }
        }

        let entries: Vec<(String, String)> = blobs
            .range(src_prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(src_prefix))
            .map(|(k, b)| (k.clone(), b.body.clone()))
            .collect();
        if entries.is_empty() {
            return Ok(CopyOutcome::EmptySource);
        }

        let now = Utc::now();
        for (key, body) in entries {
            let dst_key = format!("{}{}", dst_prefix, &key[src_prefix.len()..]);
            let metadata = ResourceMetadata {
                etag: Uuid::new_v4().to_string(),
                created_at: now,
                updated_at: now,
                content_length: body.len(),
            };
            blobs.insert(dst_key, Blob { metadata, body });
        }
        Ok(CopyOutcome::Copied)
    }

    async fn delete_folder(&self, prefix: &str) -> Result<bool> {
        let mut blobs = self.blobs.write();
        let keys: Vec<String> = blobs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            blobs.remove(key);
        }
        Ok(!keys.is_empty())
    }

    async fn list_folder(
        &self,
        prefix: &str,
        token: Option<&str>,
        limit: usize,
    ) -> Result<FolderPage> {
        let blobs = self.blobs.read();
        let start = token.map(|t| t.to_string()).unwrap_or_else(|| prefix.to_string());
        let mut keys: Vec<String> = blobs
            .range(start..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| token.is_none_or(|t| k.as_str() > t))
            .take(limit + 1)
            .map(|(k, _)| k.clone())
            .collect();

        let next_token = if keys.len() > limit {
            keys.truncate(limit);
            keys.last().cloned()
        } else {
            None
        };
        Ok(FolderPage { keys, next_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_only_rejects_existing_key() {
        let store = InMemoryBlobStore::new();
        store.put("a/b", "{}", EtagPrecondition::NewOnly).await.unwrap();
        let err = store.put("a/b", "{}", EtagPrecondition::NewOnly).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::Concurrency(_)));
    }

    #[tokio::test]
    async fn if_match_requires_current_etag() {
        let store = InMemoryBlobStore::new();
        let meta = store.put("a/b", "v1", EtagPrecondition::Any).await.unwrap();

        let err = store
            .put("a/b", "v2", EtagPrecondition::IfMatch("stale".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Concurrency(_)));

        let meta2 = store
            .put("a/b", "v2", EtagPrecondition::IfMatch(meta.etag.clone()))
            .await
            .unwrap();
        assert_ne!(meta.etag, meta2.etag);
        assert_eq!(store.get("a/b").await.unwrap().unwrap(), "v2");
    }

    #[tokio::test]
    async fn copy_folder_respects_overwrite_flag() {
        let store = InMemoryBlobStore::new();
        store.put("src/f1", "one", EtagPrecondition::Any).await.unwrap();
        store.put("src/f2", "two", EtagPrecondition::Any).await.unwrap();
        store.put("dst/f1", "old", EtagPrecondition::Any).await.unwrap();

        assert_eq!(
            store.copy_folder("src/", "dst/", false).await.unwrap(),
            CopyOutcome::OccupiedDestination
        );
        assert_eq!(store.get("dst/f1").await.unwrap().unwrap(), "old");

        assert_eq!(
            store.copy_folder("src/", "dst/", true).await.unwrap(),
            CopyOutcome::Copied
        );
        assert_eq!(store.get("dst/f1").await.unwrap().unwrap(), "one");
        assert_eq!(store.get("dst/f2").await.unwrap().unwrap(), "two");
    }

    #[tokio::test]
    async fn copy_of_empty_source_reports_it() {
        let store = InMemoryBlobStore::new();
        assert_eq!(
            store.copy_folder("src/", "dst/", true).await.unwrap(),
            CopyOutcome::EmptySource
        );
        assert!(store.get("dst/f1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_folder_removes_all_keys() {
        let store = InMemoryBlobStore::new();
        store.put("app/data/f1", "x", EtagPrecondition::Any).await.unwrap();
        store.put("app/data/f2", "y", EtagPrecondition::Any).await.unwrap();
        store.put("app/other", "z", EtagPrecondition::Any).await.unwrap();

        assert!(store.delete_folder("app/data/").await.unwrap());
        assert!(store.get("app/data/f1").await.unwrap().is_none());
        assert!(store.get("app/other").await.unwrap().is_some());
        assert!(!store.delete_folder("app/data/").await.unwrap());
    }

    #[tokio::test]
    async fn list_folder_paginates() {
        let store = InMemoryBlobStore::new();
        for i in 0..5 {
            store
                .put(&format!("folder/f{}", i), "x", EtagPrecondition::Any)
                .await
                .unwrap();
        }

        let page1 = store.list_folder("folder/", None, 2).await.unwrap();
        assert_eq!(page1.keys, vec!["folder/f0", "folder/f1"]);
        let token = page1.next_token.unwrap();

        let page2 = store.list_folder("folder/", Some(&token), 10).await.unwrap();
        assert_eq!(page2.keys, vec!["folder/f2", "folder/f3", "folder/f4"]);
        assert!(page2.next_token.is_none());
    }
}
