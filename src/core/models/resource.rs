//! Resource identity
//!
//! Every stored document is addressed by a resource URL of the shape
//! `files/{bucket}/{path}`. Folders are URL prefixes whose path ends with a
//! slash; folder contents live under that prefix in the blob namespace.

use crate::utils::error::{ControlPlaneError, Result};
use serde::{Deserialize, Serialize};

/// Resource URL prefix for user files and applications
pub const FILES_PREFIX: &str = "files";

/// Bucket + path identity of a stored resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Owning bucket
    pub bucket: String,
    /// Path within the bucket; trailing slash marks a folder
    pub path: String,
}

impl ResourceRef {
    /// Build a reference from bucket and path components
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// Parse a `files/{bucket}/{path}` URL
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(FILES_PREFIX)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| {
                ControlPlaneError::validation(format!("invalid resource url: {}", url))
            })?;
        let (bucket, path) = rest.split_once('/').ok_or_else(|| {
            ControlPlaneError::validation(format!("resource url missing path: {}", url))
        })?;
        if bucket.is_empty() || path.is_empty() {
            return Err(ControlPlaneError::validation(format!(
                "invalid resource url: {}",
                url
            )));
        }
        Ok(Self::new(bucket, path))
    }

    /// Full resource URL
    pub fn url(&self) -> String {
        format!("{}/{}/{}", FILES_PREFIX, self.bucket, self.path)
    }

    /// Bucket-qualified path, used as the lock key for lifecycle operations
    pub fn absolute_path(&self) -> String {
        format!("{}/{}", self.bucket, self.path)
    }

    /// True when this reference names a folder
    pub fn is_folder(&self) -> bool {
        self.path.ends_with('/')
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        self.path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_rebuilds_url() {
        let r = ResourceRef::parse("files/bkt1/folder/app1").unwrap();
        assert_eq!(r.bucket, "bkt1");
        assert_eq!(r.path, "folder/app1");
        assert_eq!(r.url(), "files/bkt1/folder/app1");
        assert_eq!(r.absolute_path(), "bkt1/folder/app1");
        assert_eq!(r.name(), "app1");
        assert!(!r.is_folder());
    }

    #[test]
    fn folder_refs_end_with_slash() {
        let r = ResourceRef::parse("files/bkt1/sources/").unwrap();
        assert!(r.is_folder());
        assert_eq!(r.name(), "sources");
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(ResourceRef::parse("bkt1/app").is_err());
        assert!(ResourceRef::parse("files/bkt1").is_err());
        assert!(ResourceRef::parse("files//app").is_err());
    }
}
