//! Resource sharing between buckets
//!
//! Sharing state is kept in two per-bucket documents: what a bucket has
//! shared out (`shared-by-me`) and what has been shared into it
//! (`shared-with-me`). Each side is mutated by its own atomic compute.

use crate::core::lifecycle::ApplicationService;
use crate::core::models::ResourceRef;
use crate::services::notification::{NotificationKind, NotificationService};
use crate::storage::blob::EtagPrecondition;
use crate::storage::resource::ResourceService;
use crate::utils::error::{ControlPlaneError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SharedByMeDocument {
    /// Resource URL -> buckets it is shared with
    resources: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SharedWithMeDocument {
    /// Resource URLs shared into this bucket
    resources: BTreeSet<String>,
}

fn by_me_key(bucket: &str) -> String {
    format!("shared-by-me/{}", bucket)
}

fn with_me_key(bucket: &str) -> String {
    format!("shared-with-me/{}", bucket)
}

/// Sharing workflow over the compute primitive
pub struct ShareService {
    resources: Arc<ResourceService>,
    applications: Arc<ApplicationService>,
    notifications: Arc<NotificationService>,
}

impl ShareService {
    /// Wire the service to its collaborators
    pub fn new(
        resources: Arc<ResourceService>,
        applications: Arc<ApplicationService>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            resources,
            applications,
            notifications,
        }
    }

    /// Share a resource owned by `owner_bucket` with `target_bucket`.
    ///
    /// Applications are only shareable when everything their function depends
    /// on lives in the owner's bucket, otherwise the recipient would see
    /// dangling references.
    pub async fn share(
        &self,
        owner_bucket: &str,
        target_bucket: &str,
        resource_url: &str,
    ) -> Result<()> {
        let resource = ResourceRef::parse(resource_url)?;
        if resource.bucket != owner_bucket {
            return Err(ControlPlaneError::validation(format!(
                "resource {} is not owned by bucket {}",
                resource_url, owner_bucket
            )));
        }
        if owner_bucket == target_bucket {
            return Err(ControlPlaneError::validation(
                "cannot share a resource with its own bucket",
            ));
        }

        self.validate_application_dependents(owner_bucket, resource_url)
            .await?;

        let by_me = by_me_key(owner_bucket);
        self.resources
            .compute_resource(&by_me, EtagPrecondition::Any, |current| {
                let mut doc: SharedByMeDocument = current
                    .map(serde_json::from_str)
                    .transpose()?
                    .unwrap_or_default();
                doc.resources
                    .entry(resource_url.to_string())
                    .or_default()
                    .insert(target_bucket.to_string());
                Ok(Some(serde_json::to_string(&doc)?))
            })
            .await?;

        let with_me = with_me_key(target_bucket);
        self.resources
            .compute_resource(&with_me, EtagPrecondition::Any, |current| {
                let mut doc: SharedWithMeDocument = current
                    .map(serde_json::from_str)
                    .transpose()?
                    .unwrap_or_default();
                doc.resources.insert(resource_url.to_string());
                Ok(Some(serde_json::to_string(&doc)?))
            })
            .await?;

        self.notifications
            .add(
                target_bucket,
                NotificationKind::ResourceShared,
                format!("Bucket {} shared {}", owner_bucket, resource_url),
                Some(resource_url.to_string()),
            )
            .await?;
        Ok(())
    }

    /// Withdraw a previously granted share
    pub async fn revoke(
        &self,
        owner_bucket: &str,
        target_bucket: &str,
        resource_url: &str,
    ) -> Result<()> {
        let by_me = by_me_key(owner_bucket);
        self.resources
            .compute_resource(&by_me, EtagPrecondition::Any, |current| {
                let Some(body) = current else {
                    return Ok(None);
                };
                let mut doc: SharedByMeDocument = serde_json::from_str(body)?;
                if let Some(targets) = doc.resources.get_mut(resource_url) {
                    targets.remove(target_bucket);
                    if targets.is_empty() {
                        doc.resources.remove(resource_url);
                    }
                }
                Ok(Some(serde_json::to_string(&doc)?))
            })
            .await?;

        let with_me = with_me_key(target_bucket);
        self.resources
            .compute_resource(&with_me, EtagPrecondition::Any, |current| {
                let Some(body) = current else {
                    return Ok(None);
                };
                let mut doc: SharedWithMeDocument = serde_json::from_str(body)?;
                doc.resources.remove(resource_url);
                Ok(Some(serde_json::to_string(&doc)?))
            })
            .await?;
        Ok(())
    }

    /// Resources a bucket has shared out, with their recipients
    pub async fn list_shared_by_me(
        &self,
        bucket: &str,
    ) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let doc: SharedByMeDocument = match self.resources.get(&by_me_key(bucket)).await? {
            Some(body) => serde_json::from_str(&body)?,
            None => SharedByMeDocument::default(),
        };
        Ok(doc.resources)
    }

    /// Resources shared into a bucket
    pub async fn list_shared_with_me(&self, bucket: &str) -> Result<BTreeSet<String>> {
        let doc: SharedWithMeDocument = match self.resources.get(&with_me_key(bucket)).await? {
            Some(body) => serde_json::from_str(&body)?,
            None => SharedWithMeDocument::default(),
        };
        Ok(doc.resources)
    }

    async fn validate_application_dependents(
        &self,
        owner_bucket: &str,
        resource_url: &str,
    ) -> Result<()> {
        let app = match self.applications.get_application(resource_url).await {
            Ok(app) => app,
            // Plain files and folders carry no dependents.
            Err(e) if e.is_not_found() => return Ok(()),
            Err(ControlPlaneError::Serialization(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let owner_prefix = format!("files/{}/", owner_bucket);
        for dependent in self.applications.list_dependent_resources(&app).await? {
            if !dependent.starts_with(&owner_prefix) {
                return Err(ControlPlaneError::validation(format!(
                    "application dependency {} is outside bucket {}",
                    dependent, owner_bucket
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApplicationsConfig, StorageConfig};
    use crate::core::controller::{
        CallContext, CreateDeploymentRequest, CreateImageRequest, DeploymentController,
        LogsResponse,
    };
    use crate::core::locks::InMemoryLockService;
    use crate::core::pending::InMemoryPendingSet;
    use crate::storage::blob::InMemoryBlobStore;
    use async_trait::async_trait;

    struct NoController;

    #[async_trait]
    impl DeploymentController for NoController {
        async fn create_image(
            &self,
            _: &CallContext,
            _: &str,
            _: CreateImageRequest,
        ) -> Result<()> {
            unreachable!("sharing never calls the controller")
        }
        async fn create_deployment(
            &self,
            _: &CallContext,
            _: &str,
            _: CreateDeploymentRequest,
        ) -> Result<String> {
            unreachable!("sharing never calls the controller")
        }
        async fn delete_image(&self, _: &CallContext, _: &str) -> Result<()> {
            unreachable!("sharing never calls the controller")
        }
        async fn delete_deployment(&self, _: &CallContext, _: &str) -> Result<()> {
            unreachable!("sharing never calls the controller")
        }
        async fn logs(&self, _: &CallContext, _: &str) -> Result<LogsResponse> {
            unreachable!("sharing never calls the controller")
        }
    }

    fn services() -> (ShareService, Arc<ResourceService>, Arc<NotificationService>) {
        let resources = Arc::new(ResourceService::new(Arc::new(InMemoryBlobStore::new())));
        let applications = Arc::new(ApplicationService::new(
            Arc::clone(&resources),
            Arc::new(InMemoryPendingSet::new()),
            Arc::new(InMemoryLockService::new()),
            Arc::new(NoController),
            ApplicationsConfig::default(),
            StorageConfig::default(),
        ));
        let notifications = Arc::new(NotificationService::new(Arc::clone(&resources)));
        (
            ShareService::new(
                Arc::clone(&resources),
                applications,
                Arc::clone(&notifications),
            ),
            resources,
            notifications,
        )
    }

    #[tokio::test]
    async fn share_updates_both_sides() {
        let (sharing, _, _) = services();
        sharing
            .share("bkt1", "bkt2", "files/bkt1/doc")
            .await
            .unwrap();

        let by_me = sharing.list_shared_by_me("bkt1").await.unwrap();
        assert!(by_me["files/bkt1/doc"].contains("bkt2"));
        let with_me = sharing.list_shared_with_me("bkt2").await.unwrap();
        assert!(with_me.contains("files/bkt1/doc"));
    }

    #[tokio::test]
    async fn revoke_removes_both_sides() {
        let (sharing, _, _) = services();
        sharing
            .share("bkt1", "bkt2", "files/bkt1/doc")
            .await
            .unwrap();
        sharing
            .revoke("bkt1", "bkt2", "files/bkt1/doc")
            .await
            .unwrap();

        assert!(sharing.list_shared_by_me("bkt1").await.unwrap().is_empty());
        assert!(
            !sharing
                .list_shared_with_me("bkt2")
                .await
                .unwrap()
                .contains("files/bkt1/doc")
        );
    }

    #[tokio::test]
    async fn share_rejects_foreign_resources() {
        let (sharing, _, _) = services();
        let err = sharing
            .share("bkt1", "bkt2", "files/bkt3/doc")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Validation(_)));

        let err = sharing
            .share("bkt1", "bkt1", "files/bkt1/doc")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Validation(_)));
    }

    #[tokio::test]
    async fn share_notifies_the_target_bucket() {
        let (sharing, _, notifications) = services();
        sharing
            .share("bkt1", "bkt2", "files/bkt1/doc")
            .await
            .unwrap();

        let listed = notifications.list("bkt2").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, NotificationKind::ResourceShared);
        assert_eq!(listed[0].resource.as_deref(), Some("files/bkt1/doc"));
        assert!(notifications.list("bkt1").await.unwrap().is_empty());
    }
}
