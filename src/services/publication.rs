//! Publication workflow
//!
//! A publication request asks for resources from a private bucket to be
//! promoted into the public bucket. Requests live in a per-bucket document;
//! the `Pending → Approved/Rejected` transition is a single atomic compute so
//! two reviewers cannot both decide the same request.

use crate::core::lifecycle::ApplicationService;
use crate::core::models::ResourceRef;
use crate::services::notification::{NotificationKind, NotificationService};
use crate::storage::blob::{CopyOutcome, EtagPrecondition};
use crate::storage::resource::ResourceService;
use crate::utils::error::{ControlPlaneError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Review state of a publication request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicationStatus {
    /// Awaiting review
    Pending,
    /// Approved; resources were copied into the public bucket
    Approved,
    /// Rejected by a reviewer
    Rejected,
}

/// One resource inside a publication request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedResource {
    /// Source URL in the author's bucket
    pub source_url: String,
    /// Destination URL in the public bucket
    pub target_url: String,
}

/// A request to publish resources into the public bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    /// Unique identifier
    pub id: String,
    /// Bucket of the requesting author
    pub author_bucket: String,
    /// Resources to promote
    pub resources: Vec<PublishedResource>,
    /// Review state
    pub status: PublicationStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PublicationDocument {
    publications: BTreeMap<String, Publication>,
}

fn document_key(bucket: &str) -> String {
    format!("publications/{}", bucket)
}

/// Publication workflow over the compute primitive
pub struct PublicationService {
    resources: Arc<ResourceService>,
    applications: Arc<ApplicationService>,
    notifications: Arc<NotificationService>,
    public_bucket: String,
}

impl PublicationService {
    /// Wire the service to its collaborators
    pub fn new(
        resources: Arc<ResourceService>,
        applications: Arc<ApplicationService>,
        notifications: Arc<NotificationService>,
        public_bucket: impl Into<String>,
    ) -> Self {
        Self {
            resources,
            applications,
            notifications,
            public_bucket: public_bucket.into(),
        }
    }

    /// Submit a publication request for the given resources
    pub async fn create(
        &self,
        author_bucket: &str,
        resource_urls: Vec<String>,
    ) -> Result<Publication> {
        if resource_urls.is_empty() {
            return Err(ControlPlaneError::validation(
                "publication must contain at least one resource",
            ));
        }

        let mut resources = Vec::with_capacity(resource_urls.len());
        for url in &resource_urls {
            let resource = ResourceRef::parse(url)?;
            if resource.bucket != author_bucket {
                return Err(ControlPlaneError::validation(format!(
                    "resource {} is not owned by bucket {}",
                    url, author_bucket
                )));
            }
            self.validate_application(author_bucket, url).await?;
            resources.push(PublishedResource {
                source_url: url.clone(),
                target_url: ResourceRef::new(self.public_bucket.clone(), resource.path.clone())
                    .url(),
            });
        }

        let publication = Publication {
            id: Uuid::new_v4().to_string(),
            author_bucket: author_bucket.to_string(),
            resources,
            status: PublicationStatus::Pending,
            created_at: Utc::now(),
        };

        let key = document_key(author_bucket);
        self.resources
            .compute_resource(&key, EtagPrecondition::Any, |current| {
                let mut doc: PublicationDocument = current
                    .map(serde_json::from_str)
                    .transpose()?
                    .unwrap_or_default();
                doc.publications
                    .insert(publication.id.clone(), publication.clone());
                Ok(Some(serde_json::to_string(&doc)?))
            })
            .await?;

        self.notifications
            .add(
                &self.public_bucket,
                NotificationKind::PublicationRequested,
                format!("Publication requested by bucket {}", author_bucket),
                None,
            )
            .await?;

        info!(
            "Publication {} created for bucket {}",
            publication.id, author_bucket
        );
        Ok(publication)
    }

    /// Approve a pending request and copy its resources into the public bucket
    pub async fn approve(&self, bucket: &str, id: &str) -> Result<Publication> {
        let publication = self
            .transition(bucket, id, PublicationStatus::Approved)
            .await?;

        for resource in &publication.resources {
            if resource.source_url.ends_with('/') {
                let copied = self
                    .resources
                    .copy_folder(&resource.source_url, &resource.target_url, true)
                    .await?;
                if copied == CopyOutcome::EmptySource {
                    return Err(ControlPlaneError::not_found(resource.source_url.as_str()));
                }
            } else {
                self.copy_file(&resource.source_url, &resource.target_url)
                    .await?;
            }
        }

        self.notifications
            .add(
                bucket,
                NotificationKind::PublicationApproved,
                format!("Publication {} was approved", id),
                None,
            )
            .await?;
        Ok(publication)
    }

    /// Reject a pending request
    pub async fn reject(&self, bucket: &str, id: &str) -> Result<Publication> {
        let publication = self
            .transition(bucket, id, PublicationStatus::Rejected)
            .await?;
        self.notifications
            .add(
                bucket,
                NotificationKind::PublicationRejected,
                format!("Publication {} was rejected", id),
                None,
            )
            .await?;
        Ok(publication)
    }

    /// Fetch one publication request
    pub async fn get(&self, bucket: &str, id: &str) -> Result<Publication> {
        self.list(bucket)
            .await?
            .remove(id)
            .ok_or_else(|| ControlPlaneError::not_found(format!("publication {}", id)))
    }

    /// All publication requests of a bucket, keyed by id
    pub async fn list(&self, bucket: &str) -> Result<BTreeMap<String, Publication>> {
        let doc: PublicationDocument = match self.resources.get(&document_key(bucket)).await? {
            Some(body) => serde_json::from_str(&body)?,
            None => PublicationDocument::default(),
        };
        Ok(doc.publications)
    }

    async fn transition(
        &self,
        bucket: &str,
        id: &str,
        status: PublicationStatus,
    ) -> Result<Publication> {
        let mut updated: Option<Publication> = None;
        let key = document_key(bucket);
        self.resources
            .compute_resource(&key, EtagPrecondition::Any, |current| {
                let Some(body) = current else {
                    return Err(ControlPlaneError::not_found(format!("publication {}", id)));
                };
                let mut doc: PublicationDocument = serde_json::from_str(body)?;
                let publication = doc.publications.get_mut(id).ok_or_else(|| {
                    ControlPlaneError::not_found(format!("publication {}", id))
                })?;
                if publication.status != PublicationStatus::Pending {
                    return Err(ControlPlaneError::conflict(format!(
                        "publication {} is already {:?}",
                        id, publication.status
                    )));
                }
                publication.status = status;
                updated = Some(publication.clone());
                Ok(Some(serde_json::to_string(&doc)?))
            })
            .await?;
        updated.ok_or_else(|| ControlPlaneError::Internal("publication write lost".to_string()))
    }

    async fn copy_file(&self, source_url: &str, target_url: &str) -> Result<()> {
        let body = self.resources.get(source_url).await?.ok_or_else(|| {
            ControlPlaneError::not_found(source_url)
        })?;
        self.resources
            .compute_resource(target_url, EtagPrecondition::Any, |_| Ok(Some(body.clone())))
            .await?;
        Ok(())
    }

    async fn validate_application(&self, author_bucket: &str, url: &str) -> Result<()> {
        let app = match self.applications.get_application(url).await {
            Ok(app) => app,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(ControlPlaneError::Serialization(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let owner_prefix = format!("files/{}/", author_bucket);
        for dependent in self.applications.list_dependent_resources(&app).await? {
            if !dependent.starts_with(&owner_prefix) {
                return Err(ControlPlaneError::validation(format!(
                    "application dependency {} is outside bucket {}",
                    dependent, author_bucket
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
            unreachable!("publication never calls the controller")
        }
        async fn create_deployment(
            &self,
            _: &CallContext,
            _: &str,
            _: CreateDeploymentRequest,
        ) -> Result<String> {
            unreachable!("publication never calls the controller")
        }
        async fn delete_image(&self, _: &CallContext, _: &str) -> Result<()> {
            unreachable!("publication never calls the controller")
        }
        async fn delete_deployment(&self, _: &CallContext, _: &str) -> Result<()> {
            unreachable!("publication never calls the controller")
        }
        async fn logs(&self, _: &CallContext, _: &str) -> Result<LogsResponse> {
            unreachable!("publication never calls the controller")
        }
    }

    fn services() -> (PublicationService, Arc<ResourceService>) {
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
            PublicationService::new(
                Arc::clone(&resources),
                applications,
                notifications,
                "public",
            ),
            resources,
        )
    }

    #[tokio::test]
    async fn create_and_approve_copies_into_public_bucket() {
        let (publications, resources) = services();
        resources
            .compute_resource("files/bkt1/doc", EtagPrecondition::Any, |_| {
                Ok(Some("content".to_string()))
            })
            .await
            .unwrap();

        let publication = publications
            .create("bkt1", vec!["files/bkt1/doc".to_string()])
            .await
            .unwrap();
        assert_eq!(publication.status, PublicationStatus::Pending);
        assert_eq!(publication.resources[0].target_url, "files/public/doc");

        let approved = publications.approve("bkt1", &publication.id).await.unwrap();
        assert_eq!(approved.status, PublicationStatus::Approved);
        assert_eq!(
            resources.get("files/public/doc").await.unwrap().unwrap(),
            "content"
        );
    }

    #[tokio::test]
    async fn decided_publication_cannot_be_decided_again() {
        let (publications, resources) = services();
        resources
            .compute_resource("files/bkt1/doc", EtagPrecondition::Any, |_| {
                Ok(Some("content".to_string()))
            })
            .await
            .unwrap();

        let publication = publications
            .create("bkt1", vec!["files/bkt1/doc".to_string()])
            .await
            .unwrap();
        publications.reject("bkt1", &publication.id).await.unwrap();

        let err = publications
            .approve("bkt1", &publication.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Conflict(_)));
    }

    #[tokio::test]
    async fn create_rejects_foreign_resources() {
        let (publications, _) = services();
        let err = publications
            .create("bkt1", vec!["files/bkt2/doc".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Validation(_)));

        let err = publications.create("bkt1", vec![]).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::Validation(_)));
    }
}
