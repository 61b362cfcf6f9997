//! Per-bucket notifications
//!
//! Notifications live in one document per bucket; every mutation is a single
//! atomic compute so concurrent publishers and readers never lose updates.

use crate::storage::blob::EtagPrecondition;
use crate::storage::resource::ResourceService;
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Informational message
    Info,
    /// A publication request was submitted for review
    PublicationRequested,
    /// A publication request was approved
    PublicationApproved,
    /// A publication request was rejected
    PublicationRejected,
    /// A resource was shared with this bucket
    ResourceShared,
}

/// One notification delivered to a bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique identifier
    pub id: String,
    /// Notification kind
    pub kind: NotificationKind,
    /// Human-readable message
    pub message: String,
    /// Subject resource URL, when the notification concerns one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NotificationDocument {
    notifications: Vec<Notification>,
}

fn document_key(bucket: &str) -> String {
    format!("notifications/{}", bucket)
}

/// Notification delivery and retrieval
pub struct NotificationService {
    resources: Arc<ResourceService>,
}

impl NotificationService {
    /// Create a service over the resource store
    pub fn new(resources: Arc<ResourceService>) -> Self {
        Self { resources }
    }

    /// Append a notification to a bucket's document
    pub async fn add(
        &self,
        bucket: &str,
        kind: NotificationKind,
        message: impl Into<String>,
        resource: Option<String>,
    ) -> Result<Notification> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            kind,
            message: message.into(),
            resource,
            timestamp: Utc::now(),
        };

        let key = document_key(bucket);
        self.resources
            .compute_resource(&key, EtagPrecondition::Any, |current| {
                let mut doc: NotificationDocument = current
                    .map(serde_json::from_str)
                    .transpose()?
                    .unwrap_or_default();
                doc.notifications.push(notification.clone());
                Ok(Some(serde_json::to_string(&doc)?))
            })
            .await?;
        Ok(notification)
    }

    /// List a bucket's notifications, oldest first
    pub async fn list(&self, bucket: &str) -> Result<Vec<Notification>> {
        let doc: NotificationDocument = match self.resources.get(&document_key(bucket)).await? {
            Some(body) => serde_json::from_str(&body)?,
            None => NotificationDocument::default(),
        };
        Ok(doc.notifications)
    }

    /// Delete the given notifications; unknown ids are ignored
    pub async fn delete(&self, bucket: &str, ids: &[String]) -> Result<()> {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let key = document_key(bucket);
        self.resources
            .compute_resource(&key, EtagPrecondition::Any, |current| {
                let Some(body) = current else {
                    return Ok(None);
                };
                let mut doc: NotificationDocument = serde_json::from_str(body)?;
                doc.notifications.retain(|n| !ids.contains(n.id.as_str()));
                Ok(Some(serde_json::to_string(&doc)?))
            })
            .await?;
        Ok(())
    }

    /// Drop the whole notification document of a bucket
    pub async fn delete_all(&self, bucket: &str) -> Result<()> {
        self.resources
            .compute_resource(&document_key(bucket), EtagPrecondition::Any, |_| Ok(None))
            .await?;
        Ok(())
    }
}
