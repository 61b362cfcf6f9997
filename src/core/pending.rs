//! Pending-deployment set
//!
//! A shared, deadline-ordered ledger of in-flight deploy/undeploy operations.
//! An entry is recorded just before a transition commits and removed when it
//! completes or is force-terminated; the reconciliation sweep reads expired
//! entries to recover applications whose deploying task crashed or hung.

use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Deadline-ordered set of in-flight lifecycle transitions
#[async_trait]
pub trait PendingDeploymentSet: Send + Sync {
    /// Record a transition with its recovery deadline.
    ///
    /// Create-only: an existing entry is left untouched and `false` is
    /// returned, so a caller can tell its own entry from one belonging to a
    /// transition already in flight.
    async fn add(&self, url: &str, deadline: DateTime<Utc>) -> Result<bool>;

    /// Drop a completed or terminated transition
    async fn remove(&self, url: &str) -> Result<()>;

    /// Up to `limit` entries whose deadline is at or before `now`, oldest first
    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>>;

    /// Whether the resource currently has an in-flight transition recorded
    async fn contains(&self, url: &str) -> Result<bool>;
}

/// In-process pending set
#[derive(Default)]
pub struct InMemoryPendingSet {
    entries: Mutex<HashMap<String, i64>>,
}

impl InMemoryPendingSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingDeploymentSet for InMemoryPendingSet {
    async fn add(&self, url: &str, deadline: DateTime<Utc>) -> Result<bool> {
        match self.entries.lock().entry(url.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(deadline.timestamp_millis());
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
        }
    }

    async fn remove(&self, url: &str) -> Result<()> {
        self.entries.lock().remove(url);
        Ok(())
    }

    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        let cutoff = now.timestamp_millis();
        let entries = self.entries.lock();
        let mut expired: Vec<(&String, &i64)> =
            entries.iter().filter(|(_, score)| **score <= cutoff).collect();
        expired.sort_by_key(|(url, score)| (**score, (*url).clone()));
        Ok(expired.into_iter().take(limit).map(|(url, _)| url.clone()).collect())
    }

    async fn contains(&self, url: &str) -> Result<bool> {
        Ok(self.entries.lock().contains_key(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn expired_returns_oldest_first_up_to_limit() {
        let pending = InMemoryPendingSet::new();
        let now = Utc::now();
        pending.add("files/b/app3", now + Duration::seconds(30)).await.unwrap();
        pending.add("files/b/app1", now - Duration::seconds(20)).await.unwrap();
        pending.add("files/b/app2", now - Duration::seconds(10)).await.unwrap();

        let expired = pending.expired(now, 10).await.unwrap();
        assert_eq!(expired, vec!["files/b/app1", "files/b/app2"]);

        let expired = pending.expired(now, 1).await.unwrap();
        assert_eq!(expired, vec!["files/b/app1"]);
    }

    #[tokio::test]
    async fn add_never_overwrites_an_existing_entry() {
        let pending = InMemoryPendingSet::new();
        let now = Utc::now();
        assert!(pending.add("files/b/app", now).await.unwrap());
        assert!(
            !pending
                .add("files/b/app", now + Duration::seconds(60))
                .await
                .unwrap()
        );

        // The original deadline is still in force.
        assert_eq!(pending.expired(now, 10).await.unwrap(), vec!["files/b/app"]);
    }

    #[tokio::test]
    async fn remove_clears_entry() {
        let pending = InMemoryPendingSet::new();
        pending.add("files/b/app", Utc::now()).await.unwrap();
        assert!(pending.contains("files/b/app").await.unwrap());

        pending.remove("files/b/app").await.unwrap();
        assert!(!pending.contains("files/b/app").await.unwrap());
        assert!(pending.expired(Utc::now(), 10).await.unwrap().is_empty());
    }
}
