//! Redis-backed pending-deployment set
//!
//! A single sorted set shared by all control-plane instances, scored by the
//! recovery deadline in epoch millis.

use super::pool::RedisPool;
use crate::core::pending::PendingDeploymentSet;
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

const PENDING_SET_KEY: &str = "deployments:pending";

/// Pending set backed by a shared Redis sorted set
#[derive(Clone)]
pub struct RedisPendingSet {
    pool: RedisPool,
}

impl RedisPendingSet {
    /// Create a pending set over the given pool
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingDeploymentSet for RedisPendingSet {
    async fn add(&self, url: &str, deadline: DateTime<Utc>) -> Result<bool> {
        self.pool
            .sorted_set_add_if_absent(PENDING_SET_KEY, deadline.timestamp_millis() as f64, url)
            .await
    }

    async fn remove(&self, url: &str) -> Result<()> {
        self.pool.sorted_set_remove(PENDING_SET_KEY, url).await
    }

    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        self.pool
            .sorted_set_range_by_score(PENDING_SET_KEY, now.timestamp_millis() as f64, limit)
            .await
    }

    async fn contains(&self, url: &str) -> Result<bool> {
        Ok(self
            .pool
            .sorted_set_score(PENDING_SET_KEY, url)
            .await?
            .is_some())
    }
}
