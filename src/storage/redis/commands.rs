//! Sorted-set and lock commands
//!
//! The deadline-ordered pending set maps onto a Redis sorted set scored by
//! epoch millis; lifecycle locks map onto `SET NX PX` leases released by a
//! token-guarded delete.

use super::pool::RedisPool;
use crate::utils::error::{ControlPlaneError, Result};
use redis::AsyncCommands;

// Delete the key only while it still holds the caller's token.
const DELETE_IF_EQUALS: &str =
    r#"if redis.call("get", KEYS[1]) == ARGV[1] then return redis.call("del", KEYS[1]) else return 0 end"#;

impl RedisPool {
    /// Add member with score only when absent; returns whether it was added
    pub async fn sorted_set_add_if_absent(
        &self,
        key: &str,
        score: f64,
        member: &str,
    ) -> Result<bool> {
        let Some(mut conn) = self.connection() else {
            return Ok(true);
        };

        let added: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(ControlPlaneError::Redis)?;
        Ok(added == 1)
    }

    /// Remove a member from a sorted set
    pub async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<()> {
        let Some(mut conn) = self.connection() else {
            return Ok(());
        };

        let _: () = conn
            .zrem(key, member)
            .await
            .map_err(ControlPlaneError::Redis)?;
        Ok(())
    }

    /// Get the score of a sorted-set member
    pub async fn sorted_set_score(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let Some(mut conn) = self.connection() else {
            return Ok(None);
        };

        let score: Option<f64> = conn
            .zscore(key, member)
            .await
            .map_err(ControlPlaneError::Redis)?;
        Ok(score)
    }

    /// Members with score at or below `max_score`, ascending, up to `limit`
    pub async fn sorted_set_range_by_score(
        &self,
        key: &str,
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<String>> {
        let Some(mut conn) = self.connection() else {
            return Ok(vec![]);
        };

        let members: Vec<String> = conn
            .zrangebyscore_limit(key, f64::NEG_INFINITY, max_score, 0, limit as isize)
            .await
            .map_err(ControlPlaneError::Redis)?;
        Ok(members)
    }

    /// Set key to value only if absent, with a TTL in milliseconds
    pub async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let Some(mut conn) = self.connection() else {
            return Ok(true);
        };

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(ControlPlaneError::Redis)?;
        Ok(reply.is_some())
    }

    /// Delete a key only while it still holds the given value.
    ///
    /// Returns `false` when the key was absent or held another value, which
    /// happens when a lease expired and someone else re-acquired it.
    pub async fn del_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let Some(mut conn) = self.connection() else {
            return Ok(true);
        };

        let deleted: i64 = redis::Script::new(DELETE_IF_EQUALS)
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(ControlPlaneError::Redis)?;
        Ok(deleted == 1)
    }
}
