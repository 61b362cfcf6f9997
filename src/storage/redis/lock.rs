//! Redis-backed lock service
//!
//! Locks are `SET NX PX` leases keyed by the application's absolute path. The
//! TTL bounds staleness when a holder crashes; release on drop is a
//! best-effort delete dispatched off the drop path.

use super::pool::RedisPool;
use crate::core::locks::{LockGuard, LockService};
use crate::utils::error::Result;
use async_trait::async_trait;
use rand::RngCore;
use tracing::{debug, warn};

/// Lock service backed by Redis NX leases
#[derive(Clone)]
pub struct RedisLockService {
    pool: RedisPool,
    ttl_ms: u64,
}

impl RedisLockService {
    /// Create a lock service with the configured lease TTL
    pub fn new(pool: RedisPool, ttl_ms: u64) -> Self {
        Self { pool, ttl_ms }
    }

    fn lock_key(key: &str) -> String {
        format!("lock:{}", key)
    }

    fn token() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

#[async_trait]
impl LockService for RedisLockService {
    async fn try_lock(&self, key: &str) -> Result<Option<LockGuard>> {
        let lock_key = Self::lock_key(key);
        let token = Self::token();

        if !self.pool.set_nx_px(&lock_key, &token, self.ttl_ms).await? {
            return Ok(None);
        }

        let pool = self.pool.clone();
        Ok(Some(LockGuard::new(move || {
            tokio::spawn(async move {
                // Token-guarded delete: a guard outliving its TTL must not
                // release the next holder's lease.
                match pool.del_if_equals(&lock_key, &token).await {
                    Ok(true) => {}
                    Ok(false) => debug!("Lease {} already expired at release", lock_key),
                    Err(e) => warn!("Failed to release lock {}: {}", lock_key, e),
                }
            });
        })))
    }
}
