//! Named mutual-exclusion leases
//!
//! Lifecycle operations serialize per application through `try_lock`, which
//! never waits: `None` means another deploy/undeploy/terminate holds the
//! lease. The returned guard releases on drop on every exit path, including
//! panics and early returns.

use crate::utils::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Scoped lease over a named lock; released on drop
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    /// Wrap a release action to run exactly once when the guard drops
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}

/// Non-blocking named lock provider
#[async_trait]
pub trait LockService: Send + Sync {
    /// Acquire the named lock without waiting; `None` when contended
    async fn try_lock(&self, key: &str) -> Result<Option<LockGuard>>;
}

/// In-process lock service
#[derive(Default)]
pub struct InMemoryLockService {
    held: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryLockService {
    /// Create a lock service with no held locks
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn try_lock(&self, key: &str) -> Result<Option<LockGuard>> {
        let mut held = self.held.lock();
        if !held.insert(key.to_string()) {
            return Ok(None);
        }
        let set = Arc::clone(&self.held);
        let key = key.to_string();
        Ok(Some(LockGuard::new(move || {
            set.lock().remove(&key);
        })))
    }
}
