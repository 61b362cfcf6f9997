//! Redis-backed shared state
//!
//! ## Module Structure
//!
//! - `pool` - Connection management and no-op mode
//! - `commands` - Sorted-set and lock commands
//! - `pending` - Shared pending-deployment set
//! - `lock` - Named lock leases

mod commands;
mod lock;
mod pending;
mod pool;

pub use lock::RedisLockService;
pub use pending::RedisPendingSet;
pub use pool::RedisPool;
