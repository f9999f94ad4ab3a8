//! Configuration cache: scoped flag identities mapped to configuration snapshots.
//!
//! Two interchangeable backends implement [`ConfigurationCache`]: [`InMemoryCache`] for a single
//! instance and [`RedisCache`] (feature `redis`) for deployments sharing one cache. Cache errors
//! are never fatal to an evaluation; the [`Client`](crate::Client) treats them as a miss and
//! falls back to the repository.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{CacheKey, FlagConfiguration};

mod config;
mod error;
mod memory;
#[cfg(feature = "redis")]
mod redis_cache;

pub use config::{CacheBackend, CacheConfig};
pub use error::{CacheError, CacheResult};
pub use memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

/// TTL applied to entries stored without an explicit one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Key-value store for flag configurations.
///
/// All operations are cancel-safe: dropping a pending future leaves the cache either with or
/// without the entry, never partially written.
#[async_trait]
pub trait ConfigurationCache: Send + Sync {
    /// Look up a configuration. Expired entries are reported as missing.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Arc<FlagConfiguration>>>;

    /// Store a configuration, replacing any previous entry. `None` uses the backend's default TTL.
    async fn set(
        &self,
        key: &CacheKey,
        config: Arc<FlagConfiguration>,
        ttl: Option<Duration>,
    ) -> CacheResult<()>;

    /// Drop the entry for `key`, if any.
    async fn remove(&self, key: &CacheKey) -> CacheResult<()>;

    /// Drop every entry owned by this cache.
    async fn clear(&self) -> CacheResult<()>;
}
