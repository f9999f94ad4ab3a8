//! Cache backend selection.

use std::{sync::Arc, time::Duration};

use crate::cache::{CacheResult, ConfigurationCache, InMemoryCache, DEFAULT_TTL};

/// Which store holds cached flag configurations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    /// Process-local store, for single-instance deployments.
    InMemory,
    /// Shared Redis store, for multi-instance deployments.
    #[cfg(feature = "redis")]
    Redis {
        /// Connection URL, e.g. `redis://localhost:6379`.
        url: String,
    },
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Selected backend.
    pub backend: CacheBackend,

    /// Namespace prepended to every key stored in a shared backend.
    pub key_prefix: String,

    /// TTL applied when `set` is called without one.
    pub default_ttl: Duration,

    /// Maximum number of entries kept by the in-memory backend.
    pub max_entries: usize,

    /// Deadline for each connection attempt to a remote backend.
    pub connection_timeout: Duration,

    /// Number of connection attempts before a remote backend runs in degraded (always miss) mode.
    pub max_retries: u32,

    /// Minimum time between connection rounds while a remote backend is unreachable.
    pub reconnect_interval: Duration,
}

impl CacheConfig {
    /// Default namespace for keys in shared backends.
    pub const DEFAULT_KEY_PREFIX: &'static str = "switchboard";

    /// Default capacity of the in-memory backend.
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

    /// Configuration for the process-local backend.
    pub fn in_memory() -> Self {
        Self {
            backend: CacheBackend::InMemory,
            key_prefix: Self::DEFAULT_KEY_PREFIX.to_owned(),
            default_ttl: DEFAULT_TTL,
            max_entries: Self::DEFAULT_MAX_ENTRIES,
            connection_timeout: Duration::from_secs(5),
            max_retries: 3,
            reconnect_interval: Duration::from_secs(30),
        }
    }

    /// Configuration for a Redis backend.
    ///
    /// ```
    /// use switchboard::CacheConfig;
    ///
    /// let config = CacheConfig::redis("redis://localhost:6379").with_key_prefix("flags");
    /// assert_eq!(config.build_key("global:checkout"), "flags:global:checkout");
    /// ```
    #[cfg(feature = "redis")]
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            backend: CacheBackend::Redis { url: url.into() },
            ..Self::in_memory()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Build the full key with prefix.
    pub fn build_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_owned()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }

    /// Create the configured backend.
    ///
    /// Only a malformed configuration fails here. A remote backend that cannot be reached yet is
    /// still returned and keeps trying to connect on later operations.
    pub async fn build(&self) -> CacheResult<Arc<dyn ConfigurationCache>> {
        match &self.backend {
            CacheBackend::InMemory => Ok(Arc::new(InMemoryCache::new(
                self.max_entries,
                self.default_ttl,
            ))),
            #[cfg(feature = "redis")]
            CacheBackend::Redis { .. } => {
                Ok(Arc::new(crate::cache::RedisCache::new(self.clone()).await?))
            }
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}
