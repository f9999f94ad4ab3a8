use std::{sync::Arc, time::Duration};

use chrono_tz::Tz;

use crate::{
    cache::{CacheConfig, ConfigurationCache},
    repository::FlagRepository,
    Client, Error, FlagScope, Result,
};

/// Configuration for [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) scope: FlagScope,
    pub(crate) default_cache_ttl: Duration,
    pub(crate) default_time_zone: Tz,
    pub(crate) operation_timeout: Duration,
    pub(crate) coalesce_fetches: bool,
    pub(crate) cache: CacheConfig,
}

impl ClientConfig {
    /// Default TTL of cached flag configurations.
    pub const DEFAULT_CACHE_TTL: Duration = crate::cache::DEFAULT_TTL;

    /// Default deadline for each cache and repository call.
    pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(3);

    /// Create a default configuration: global flags, in-memory cache, UTC.
    ///
    /// ```
    /// # use switchboard::ClientConfig;
    /// let config = ClientConfig::new();
    /// ```
    pub fn new() -> Self {
        ClientConfig {
            scope: FlagScope::Global,
            default_cache_ttl: Self::DEFAULT_CACHE_TTL,
            default_time_zone: Tz::UTC,
            operation_timeout: Self::DEFAULT_OPERATION_TIMEOUT,
            coalesce_fetches: true,
            cache: CacheConfig::in_memory(),
        }
    }

    /// Evaluate flags in the given scope.
    pub fn scope(mut self, scope: FlagScope) -> Self {
        self.scope = scope;
        self
    }

    /// Evaluate flags scoped to one deployed application version.
    ///
    /// ```
    /// # use switchboard::ClientConfig;
    /// let config = ClientConfig::new().application("billing", "2.3.0")?;
    /// # Ok::<(), switchboard::Error>(())
    /// ```
    pub fn application(
        self,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self> {
        Ok(self.scope(FlagScope::application(name, version)?))
    }

    /// TTL of configurations the client stores in the cache.
    pub fn default_cache_ttl(mut self, ttl: Duration) -> Self {
        self.default_cache_ttl = ttl;
        self
    }

    /// Time zone for operational windows when neither the window nor the context names one.
    pub fn default_time_zone(mut self, time_zone: Tz) -> Self {
        self.default_time_zone = time_zone;
        self
    }

    /// Deadline applied to each cache and repository call.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Let concurrent cache misses for the same flag share a single repository fetch.
    pub fn coalesce_fetches(mut self, coalesce: bool) -> Self {
        self.coalesce_fetches = coalesce;
        self
    }

    /// Select the cache backend.
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Build the configured cache backend and create a [`Client`] reading from `repository`.
    ///
    /// An unreachable distributed cache does not fail this call; the client then runs with every
    /// lookup falling through to the repository.
    pub async fn to_client(self, repository: Arc<dyn FlagRepository>) -> Result<Client> {
        let cache = self
            .cache
            .clone()
            .with_default_ttl(self.default_cache_ttl)
            .build()
            .await
            .map_err(|err| Error::BackendUnavailable(err.to_string()))?;
        Ok(Client::new(self, repository, cache))
    }

    /// Create a [`Client`] with an already constructed cache, ignoring [`ClientConfig::cache`].
    pub fn to_client_with_cache(
        self,
        repository: Arc<dyn FlagRepository>,
        cache: Arc<dyn ConfigurationCache>,
    ) -> Client {
        Client::new(self, repository, cache)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
