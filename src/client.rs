use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::de::DeserializeOwned;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    admin::{FlagAdmin, Invalidations},
    cache::{CacheResult, ConfigurationCache},
    eval::EvaluationManager,
    repository::FlagRepository,
    CacheKey, ClientConfig, Error, EvaluationContext, EvaluationResult, FlagConfiguration,
    FlagIdentity, Result,
};

type InFlight = Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>;

enum Lookup {
    Hit(Arc<FlagConfiguration>),
    Miss,
    /// The cache failed or timed out.
    Unavailable,
}

/// Evaluates feature flags: resolves the flag configuration (cache first, repository on a miss)
/// and runs it through the [`EvaluationManager`].
///
/// The client is cheap to share behind an [`Arc`] and safe to call concurrently.
///
/// # Examples
/// ```
/// # use std::sync::Arc;
/// # use switchboard::{ClientConfig, EvaluationContext, FlagConfiguration, InMemoryRepository};
/// # tokio_test_runtime(async {
/// let repository = Arc::new(InMemoryRepository::new());
/// repository.register(FlagConfiguration::global("new-checkout", true)?)?;
///
/// let client = ClientConfig::new().to_client(repository).await?;
/// let context = EvaluationContext::new().with_user_id("user-1");
/// assert!(client.is_enabled("new-checkout", &context).await?);
/// # Ok::<(), switchboard::Error>(())
/// # }).unwrap();
/// # fn tokio_test_runtime<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
pub struct Client {
    repository: Arc<dyn FlagRepository>,
    cache: Arc<dyn ConfigurationCache>,
    manager: EvaluationManager,
    config: ClientConfig,
    in_flight: InFlight,
    invalidations: Arc<Invalidations>,
}

impl Client {
    /// Create a client from its collaborators. [`ClientConfig::to_client`] is usually more
    /// convenient.
    pub fn new(
        config: ClientConfig,
        repository: Arc<dyn FlagRepository>,
        cache: Arc<dyn ConfigurationCache>,
    ) -> Self {
        Client {
            repository,
            cache,
            manager: EvaluationManager::with_default_evaluators(config.default_time_zone),
            config,
            in_flight: Mutex::new(HashMap::new()),
            invalidations: Arc::default(),
        }
    }

    /// Management handle writing to the same repository and invalidating the same cache.
    ///
    /// Its writes also keep repository reads of this client that are still in flight from caching
    /// the configuration they replaced.
    pub fn admin(&self) -> FlagAdmin {
        FlagAdmin::with_invalidations(
            self.repository.clone(),
            self.cache.clone(),
            self.invalidations.clone(),
        )
    }

    /// Identity of `flag_key` in the client's scope.
    pub fn identity(&self, flag_key: &str) -> Result<FlagIdentity> {
        FlagIdentity::new(flag_key, self.config.scope.clone())
    }

    /// Return `true` if the flag is enabled for `context`.
    pub async fn is_enabled(&self, flag_key: &str, context: &EvaluationContext) -> Result<bool> {
        Ok(self.evaluate(flag_key, context).await?.is_enabled)
    }

    /// Evaluate the flag for `context`.
    ///
    /// Fails with [`Error::FlagNotFound`] if the repository does not know the flag, and with a
    /// retryable error if the repository cannot be reached. Cache failures never fail an
    /// evaluation.
    pub async fn evaluate(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<EvaluationResult> {
        let identity = self.identity(flag_key)?;
        self.evaluate_identity(&identity, context).await
    }

    /// Evaluate a flag by explicit identity, regardless of the client's scope.
    pub async fn evaluate_identity(
        &self,
        identity: &FlagIdentity,
        context: &EvaluationContext,
    ) -> Result<EvaluationResult> {
        let config = self.resolve(identity).await?;
        Ok(self.run(&config, context))
    }

    /// [`Client::evaluate`] bounded by an overall deadline.
    pub async fn evaluate_with_timeout(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        deadline: Duration,
    ) -> Result<EvaluationResult> {
        tokio::time::timeout(deadline, self.evaluate(flag_key, context)).await?
    }

    /// Decode the value of the selected variation.
    ///
    /// Returns `default` if the flag is disabled, the variation has no stored value or the value
    /// does not decode as `T`.
    pub async fn get_variation<T: DeserializeOwned>(
        &self,
        flag_key: &str,
        default: T,
        context: &EvaluationContext,
    ) -> Result<T> {
        let identity = self.identity(flag_key)?;
        let config = self.resolve(&identity).await?;
        let result = self.run(&config, context);
        if !result.is_enabled {
            return Ok(default);
        }

        let Some(value) = config.variation(&result.variation) else {
            log::debug!(target: "switchboard",
                flag_key,
                variation = result.variation.as_str();
                "selected variation has no value, using default");
            return Ok(default);
        };

        match T::deserialize(value) {
            Ok(value) => Ok(value),
            Err(err) => {
                log::warn!(target: "switchboard",
                    flag_key,
                    variation = result.variation.as_str();
                    "variation value has unexpected type: {err}");
                Ok(default)
            }
        }
    }

    /// Load every flag from the repository into the cache. Returns the number of flags cached.
    pub async fn preload(&self) -> Result<usize> {
        let ticket = self.invalidations.ticket();
        let flags = self
            .with_deadline(self.repository.get_all())
            .await??;

        let mut cached = 0;
        for config in flags {
            let key = match config.identity() {
                Ok(identity) => identity.cache_key(),
                Err(err) => {
                    log::warn!(target: "switchboard",
                        flag_key = config.key(),
                        error:display = err;
                        "skipping flag with invalid identity");
                    continue;
                }
            };
            if self.store(&key, config, ticket).await {
                cached += 1;
            }
        }
        log::debug!(target: "switchboard", cached; "preloaded flag configurations");
        Ok(cached)
    }

    fn run(&self, config: &FlagConfiguration, context: &EvaluationContext) -> EvaluationResult {
        let result = self.manager.process_evaluation(config, context);
        log::trace!(target: "switchboard",
            flag_key = config.key(),
            user_id = context.user_id(),
            tenant_id = context.tenant_id(),
            result:serde = result;
            "evaluated a flag");
        result
    }

    /// Cached configuration, or a repository fetch that populates the cache.
    ///
    /// A failing cache is consulted once per resolution and not written back to.
    async fn resolve(&self, identity: &FlagIdentity) -> Result<Arc<FlagConfiguration>> {
        let key = identity.cache_key();
        match self.cached(&key).await {
            Lookup::Hit(config) => return Ok(config),
            Lookup::Unavailable => return self.fetch(identity, &key, false).await,
            Lookup::Miss => {}
        }

        if !self.config.coalesce_fetches {
            return self.fetch(identity, &key, true).await;
        }

        let _gate = FetchGate::acquire(&self.in_flight, &key).await;
        // Another task may have populated the cache while this one waited.
        match self.cached(&key).await {
            Lookup::Hit(config) => Ok(config),
            Lookup::Miss => self.fetch(identity, &key, true).await,
            Lookup::Unavailable => self.fetch(identity, &key, false).await,
        }
    }

    async fn cached(&self, key: &CacheKey) -> Lookup {
        match self.with_deadline(self.cache.get(key)).await {
            Ok(Ok(Some(config))) => {
                log::debug!(target: "switchboard", cache_key:display = key; "cache hit");
                Lookup::Hit(config)
            }
            Ok(Ok(None)) => {
                log::debug!(target: "switchboard", cache_key:display = key; "cache miss");
                Lookup::Miss
            }
            Ok(Err(err)) => {
                log::warn!(target: "switchboard",
                    cache_key:display = key,
                    error:display = err;
                    "cache lookup failed, treating as miss");
                Lookup::Unavailable
            }
            Err(_) => {
                log::warn!(target: "switchboard",
                    cache_key:display = key;
                    "cache lookup timed out, treating as miss");
                Lookup::Unavailable
            }
        }
    }

    async fn fetch(
        &self,
        identity: &FlagIdentity,
        key: &CacheKey,
        populate: bool,
    ) -> Result<Arc<FlagConfiguration>> {
        log::debug!(target: "switchboard", flag:display = identity; "fetching flag from repository");
        let ticket = self.invalidations.ticket();
        let config = self
            .with_deadline(self.repository.get(identity))
            .await??
            .ok_or_else(|| Error::FlagNotFound {
                key: identity.to_string(),
            })?;

        if populate {
            self.store(key, config.clone(), ticket).await;
        }
        Ok(config)
    }

    /// Cache a configuration read from the repository after `ticket` was taken. Returns `true` if
    /// the configuration was stored.
    ///
    /// Nothing is stored when the key was invalidated since the read. If the invalidation lands
    /// while the write is in progress, the written entry is removed again.
    async fn store(&self, key: &CacheKey, config: Arc<FlagConfiguration>, ticket: u64) -> bool {
        if self.invalidations.invalidated_since(key, ticket) {
            log::debug!(target: "switchboard",
                cache_key:display = key;
                "flag changed during fetch, not caching");
            return false;
        }

        let ttl = Some(self.config.default_cache_ttl);
        let outcome: std::result::Result<CacheResult<()>, _> =
            self.with_deadline(self.cache.set(key, config, ttl)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::warn!(target: "switchboard",
                    cache_key:display = key,
                    error:display = err;
                    "failed to cache flag configuration");
                return false;
            }
            Err(_) => {
                log::warn!(target: "switchboard",
                    cache_key:display = key;
                    "caching flag configuration timed out");
                return false;
            }
        }

        if !self.invalidations.invalidated_since(key, ticket) {
            return true;
        }
        if !matches!(self.with_deadline(self.cache.remove(key)).await, Ok(Ok(()))) {
            log::warn!(target: "switchboard",
                cache_key:display = key;
                "failed to drop configuration replaced during fetch");
        }
        false
    }

    async fn with_deadline<F: Future>(
        &self,
        future: F,
    ) -> std::result::Result<F::Output, tokio::time::error::Elapsed> {
        tokio::time::timeout(self.config.operation_timeout, future).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

/// Exclusive right to fetch one flag from the repository. Removes its map entry on drop when no
/// other task is waiting for it, including when the fetch is cancelled.
struct FetchGate<'a> {
    in_flight: &'a InFlight,
    key: CacheKey,
    gate: Arc<AsyncMutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl<'a> FetchGate<'a> {
    async fn acquire(in_flight: &'a InFlight, key: &CacheKey) -> FetchGate<'a> {
        let gate = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        let guard = gate.clone().lock_owned().await;
        FetchGate {
            in_flight,
            key: key.clone(),
            gate,
            _guard: guard,
        }
    }
}

impl Drop for FetchGate<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // Held by the map, `self.gate` and the owned guard. Anything more is a waiter.
        let idle = in_flight
            .get(&self.key)
            .is_some_and(|gate| Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) <= 3);
        if idle {
            in_flight.remove(&self.key);
        }
    }
}
