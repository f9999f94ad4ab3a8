use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Utc};

use crate::{
    cache::ConfigurationCache, repository::FlagRepository, CacheKey, FlagConfiguration,
    FlagIdentity, Result,
};

/// Record of cache invalidations shared by a [`Client`](crate::Client) and its admin handles.
///
/// A reader takes a ticket before reading the repository and must not cache what it read if the
/// key was invalidated after that ticket.
#[derive(Debug, Default)]
pub(crate) struct Invalidations {
    inner: Mutex<InvalidationLog>,
}

#[derive(Debug, Default)]
struct InvalidationLog {
    sequence: u64,
    last: HashMap<CacheKey, u64>,
}

impl Invalidations {
    pub(crate) fn ticket(&self) -> u64 {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).sequence
    }

    pub(crate) fn record(&self, key: &CacheKey) {
        let mut log = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        log.sequence += 1;
        let sequence = log.sequence;
        log.last.insert(key.clone(), sequence);
    }

    /// Return `true` if `key` was invalidated after `ticket` was taken.
    pub(crate) fn invalidated_since(&self, key: &CacheKey, ticket: u64) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last
            .get(key)
            .is_some_and(|sequence| *sequence > ticket)
    }
}

/// Management boundary: every write goes to the repository and then drops the affected cache
/// entry before the call returns.
///
/// The evaluation path has no write access and never invalidates the cache on its own, so all
/// changes to stored flags should go through this type (or replicate its invalidation).
#[derive(Clone)]
pub struct FlagAdmin {
    repository: Arc<dyn FlagRepository>,
    cache: Arc<dyn ConfigurationCache>,
    invalidations: Arc<Invalidations>,
}

impl FlagAdmin {
    /// Standalone admin handle. Prefer [`Client::admin`](crate::Client::admin) when a client in
    /// the same process reads these flags: only then can an invalidation stop that client's
    /// in-flight repository reads from caching the old configuration.
    pub fn new(repository: Arc<dyn FlagRepository>, cache: Arc<dyn ConfigurationCache>) -> Self {
        Self::with_invalidations(repository, cache, Arc::default())
    }

    pub(crate) fn with_invalidations(
        repository: Arc<dyn FlagRepository>,
        cache: Arc<dyn ConfigurationCache>,
        invalidations: Arc<Invalidations>,
    ) -> Self {
        Self {
            repository,
            cache,
            invalidations,
        }
    }

    pub async fn create(&self, config: FlagConfiguration) -> Result<Arc<FlagConfiguration>> {
        let identity = config.identity()?;
        let created = self.repository.create(config).await?;
        self.invalidate(&identity).await;
        Ok(created)
    }

    pub async fn update(&self, config: FlagConfiguration) -> Result<Arc<FlagConfiguration>> {
        let identity = config.identity()?;
        let updated = self.repository.update(config).await?;
        self.invalidate(&identity).await;
        Ok(updated)
    }

    /// Delete a flag, returning whether it existed.
    pub async fn delete(&self, identity: &FlagIdentity) -> Result<bool> {
        let deleted = self.repository.delete(identity).await?;
        self.invalidate(identity).await;
        Ok(deleted)
    }

    /// Provision a flag on first use. An existing flag is left untouched.
    pub async fn ensure_flag(&self, config: FlagConfiguration) -> Result<bool> {
        let identity = config.identity()?;
        let created = self.repository.create_if_absent(config).await?;
        if created {
            self.invalidate(&identity).await;
        }
        Ok(created)
    }

    /// Flags due to expire before `before`, for cleanup tooling.
    pub async fn expiring_before(&self, before: DateTime<Utc>) -> Result<Vec<Arc<FlagConfiguration>>> {
        self.repository.get_expiring(before).await
    }

    async fn invalidate(&self, identity: &FlagIdentity) {
        let key = identity.cache_key();
        self.invalidations.record(&key);
        // The write already succeeded; a stale entry is bounded by its TTL.
        if let Err(err) = self.cache.remove(&key).await {
            log::warn!(target: "switchboard",
                cache_key:display = key,
                error:display = err;
                "failed to invalidate cached flag configuration");
        }
    }
}

impl std::fmt::Debug for FlagAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagAdmin").finish_non_exhaustive()
    }
}
