use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::RwLock, time::Instant};

use crate::{
    cache::{CacheResult, ConfigurationCache},
    CacheKey, FlagConfiguration,
};

/// Bounded, process-local configuration cache with per-entry expiry.
///
/// When the cache is full, expired entries are dropped first, then the entry closest to expiring.
#[derive(Debug)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    max_entries: usize,
    default_ttl: Duration,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    config: Arc<FlagConfiguration>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl InMemoryCache {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            default_ttl,
        }
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn make_room(entries: &mut HashMap<CacheKey, CacheEntry>, max_entries: usize, now: Instant) {
        if entries.len() < max_entries {
            return;
        }
        entries.retain(|_, entry| entry.is_live(now));
        if entries.len() < max_entries {
            return;
        }
        let soonest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = soonest {
            entries.remove(&key);
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(
            crate::cache::CacheConfig::DEFAULT_MAX_ENTRIES,
            crate::cache::DEFAULT_TTL,
        )
    }
}

#[async_trait]
impl ConfigurationCache for InMemoryCache {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Arc<FlagConfiguration>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.config.clone()))
    }

    async fn set(
        &self,
        key: &CacheKey,
        config: Arc<FlagConfiguration>,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let now = Instant::now();
        let entry = CacheEntry {
            config,
            expires_at: now + ttl.unwrap_or(self.default_ttl),
        };

        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) {
            Self::make_room(&mut entries, self.max_entries, now);
        }
        entries.insert(key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlagIdentity;

    fn entry(key: &str) -> (CacheKey, Arc<FlagConfiguration>) {
        let identity = FlagIdentity::global(key).unwrap();
        let config = FlagConfiguration::new(identity.clone());
        (identity.cache_key(), Arc::new(config))
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip() {
        let cache = InMemoryCache::default();
        let (key, config) = entry("checkout");

        cache.set(&key, config.clone(), None).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(config));

        cache.remove(&key).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryCache::default();
        let (key, config) = entry("checkout");

        cache
            .set(&key, config, Some(Duration::from_secs(10)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get(&key).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn default_ttl_is_five_minutes() {
        let cache = InMemoryCache::default();
        let (key, config) = entry("checkout");

        cache.set(&key, config, None).await.unwrap();
        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get(&key).await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_when_full() {
        let cache = InMemoryCache::new(2, Duration::from_secs(60));
        let (a, config_a) = entry("a");
        let (b, config_b) = entry("b");
        let (c, config_c) = entry("c");

        cache
            .set(&a, config_a, Some(Duration::from_secs(10)))
            .await
            .unwrap();
        cache.set(&b, config_b, None).await.unwrap();
        cache.set(&c, config_c, None).await.unwrap();

        assert_eq!(cache.len().await, 2);
        assert!(cache.get(&a).await.unwrap().is_none());
        assert!(cache.get(&b).await.unwrap().is_some());
        assert!(cache.get(&c).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let cache = InMemoryCache::default();
        for name in ["a", "b", "c"] {
            let (key, config) = entry(name);
            cache.set(&key, config, None).await.unwrap();
        }
        cache.clear().await.unwrap();
        assert!(cache.is_empty().await);
    }
}
