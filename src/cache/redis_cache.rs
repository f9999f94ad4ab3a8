//! Redis-backed configuration cache, shared between service instances.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use rand::{thread_rng, Rng};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tokio::{sync::OnceCell, time::Instant};

use crate::{
    cache::{CacheConfig, CacheError, CacheResult, ConfigurationCache},
    CacheKey, FlagConfiguration,
};

const RETRY_BACKOFF: Duration = Duration::from_millis(200);
const RETRY_JITTER: Duration = Duration::from_millis(100);
const SCAN_BATCH: usize = 500;

/// Redis configuration cache.
///
/// Configurations are stored as JSON under `{key_prefix}:{cache_key}` with a Redis-side TTL. The
/// cache does not fail to start when Redis is unreachable. Until a connection is established every
/// operation fails immediately with [`CacheError::Connection`] (which callers treat as a miss),
/// and a new connection attempt runs in the background at most once per
/// [`CacheConfig::reconnect_interval`].
pub struct RedisCache {
    connector: Arc<Connector>,
    config: CacheConfig,
}

impl RedisCache {
    /// Create a Redis cache and attempt the initial connection.
    ///
    /// Fails only if the connection URL is malformed.
    pub async fn new(config: CacheConfig) -> CacheResult<Self> {
        let url = match &config.backend {
            crate::cache::CacheBackend::Redis { url } => url.as_str(),
            other => {
                return Err(CacheError::Config(format!(
                    "expected a redis backend, got {other:?}"
                )))
            }
        };
        let client = Client::open(url).map_err(|e| CacheError::Config(e.to_string()))?;

        let connector = Arc::new(Connector::new(client, &config));
        connector.connecting.store(true, Ordering::SeqCst);
        connector.reconnect().await;

        Ok(Self { connector, config })
    }

    async fn connection(&self) -> CacheResult<ConnectionManager> {
        if let Some(connection) = self.connector.connection.get() {
            return Ok(connection.clone());
        }

        if self.connector.try_begin_reconnect() {
            let connector = self.connector.clone();
            tokio::spawn(async move { connector.reconnect().await });
        }
        Err(CacheError::Connection("redis is not connected".to_owned()))
    }

    fn build_key(&self, key: &CacheKey) -> String {
        self.config.build_key(key.as_str())
    }
}

/// Connection state shared with background reconnect tasks.
struct Connector {
    client: Client,
    connection_timeout: Duration,
    max_retries: u32,
    reconnect_interval: Duration,
    connection: OnceCell<ConnectionManager>,
    /// Earliest instant of the next connection attempt after a failed one.
    retry_at: Mutex<Option<Instant>>,
    connecting: AtomicBool,
}

impl Connector {
    fn new(client: Client, config: &CacheConfig) -> Self {
        Self {
            client,
            connection_timeout: config.connection_timeout,
            max_retries: config.max_retries,
            reconnect_interval: config.reconnect_interval,
            connection: OnceCell::new(),
            retry_at: Mutex::new(None),
            connecting: AtomicBool::new(false),
        }
    }

    /// Claim the next connection attempt. Returns `false` while one is running or the reconnect
    /// interval since the last failure has not passed.
    fn try_begin_reconnect(&self) -> bool {
        let retry_at = *self.retry_at.lock().unwrap_or_else(PoisonError::into_inner);
        let due = retry_at.map_or(true, |retry_at| Instant::now() >= retry_at);
        due && !self.connecting.swap(true, Ordering::SeqCst)
    }

    /// Run one round of connection attempts. The caller must hold the `connecting` claim.
    async fn reconnect(&self) {
        match self.connect().await {
            Ok(connection) => {
                // Only one reconnect runs at a time, so the cell is still empty.
                let _ = self.connection.set(connection);
                log::info!(target: "switchboard", "connected to redis");
                self.connecting.store(false, Ordering::SeqCst);
            }
            Err(err) => {
                self.record_failure();
                log::warn!(target: "switchboard",
                    error:display = err,
                    retry_in_secs = self.reconnect_interval.as_secs();
                    "redis cache unavailable, continuing in degraded mode");
            }
        }
    }

    fn record_failure(&self) {
        *self.retry_at.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Instant::now() + self.reconnect_interval);
        self.connecting.store(false, Ordering::SeqCst);
    }

    async fn connect(&self) -> CacheResult<ConnectionManager> {
        let attempts = self.max_retries.max(1);
        let mut last_error = CacheError::Connection("no connection attempt made".to_owned());

        for attempt in 1..=attempts {
            log::debug!(target: "switchboard",
                attempt = attempt,
                max_attempts = attempts;
                "connecting to redis");
            let result = tokio::time::timeout(
                self.connection_timeout,
                ConnectionManager::new(self.client.clone()),
            )
            .await;
            match result {
                Ok(Ok(connection)) => return Ok(connection),
                Ok(Err(err)) => last_error = CacheError::Connection(err.to_string()),
                Err(_) => last_error = CacheError::Timeout,
            }
            if attempt < attempts {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }

        Err(last_error)
    }
}

/// Linear backoff with random jitter so that instances restarted together do not reconnect in
/// lockstep.
fn backoff(attempt: u32) -> Duration {
    RETRY_BACKOFF * attempt + thread_rng().gen_range(Duration::ZERO..RETRY_JITTER)
}

#[async_trait]
impl ConfigurationCache for RedisCache {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Arc<FlagConfiguration>>> {
        let key = self.build_key(key);
        let mut conn = self.connection().await?;

        let value: Option<String> = conn.get(&key).await?;
        value
            .map(|json| {
                serde_json::from_str::<FlagConfiguration>(&json)
                    .map(Arc::new)
                    .map_err(|e| CacheError::Deserialization(e.to_string()))
            })
            .transpose()
    }

    async fn set(
        &self,
        key: &CacheKey,
        config: Arc<FlagConfiguration>,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let key = self.build_key(key);
        let json = serde_json::to_string(config.as_ref())
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        // Redis expiry has whole-second resolution.
        let ttl_seconds = ttl.unwrap_or(self.config.default_ttl).as_secs().max(1);

        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(&key, json, ttl_seconds).await?;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        let key = self.build_key(key);
        let mut conn = self.connection().await?;
        let _: () = conn.del(&key).await?;
        Ok(())
    }

    /// Removes every key under the configured prefix. Other data in the same database is kept.
    ///
    /// Keys are walked with `SCAN` in batches, so a shared server is never blocked for the whole
    /// keyspace.
    async fn clear(&self) -> CacheResult<()> {
        let pattern = self.config.build_key("*");
        let mut conn = self.connection().await?;
        let mut cursor = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let _: () = conn.del(keys).await?;
            }
            if next == 0 {
                return Ok(());
            }
            cursor = next;
        }
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("config", &self.config)
            .field("connected", &self.connector.connection.initialized())
            .finish()
    }
}
