//! Flag storage boundary.
//!
//! The engine only ever reads through [`FlagRepository::get`]; writes happen at the management
//! boundary ([`FlagAdmin`](crate::FlagAdmin)), which also invalidates the cache.
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{configuration::TryParse, Error, FlagConfiguration, FlagIdentity, Result};

/// Persistent store of flag configurations.
///
/// Every operation is async and cancelled by dropping its future. Implementations report I/O
/// failures as [`Error::BackendUnavailable`].
#[async_trait]
pub trait FlagRepository: Send + Sync {
    /// Fetch one flag. `Ok(None)` means the flag does not exist.
    async fn get(&self, identity: &FlagIdentity) -> Result<Option<Arc<FlagConfiguration>>>;

    async fn get_all(&self) -> Result<Vec<Arc<FlagConfiguration>>>;

    /// Flags carrying at least one of `tags`.
    async fn get_by_tags(&self, tags: &[String]) -> Result<Vec<Arc<FlagConfiguration>>>;

    /// Store a new flag. Fails with [`Error::FlagAlreadyExists`] if the identity is taken.
    async fn create(&self, config: FlagConfiguration) -> Result<Arc<FlagConfiguration>>;

    /// Replace an existing flag. Fails with [`Error::FlagNotFound`] if it does not exist.
    async fn update(&self, config: FlagConfiguration) -> Result<Arc<FlagConfiguration>>;

    /// Delete a flag, returning whether it existed.
    async fn delete(&self, identity: &FlagIdentity) -> Result<bool>;

    /// Non-permanent flags whose expiration date is before `before`.
    async fn get_expiring(&self, before: DateTime<Utc>) -> Result<Vec<Arc<FlagConfiguration>>>;

    /// Create the flag unless one with the same identity already exists.
    ///
    /// Returns `true` if the flag was created. Used to provision flags on first use, so an
    /// existing flag is success rather than an error.
    async fn create_if_absent(&self, config: FlagConfiguration) -> Result<bool> {
        match self.create(config).await {
            Ok(_) => Ok(true),
            Err(Error::FlagAlreadyExists { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Data-driven flag registry held in memory.
///
/// Flags are added by explicit registration or bulk-loaded from JSON.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    flags: RwLock<HashMap<FlagIdentity, Arc<FlagConfiguration>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a flag.
    pub fn register(&self, config: FlagConfiguration) -> Result<()> {
        let identity = config.identity()?;
        let config = Arc::new(config);
        self.write()?.insert(identity, config);
        Ok(())
    }

    /// Build a registry from a JSON array of flag configurations.
    ///
    /// Entries that fail to parse or carry an invalid identity are logged and skipped, so one
    /// broken flag does not take the others down with it. Only a document that is not a JSON
    /// array is rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<TryParse<FlagConfiguration>> = serde_json::from_str(json)
            .map_err(|err| Error::InvalidContext(format!("invalid flag document: {err}")))?;

        let repository = Self::new();
        for (index, entry) in entries.into_iter().enumerate() {
            let config = match entry {
                TryParse::Parsed(config) => config,
                TryParse::ParseFailed(value) => {
                    log::warn!(target: "switchboard",
                        index = index,
                        key:display = value.get("key").unwrap_or(&serde_json::Value::Null);
                        "skipping unparseable flag configuration");
                    continue;
                }
            };
            if let Err(err) = repository.register(config) {
                log::warn!(target: "switchboard",
                    index = index,
                    error:display = err;
                    "skipping flag configuration with invalid identity");
            }
        }
        Ok(repository)
    }

    /// Number of registered flags.
    pub fn len(&self) -> usize {
        self.flags.read().map(|flags| flags.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<FlagIdentity, Arc<FlagConfiguration>>>>
    {
        // Err() only if a writer panicked while holding the lock.
        self.flags
            .read()
            .map_err(|_| Error::BackendUnavailable("flag registry lock poisoned".to_owned()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<FlagIdentity, Arc<FlagConfiguration>>>>
    {
        self.flags
            .write()
            .map_err(|_| Error::BackendUnavailable("flag registry lock poisoned".to_owned()))
    }

    fn select(
        &self,
        predicate: impl Fn(&FlagConfiguration) -> bool,
    ) -> Result<Vec<Arc<FlagConfiguration>>> {
        let mut selected = self
            .read()?
            .values()
            .filter(|config| predicate(config))
            .cloned()
            .collect::<Vec<_>>();
        selected.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(selected)
    }
}

#[async_trait]
impl FlagRepository for InMemoryRepository {
    async fn get(&self, identity: &FlagIdentity) -> Result<Option<Arc<FlagConfiguration>>> {
        Ok(self.read()?.get(identity).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Arc<FlagConfiguration>>> {
        self.select(|_| true)
    }

    async fn get_by_tags(&self, tags: &[String]) -> Result<Vec<Arc<FlagConfiguration>>> {
        self.select(|config| config.tags().iter().any(|tag| tags.contains(tag)))
    }

    async fn create(&self, config: FlagConfiguration) -> Result<Arc<FlagConfiguration>> {
        let identity = config.identity()?;
        let config = Arc::new(config);

        let mut flags = self.write()?;
        if flags.contains_key(&identity) {
            return Err(Error::FlagAlreadyExists {
                key: identity.to_string(),
            });
        }
        flags.insert(identity, config.clone());
        Ok(config)
    }

    async fn update(&self, config: FlagConfiguration) -> Result<Arc<FlagConfiguration>> {
        let identity = config.identity()?;
        let config = Arc::new(config);

        let mut flags = self.write()?;
        match flags.get_mut(&identity) {
            Some(slot) => {
                *slot = config.clone();
                Ok(config)
            }
            None => Err(Error::FlagNotFound {
                key: identity.to_string(),
            }),
        }
    }

    async fn delete(&self, identity: &FlagIdentity) -> Result<bool> {
        Ok(self.write()?.remove(identity).is_some())
    }

    async fn get_expiring(&self, before: DateTime<Utc>) -> Result<Vec<Arc<FlagConfiguration>>> {
        self.select(|config| {
            let retention = config.retention();
            !retention.permanent
                && retention
                    .expiration_date
                    .is_some_and(|expiration| expiration < before)
        })
    }
}
