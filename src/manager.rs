use crate::entry_store::CacheEntryStore;
use crate::invoker::Invoker;
use crate::refresh::{RefreshCoordinator, RefreshOutcome, RefreshStats};
use crate::registry::RecomputationRegistry;
use crate::store::RemoteStore;
use crate::CacheError;
use parking_lot::RwLock;
use reheat_core::config::cache_name;
use reheat_core::{
    CacheConfig, CacheKey, CacheSettings, ConfigError, HyphenKeyGenerator, Invocation,
    KeyGenerator, NoProperties, PropertyResolver,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Entry point of the cache: owns one [`CacheEntryStore`] per logical cache
/// name and the refresh machinery they share.
///
/// Caches are created lazily from `name#ttl#preload` configuration strings
/// the first time a name is seen; later strings for the same name return the
/// existing cache unchanged.
///
/// # Examples
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// use reheat::{CacheManager, MemoryStore, OperationTable};
/// use reheat_core::Invocation;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let table = OperationTable::new();
/// table.register_json("OrderService", "find_order", |d| async move {
///     let id: u64 = serde_json::from_value(d.arguments[0].clone())?;
///     Ok(json!({ "id": id }))
/// });
///
/// let manager = CacheManager::builder(Arc::new(MemoryStore::new()), Arc::new(table))
///     .build()
///     .unwrap();
///
/// let call = Invocation::new("OrderService", "find_order")
///     .with_arg("u64", json!(42))
///     .with_cache("orders#600#60");
///
/// let value = manager.get_or_invoke(&call).await.unwrap();
/// assert_eq!(value, br#"{"id":42}"#.to_vec());
/// assert_eq!(manager.cache_names(), vec!["orders"]);
/// # });
/// ```
pub struct CacheManager {
    store: Arc<dyn RemoteStore>,
    invoker: Arc<dyn Invoker>,
    registry: RecomputationRegistry,
    coordinator: RefreshCoordinator,
    settings: CacheSettings,
    resolver: Box<dyn PropertyResolver>,
    key_generator: Box<dyn KeyGenerator>,
    caches: RwLock<HashMap<String, CacheEntryStore>>,
}

/// Builder for [`CacheManager`].
pub struct CacheManagerBuilder {
    store: Arc<dyn RemoteStore>,
    invoker: Arc<dyn Invoker>,
    settings: CacheSettings,
    resolver: Box<dyn PropertyResolver>,
    key_generator: Box<dyn KeyGenerator>,
}

impl CacheManagerBuilder {
    /// Defaults to [`CacheSettings::default`].
    pub fn settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Resolver for `${...}` placeholders in cache configuration strings.
    /// Defaults to [`NoProperties`].
    pub fn resolver(mut self, resolver: impl PropertyResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Defaults to [`HyphenKeyGenerator`].
    pub fn key_generator(mut self, key_generator: impl KeyGenerator + 'static) -> Self {
        self.key_generator = Box::new(key_generator);
        self
    }

    /// Validates the settings and starts the refresh workers.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn build(self) -> Result<CacheManager, ConfigError> {
        self.settings.validate()?;
        let coordinator =
            RefreshCoordinator::new(self.store.clone(), self.invoker.clone(), &self.settings);

        Ok(CacheManager {
            registry: RecomputationRegistry::new(self.store.clone()),
            store: self.store,
            invoker: self.invoker,
            coordinator,
            settings: self.settings,
            resolver: self.resolver,
            key_generator: self.key_generator,
            caches: RwLock::new(HashMap::new()),
        })
    }
}

impl CacheManager {
    /// Starts a manager over `store`, recomputing values through `invoker`.
    pub fn builder(store: Arc<dyn RemoteStore>, invoker: Arc<dyn Invoker>) -> CacheManagerBuilder {
        CacheManagerBuilder {
            store,
            invoker,
            settings: CacheSettings::default(),
            resolver: Box::new(NoProperties),
            key_generator: Box::new(HyphenKeyGenerator),
        }
    }

    /// Returns the cache named by `raw`, creating it on first use.
    ///
    /// Placeholders are resolved only when the cache is created. Concurrent
    /// first calls for one name create exactly one cache.
    ///
    /// # Errors
    ///
    /// [`CacheError::Config`] when `raw` cannot be parsed.
    pub fn get_or_create(&self, raw: &str) -> Result<CacheEntryStore, CacheError> {
        let name = cache_name(raw);
        if let Some(cache) = self.caches.read().get(name) {
            return Ok(cache.clone());
        }

        let mut caches = self.caches.write();
        if let Some(cache) = caches.get(name) {
            return Ok(cache.clone());
        }

        let config =
            CacheConfig::parse(raw, self.settings.default_ttl_secs, self.resolver.as_ref())?;
        self.store.register_cache_name(&config.name);
        info!(
            cache = %config.name,
            ttl_secs = config.ttl_secs,
            preload_secs = config.preload_secs,
            "cache created"
        );

        let cache = CacheEntryStore::new(config, self.store.clone(), self.coordinator.clone());
        caches.insert(cache.name().to_string(), cache.clone());
        Ok(cache)
    }

    /// The cache called `name`, if it was created already.
    pub fn cache(&self, name: &str) -> Option<CacheEntryStore> {
        self.caches.read().get(name).cloned()
    }

    /// Names of all caches created so far, sorted.
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Records how to recompute the value of `invocation` in every cache it
    /// names, and returns the key it is cached under.
    ///
    /// Descriptors get the TTL of their cache. Registering the same call
    /// again overwrites the descriptor with an identical one.
    pub async fn register_invocation(
        &self,
        invocation: &Invocation,
    ) -> Result<CacheKey, CacheError> {
        let caches = self.caches_of(invocation)?;
        let key = invocation.key(self.key_generator.as_ref());
        self.register_descriptor(&caches, invocation, &key).await?;
        Ok(key)
    }

    /// Recomputes `key` in `cache_name` right away, whatever its remaining
    /// TTL.
    ///
    /// The refresh lock is still taken, so a refresh running elsewhere makes
    /// this return [`RefreshOutcome::LockDenied`] without recomputing.
    pub async fn refresh_by_key(
        &self,
        cache_name: &str,
        key: &CacheKey,
    ) -> Result<RefreshOutcome, CacheError> {
        let cache = self.get_or_create(cache_name)?;
        Ok(self.coordinator.refresh_now(&cache, key).await)
    }

    /// Returns the cached value of `invocation`, computing it on a miss.
    ///
    /// The named caches are read in order and the first hit wins. On a miss
    /// the invocation is registered, executed through the invoker, and its
    /// result written to every named cache.
    pub async fn get_or_invoke(&self, invocation: &Invocation) -> Result<Vec<u8>, CacheError> {
        let caches = self.caches_of(invocation)?;
        let key = invocation.key(self.key_generator.as_ref());

        for cache in &caches {
            if let Some(value) = cache.get(&key).await? {
                return Ok(value);
            }
        }

        self.register_descriptor(&caches, invocation, &key).await?;
        let value = self.invoker.invoke(&invocation.descriptor(key.clone())).await?;
        for cache in &caches {
            cache.put(&key, &value).await?;
        }
        Ok(value)
    }

    /// Distinct caches named by `invocation`, in order.
    fn caches_of(&self, invocation: &Invocation) -> Result<Vec<CacheEntryStore>, CacheError> {
        if invocation.cache_names.is_empty() {
            return Err(CacheError::NoCacheNames {
                operation: invocation.operation.clone(),
            });
        }

        let mut seen = HashSet::new();
        let mut caches = Vec::with_capacity(invocation.cache_names.len());
        for raw in &invocation.cache_names {
            let cache = self.get_or_create(raw)?;
            if seen.insert(cache.name().to_string()) {
                caches.push(cache);
            }
        }
        Ok(caches)
    }

    async fn register_descriptor(
        &self,
        caches: &[CacheEntryStore],
        invocation: &Invocation,
        key: &CacheKey,
    ) -> Result<(), CacheError> {
        let descriptor = invocation.descriptor(key.clone());
        for cache in caches {
            self.registry
                .register(&cache.entry_key(key), &descriptor, cache.config().ttl_secs)
                .await?;
        }
        Ok(())
    }

    /// Settings the manager was built with.
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Descriptor registry shared by all caches.
    pub fn registry(&self) -> &RecomputationRegistry {
        &self.registry
    }

    /// Refresh workers shared by all caches.
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Outcome counters of background and forced refreshes.
    pub fn refresh_stats(&self) -> &RefreshStats {
        self.coordinator.stats()
    }

    /// Waits for every queued or running background refresh to finish.
    pub async fn drain(&self) {
        self.coordinator.drain().await;
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("settings", &self.settings)
            .field("caches", &self.cache_names())
            .finish_non_exhaustive()
    }
}
