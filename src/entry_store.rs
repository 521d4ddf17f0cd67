use crate::refresh::RefreshCoordinator;
use crate::store::{KeyTtl, RemoteStore};
use crate::StoreError;
use reheat_core::{CacheConfig, CacheKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(feature = "stats")]
use reheat_core::CacheStats;

/// One logical cache in front of the remote store.
///
/// Entries are written with the cache's TTL under `"{name}:{key}"`. Every
/// hit checks the remaining TTL and, when it is at or below the preload
/// threshold, hands the key to the [`RefreshCoordinator`]. The hit itself
/// returns the current value immediately.
///
/// Cheap to clone; clones share configuration, statistics and the
/// coordinator.
#[derive(Clone)]
pub struct CacheEntryStore {
    config: Arc<CacheConfig>,
    store: Arc<dyn RemoteStore>,
    coordinator: RefreshCoordinator,
    #[cfg(feature = "stats")]
    stats: Arc<CacheStats>,
}

impl CacheEntryStore {
    pub(crate) fn new(
        config: CacheConfig,
        store: Arc<dyn RemoteStore>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            coordinator,
            #[cfg(feature = "stats")]
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Name this cache was configured with.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Resolved TTL and preload threshold.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store key of `key` in this cache.
    pub fn entry_key(&self, key: &CacheKey) -> String {
        format!("{}:{}", self.config.name, key)
    }

    /// Reads `key`, scheduling a background refresh when the entry is close
    /// to expiry.
    ///
    /// # Errors
    ///
    /// Only the read itself can fail. A failing TTL lookup on a hit is
    /// logged and the value is still returned.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, StoreError> {
        let entry_key = self.entry_key(key);
        let Some(value) = self.store.get(&entry_key).await? else {
            #[cfg(feature = "stats")]
            self.stats.record_miss();
            return Ok(None);
        };

        #[cfg(feature = "stats")]
        self.stats.record_hit();

        if self.config.refresh_enabled() {
            match self.store.ttl(&entry_key).await {
                Ok(ttl) if self.is_due(ttl) => {
                    debug!(
                        cache = %self.config.name,
                        key = %key,
                        ?ttl,
                        preload = self.config.preload_secs,
                        "entry within preload threshold, scheduling refresh"
                    );
                    #[cfg(feature = "stats")]
                    self.stats.record_refresh_trigger();
                    self.coordinator.submit(self, key);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        cache = %self.config.name,
                        key = %key,
                        error = %err,
                        "failed to read entry TTL"
                    );
                }
            }
        }

        Ok(Some(value))
    }

    /// Whether an entry reporting `ttl` is due for a refresh.
    ///
    /// A key that vanished between the read and the TTL lookup counts as
    /// due; a key without expiry never does.
    pub(crate) fn is_due(&self, ttl: KeyTtl) -> bool {
        match ttl {
            KeyTtl::Expires(remaining) => self.config.is_due(remaining),
            KeyTtl::Missing => self.config.refresh_enabled(),
            KeyTtl::Persistent => false,
        }
    }

    /// Re-reads the entry's TTL and reports whether it is still due.
    pub(crate) async fn needs_refresh(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let ttl = self.store.ttl(&self.entry_key(key)).await?;
        Ok(self.is_due(ttl))
    }

    /// Writes `value` under `key` with the cache's TTL.
    ///
    /// Caches configured with a TTL of 0 keep nothing.
    pub async fn put(&self, key: &CacheKey, value: &[u8]) -> Result<(), StoreError> {
        if self.config.ttl_secs == 0 {
            debug!(cache = %self.config.name, key = %key, "zero TTL, not caching");
            return Ok(());
        }
        self.store
            .set_ex(&self.entry_key(key), value, self.config.ttl_secs)
            .await
    }

    /// Removes `key`; returns whether it was present.
    pub async fn evict(&self, key: &CacheKey) -> Result<bool, StoreError> {
        self.store.delete(&self.entry_key(key)).await
    }

    /// Remaining TTL of `key` as reported by the store.
    pub async fn remaining_ttl(&self, key: &CacheKey) -> Result<KeyTtl, StoreError> {
        self.store.ttl(&self.entry_key(key)).await
    }

    /// [`get`](Self::get) decoding the value as JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// [`put`](Self::put) encoding the value as JSON.
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, &bytes).await
    }

    /// Hit, miss and refresh trigger counters of this cache.
    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl fmt::Debug for CacheEntryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntryStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
