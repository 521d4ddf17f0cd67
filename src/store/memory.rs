use super::{KeyTtl, RemoteStore};
use crate::StoreError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use tokio::time::{Duration, Instant};

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(bytes: &[u8], ttl_secs: u64) -> Self {
        Self {
            bytes: bytes.to_vec(),
            expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    fn ttl(&self, now: Instant) -> KeyTtl {
        match self.expires_at {
            None => KeyTtl::Persistent,
            // Rounded to the nearest second, like Redis
            Some(at) => {
                let millis = at.saturating_duration_since(now).as_millis();
                KeyTtl::Expires(((millis + 500) / 1000) as u64)
            }
        }
    }
}

/// In-process [`RemoteStore`] with Redis expiry semantics.
///
/// Expired keys are dropped on access, and writes sweep out every expired
/// key at most once per [`SWEEP_INTERVAL`](Self::SWEEP_INTERVAL), so keys
/// that are never read again do not pile up. Time comes from the Tokio
/// clock, so tests running with a paused runtime can move entries through
/// their TTL with `tokio::time::advance`.
///
/// Sharing one `MemoryStore` between several `CacheManager`s simulates
/// several processes in front of the same remote store.
///
/// # Examples
///
/// ```
/// # tokio_test_block_on(async {
/// use reheat::{KeyTtl, MemoryStore, RemoteStore};
///
/// let store = MemoryStore::new();
/// store.set_ex("orders:1", b"v1", 60).await.unwrap();
///
/// assert_eq!(store.get("orders:1").await.unwrap(), Some(b"v1".to_vec()));
/// assert_eq!(store.ttl("orders:1").await.unwrap(), KeyTtl::Expires(60));
/// assert!(!store.set_nx_ex("orders:1", b"v2", 60).await.unwrap());
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
/// # }
/// ```
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    cache_names: RwLock<BTreeSet<String>>,
    next_sweep: Mutex<Instant>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            cache_names: RwLock::new(BTreeSet::new()),
            next_sweep: Mutex::new(Instant::now() + Self::SWEEP_INTERVAL),
        }
    }
}

impl MemoryStore {
    /// Minimum time between two write-triggered sweeps.
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired key and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, value| !value.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Sweeps on the write path once the interval has elapsed. Concurrent
    /// writers skip the sweep instead of waiting for it.
    fn sweep_if_due(&self) {
        let now = Instant::now();
        let Some(mut next_sweep) = self.next_sweep.try_lock() else {
            return;
        };
        if now < *next_sweep {
            return;
        }
        *next_sweep = now + Self::SWEEP_INTERVAL;
        drop(next_sweep);
        self.purge_expired();
    }

    /// Number of keys that have not expired yet.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    /// Whether no live key is left.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies `f` to the live value of `key`, dropping it if it expired.
    fn read<R>(&self, key: &str, f: impl FnOnce(&StoredValue, Instant) -> R) -> Option<R> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(f(entry.value(), now));
            }
        }
        self.entries.remove_if(key, |_, value| value.is_expired(now));
        None
    }

    fn check_ttl(command: &str, ttl_secs: u64) -> Result<(), StoreError> {
        if ttl_secs == 0 {
            return Err(StoreError::Command(format!(
                "invalid expire time in '{command}' command"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read(key, |value, _| value.bytes.clone()))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError> {
        Self::check_ttl("set", ttl_secs)?;
        self.sweep_if_due();
        self.entries.insert(key.to_string(), StoredValue::new(value, ttl_secs));
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        Self::check_ttl("set", ttl_secs)?;
        self.sweep_if_due();
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(StoredValue::new(value, ttl_secs));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, ttl_secs));
                Ok(true)
            }
        }
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        Ok(self
            .read(key, |value, now| value.ttl(now))
            .unwrap_or(KeyTtl::Missing))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        if ttl_secs == 0 {
            return self.delete(key).await;
        }
        let now = Instant::now();
        let renewed = match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + Duration::from_secs(ttl_secs));
                true
            }
            _ => false,
        };
        if !renewed {
            self.entries.remove_if(key, |_, value| value.is_expired(now));
        }
        Ok(renewed)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map_or(false, |(_, value)| !value.is_expired(now)))
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove_if(key, |_, value| {
                !value.is_expired(now) && value.bytes == expected
            })
            .is_some())
    }

    fn register_cache_name(&self, name: &str) {
        self.cache_names.write().insert(name.to_string());
    }

    fn cache_names(&self) -> Vec<String> {
        self.cache_names.read().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let store = MemoryStore::new();
        store.set_ex("k", b"v", 10).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Expires(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Missing);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_rounds_to_nearest_second() {
        let store = MemoryStore::new();
        store.set_ex("k", b"v", 100).await.unwrap();

        tokio::time::advance(Duration::from_millis(85_400)).await;
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Expires(15));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Expires(14));
    }

    #[tokio::test]
    async fn test_zero_ttl_is_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.set_ex("k", b"v", 0).await,
            Err(StoreError::Command(_))
        ));
        assert!(store.set_nx_ex("k", b"v", 0).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_succeeds_once_key_expired() {
        let store = MemoryStore::new();
        assert!(store.set_nx_ex("lock", b"a", 5).await.unwrap());
        assert!(!store.set_nx_ex("lock", b"b", 5).await.unwrap());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.set_nx_ex("lock", b"b", 5).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some(b"b".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_renews_live_keys_only() {
        let store = MemoryStore::new();
        store.set_ex("k", b"v", 10).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(store.expire("k", 10).await.unwrap());
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Expires(10));

        assert!(!store.expire("missing", 10).await.unwrap());
        assert!(store.expire("k", 0).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_if_eq_compares_value() {
        let store = MemoryStore::new();
        store.set_ex("lock", b"owner-a", 30).await.unwrap();

        assert!(!store.delete_if_eq("lock", b"owner-b").await.unwrap());
        assert!(store.delete_if_eq("lock", b"owner-a").await.unwrap());
        assert!(!store.delete_if_eq("lock", b"owner-a").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_keys_that_are_never_read_again() {
        let store = MemoryStore::new();
        for i in 0..10_000 {
            store.set_ex(&format!("short:{i}"), b"v", 1).await.unwrap();
        }
        assert_eq!(store.entries.len(), 10_000);

        tokio::time::advance(Duration::from_secs(5)).await;
        for i in 0..100 {
            store.set_ex(&format!("live:{i}"), b"v", 60).await.unwrap();
        }

        assert_eq!(store.len(), 100);
        assert_eq!(store.entries.len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_keys_are_swept_by_set_nx() {
        let store = MemoryStore::new();
        assert!(store.set_nx_ex("a_lock", b"owner", 2).await.unwrap());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(store.set_nx_ex("b_lock", b"owner", 2).await.unwrap());
        assert!(store.entries.get("a_lock").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_counts_removed_keys() {
        let store = MemoryStore::new();
        store.set_ex("short", b"v", 1).await.unwrap();
        store.set_ex("long", b"v", 60).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_names_are_sorted_and_unique() {
        let store = MemoryStore::new();
        store.register_cache_name("users");
        store.register_cache_name("orders");
        store.register_cache_name("users");
        assert_eq!(store.cache_names(), vec!["orders", "users"]);
    }
}
