use crate::store::RemoteStore;
use crate::StoreError;
use reheat_core::RecomputationDescriptor;
use std::sync::Arc;
use tracing::debug;

/// Keeps the [`RecomputationDescriptor`] of every cached entry next to the
/// entry itself, so any process can regenerate a value it never computed.
///
/// Descriptors live under `entry_key + ":invocation_cache_key_suffix"` with
/// the same TTL as their entry, and their TTL is renewed on every
/// successful refresh so they neither outlive nor precede the value.
///
/// Registration is last-writer-wins. That is safe because registering the
/// same call twice writes the same descriptor.
#[derive(Clone)]
pub struct RecomputationRegistry {
    store: Arc<dyn RemoteStore>,
}

impl RecomputationRegistry {
    /// Appended to an entry key to form its descriptor key.
    pub const DESCRIPTOR_SUFFIX: &'static str = ":invocation_cache_key_suffix";

    /// Registry keeping its descriptors in `store`.
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Store key of the descriptor belonging to `entry_key`.
    ///
    /// ```
    /// use reheat::RecomputationRegistry;
    ///
    /// assert_eq!(
    ///     RecomputationRegistry::descriptor_key("orders:42"),
    ///     "orders:42:invocation_cache_key_suffix"
    /// );
    /// ```
    pub fn descriptor_key(entry_key: &str) -> String {
        format!("{entry_key}{}", Self::DESCRIPTOR_SUFFIX)
    }

    /// Stores `descriptor` for `entry_key` with a TTL of `ttl_secs`.
    ///
    /// A zero TTL stores nothing: the owning cache keeps no entries either.
    pub async fn register(
        &self,
        entry_key: &str,
        descriptor: &RecomputationDescriptor,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        if ttl_secs == 0 {
            debug!(entry_key, "not registering descriptor for a zero-TTL cache");
            return Ok(());
        }
        let bytes = descriptor.to_bytes()?;
        self.store
            .set_ex(&Self::descriptor_key(entry_key), &bytes, ttl_secs)
            .await
    }

    /// Fetches the descriptor for `entry_key`, if one is registered.
    pub async fn lookup(
        &self,
        entry_key: &str,
    ) -> Result<Option<RecomputationDescriptor>, StoreError> {
        match self.store.get(&Self::descriptor_key(entry_key)).await? {
            Some(bytes) => Ok(Some(RecomputationDescriptor::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Resets the descriptor's expiry to `ttl_secs`.
    ///
    /// Returns `false` when there was no descriptor to renew.
    pub async fn renew_ttl(&self, entry_key: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        if ttl_secs == 0 {
            return Ok(false);
        }
        self.store
            .expire(&Self::descriptor_key(entry_key), ttl_secs)
            .await
    }
}
