//! # Remote store
//!
//! The [`RemoteStore`] trait is the boundary to the networked key-value store
//! that holds cached values, recomputation descriptors and refresh locks. It
//! mirrors the handful of Redis commands the cache relies on.
//!
//! - [`MemoryStore`] keeps everything in process, on the Tokio clock
//! - `RedisStore` talks to Redis (feature `redis`)

use crate::StoreError;
use async_trait::async_trait;

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Remaining lifetime of a key, as reported by `TTL key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist (`-2`).
    Missing,
    /// The key exists without an expiry (`-1`).
    Persistent,
    /// The key expires in this many seconds.
    Expires(u64),
}

impl KeyTtl {
    /// Interprets the integer reply of the `TTL` command.
    ///
    /// ```
    /// use reheat::KeyTtl;
    ///
    /// assert_eq!(KeyTtl::from_reply(-2), KeyTtl::Missing);
    /// assert_eq!(KeyTtl::from_reply(-1), KeyTtl::Persistent);
    /// assert_eq!(KeyTtl::from_reply(15), KeyTtl::Expires(15));
    /// ```
    pub fn from_reply(seconds: i64) -> Self {
        match seconds {
            -2 => KeyTtl::Missing,
            s if s < 0 => KeyTtl::Persistent,
            s => KeyTtl::Expires(s as u64),
        }
    }

    /// Seconds left, if the key exists and expires.
    pub fn remaining_secs(&self) -> Option<u64> {
        match self {
            KeyTtl::Expires(secs) => Some(*secs),
            _ => None,
        }
    }
}

/// Operations the cache needs from the remote key-value store.
///
/// Every write carries a TTL of at least one second; implementations may
/// reject a zero TTL the way Redis does.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// `GET key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// `SET key value EX ttl`
    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError>;

    /// `SET key value NX EX ttl`; returns whether the key was written.
    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl_secs: u64)
        -> Result<bool, StoreError>;

    /// `TTL key`
    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError>;

    /// `EXPIRE key ttl`; returns whether the key existed.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError>;

    /// `DEL key`; returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Deletes `key` only if its current value equals `expected`, atomically.
    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError>;

    /// Records that a logical cache with this name exists.
    fn register_cache_name(&self, _name: &str) {}

    /// Names recorded through [`register_cache_name`](Self::register_cache_name).
    fn cache_names(&self) -> Vec<String> {
        Vec::new()
    }
}
