use super::{KeyTtl, RemoteStore};
use crate::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::collections::BTreeSet;

const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// [`RemoteStore`] backed by Redis through a multiplexed, auto-reconnecting
/// connection.
///
/// ```ignore
/// use reheat::RedisStore;
///
/// let store = RedisStore::connect("redis://127.0.0.1:6379").await?;
/// ```
pub struct RedisStore {
    connection: ConnectionManager,
    compare_and_delete: Script,
    cache_names: RwLock<BTreeSet<String>>,
}

impl RedisStore {
    /// Opens a managed connection to the server at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::with_connection(connection))
    }

    /// Wraps an existing connection manager.
    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            cache_names: RwLock::new(BTreeSet::new()),
        }
    }

    fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection();
        // Nil reply when the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let mut conn = self.connection();
        let seconds: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        Ok(KeyTtl::from_reply(seconds))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        let mut conn = self.connection();
        let updated: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        let mut conn = self.connection();
        let removed: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    fn register_cache_name(&self, name: &str) {
        self.cache_names.write().insert(name.to_string());
    }

    fn cache_names(&self) -> Vec<String> {
        self.cache_names.read().iter().cloned().collect()
    }
}
