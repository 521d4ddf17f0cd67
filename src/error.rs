use reheat_core::ConfigError;
use thiserror::Error;

/// Boxed error returned by application recomputation code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure talking to the remote key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (connection refused, dropped, timed out).
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error.
    #[error("remote store command failed: {0}")]
    Command(String),

    /// A stored value could not be encoded or decoded.
    #[error("stored value could not be encoded or decoded")]
    Codec(#[from] serde_json::Error),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// The refresh lock could not be taken or released because the store failed.
///
/// Never reaches readers: the refresh attempt is skipped instead.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to acquire lock `{lock_key}`")]
    Acquire {
        lock_key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to release lock `{lock_key}`")]
    Release {
        lock_key: String,
        #[source]
        source: StoreError,
    },
}

/// A recomputation could not produce a value.
#[derive(Debug, Error)]
pub enum RecomputeError {
    #[error("no recomputation target named `{0}`")]
    UnknownTarget(String),

    #[error("target `{target}` has no operation `{operation}`")]
    UnknownOperation { target: String, operation: String },

    #[error("operation `{operation}` failed")]
    Failed {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("operation `{operation}` panicked")]
    Panicked { operation: String },

    #[error("result of `{operation}` could not be serialized")]
    Encode {
        operation: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors returned by [`CacheManager`](crate::CacheManager) operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Recompute(#[from] RecomputeError),

    /// The invocation does not name any cache.
    #[error("invocation of `{operation}` names no cache")]
    NoCacheNames { operation: String },
}
