//! # Reheat
//!
//! A self-refreshing cache in front of a remote key-value store such as
//! Redis.
//!
//! Every cache is configured with a TTL and a *preload* threshold. When a
//! read hits an entry whose remaining TTL has dropped to the threshold, the
//! current value is returned right away and a background worker regenerates
//! the entry, so hot keys are rewritten before they expire instead of all
//! readers missing at once.
//!
//! Regeneration works across processes: next to each entry the cache keeps
//! a [`RecomputationDescriptor`] describing the call that produced it, and a
//! lock in the remote store makes sure at most one process recomputes a key
//! at a time.
//!
//! ## Features
//!
//! - **Preload refresh**: `name#ttl#preload` cache configuration with
//!   `${property:default}` placeholders
//! - **Cross-process single flight**: `SET NX EX` lock with owner tokens
//! - **Bounded background work**: fixed worker pool and queue shared by all
//!   caches
//! - **Pluggable stores**: in-memory store, Redis store (feature `redis`)
//! - **Statistics**: per-cache hits, misses and refresh triggers (feature
//!   `stats`), refresh outcome counters
//!
//! ## Quick Start
//!
//! ```rust
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! use reheat::{CacheManager, MemoryStore, OperationTable};
//! use reheat_core::Invocation;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! // How values are (re)computed
//! let operations = OperationTable::new();
//! operations.register("ReportService", "daily", |descriptor| async move {
//!     let day: String = serde_json::from_value(descriptor.arguments[0].clone())?;
//!     Ok(format!("report for {day}").into_bytes())
//! });
//!
//! let manager = CacheManager::builder(Arc::new(MemoryStore::new()), Arc::new(operations))
//!     .build()
//!     .unwrap();
//!
//! // Cached for 10 minutes; reads in the last minute trigger a refresh
//! let call = Invocation::new("ReportService", "daily")
//!     .with_arg("String", json!("2024-03-01"))
//!     .with_cache("reports#600#60");
//!
//! let report = manager.get_or_invoke(&call).await.unwrap();
//! assert_eq!(report, b"report for 2024-03-01");
//! # });
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - the remote store boundary and its implementations
//! - `lock` - distributed mutex
//! - `registry` - recomputation descriptors kept next to entries
//! - `invoker` - the recomputation boundary
//! - `entry_store` - one logical cache with TTL and preload threshold
//! - `refresh` - background refresh workers
//! - `manager` - cache creation and the call-interception entry points
//!
//! Configuration parsing, keys and descriptors live in `reheat-core`.
mod entry_store;
mod error;
mod invoker;
mod lock;
mod manager;
mod refresh;
mod registry;
pub mod store;

pub use entry_store::CacheEntryStore;
pub use error::{BoxError, CacheError, LockError, RecomputeError, StoreError};
pub use invoker::{Invoker, OperationTable};
pub use lock::{DistributedMutex, LockHandle};
pub use manager::{CacheManager, CacheManagerBuilder};
pub use refresh::{RefreshCoordinator, RefreshOutcome, RefreshStats};
pub use registry::RecomputationRegistry;
pub use store::{KeyTtl, MemoryStore, RemoteStore};

#[cfg(feature = "redis")]
pub use store::RedisStore;

pub use reheat_core::{
    CacheConfig, CacheKey, CacheSettings, ConfigError, EnvResolver, HyphenKeyGenerator,
    Invocation, KeyGenerator, NoProperties, PropertyResolver, RecomputationDescriptor,
};

#[cfg(feature = "stats")]
pub use reheat_core::CacheStats;
