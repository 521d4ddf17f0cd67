//! # Reheat Core
//!
//! Runtime-independent building blocks of the reheat cache.
//!
//! ## Module Organization
//!
//! - [`config`] - `name#ttl#preload` parsing, property placeholders, store-wide settings
//! - [`keys`] - cache keys and the pluggable key generator
//! - [`descriptor`] - intercepted invocations and the recomputation descriptors
//!   stored next to cached entries
//! - `stats` - per-cache read statistics (feature `stats`)
//!
//! The async engine (remote stores, distributed lock, refresh workers) lives
//! in the `reheat` crate.
pub mod config;
pub mod descriptor;
mod error;
pub mod keys;

#[cfg(feature = "stats")]
mod stats;

pub use config::{
    CacheConfig, CacheSettings, EnvResolver, NoProperties, PropertyResolver, FIELD_SEPARATOR,
};
pub use descriptor::{Invocation, RecomputationDescriptor};
pub use error::ConfigError;
pub use keys::{CacheKey, HyphenKeyGenerator, KeyGenerator};

#[cfg(feature = "stats")]
pub use stats::CacheStats;
