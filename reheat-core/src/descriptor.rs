//! # Recomputation descriptors
//!
//! A [`RecomputationDescriptor`] records *how* the value behind a cache key
//! was produced: which target, which operation, and the argument snapshot.
//! It is stored next to the cached entry so that any process can regenerate
//! the value later without having seen the original call.
//!
//! The descriptor is opaque to the cache: executing it is the job of an
//! invoker supplied at integration time.
//!
//! [`Invocation`] is what the call-interception layer hands over for every
//! intercepted cacheable call.

use crate::keys::{CacheKey, KeyGenerator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::hash::{Hash, Hasher};

/// A cacheable call as observed by the interception layer.
///
/// # Examples
///
/// ```
/// use reheat_core::{HyphenKeyGenerator, Invocation};
/// use serde_json::json;
///
/// let invocation = Invocation::new("OrderService", "find_order")
///     .with_arg("u64", json!(42))
///     .with_arg("String", json!("eu"))
///     .with_cache("orders#60#10");
///
/// assert_eq!(invocation.key(&HyphenKeyGenerator).as_str(), "42-eu");
///
/// let explicit = invocation.clone().with_key("order:42");
/// assert_eq!(explicit.key(&HyphenKeyGenerator).as_str(), "order:42");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub target: String,
    pub operation: String,
    pub argument_types: Vec<String>,
    pub arguments: Vec<Value>,
    /// Raw cache-name configuration strings (`name#ttl#preload`)
    pub cache_names: Vec<String>,
    /// Key computed by the caller; bypasses the key generator when set
    pub key: Option<CacheKey>,
}

impl Invocation {
    pub fn new(target: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            operation: operation.into(),
            argument_types: Vec::new(),
            arguments: Vec::new(),
            cache_names: Vec::new(),
            key: None,
        }
    }

    /// Appends an argument already in its serialized form.
    pub fn with_arg(mut self, type_name: impl Into<String>, value: Value) -> Self {
        self.argument_types.push(type_name.into());
        self.arguments.push(value);
        self
    }

    /// Serializes `value` and appends it, recording its Rust type name.
    pub fn with_serialized_arg<T: Serialize>(self, value: &T) -> serde_json::Result<Self> {
        let serialized = serde_json::to_value(value)?;
        Ok(self.with_arg(std::any::type_name::<T>(), serialized))
    }

    pub fn with_cache(mut self, raw_cache_name: impl Into<String>) -> Self {
        self.cache_names.push(raw_cache_name.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<CacheKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// The explicit key if one was supplied, otherwise the generated one.
    pub fn key(&self, generator: &dyn KeyGenerator) -> CacheKey {
        match &self.key {
            Some(key) => key.clone(),
            None => generator.generate(&self.target, &self.operation, &self.arguments),
        }
    }

    /// Snapshot of this call as a descriptor stored under `key`.
    pub fn descriptor(&self, key: CacheKey) -> RecomputationDescriptor {
        RecomputationDescriptor {
            key,
            target: self.target.clone(),
            operation: self.operation.clone(),
            argument_types: self.argument_types.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

/// Serializable record of how to regenerate the value behind `key`.
///
/// Two descriptors are equal iff their keys are equal: identity is
/// key-scoped, not content-scoped.
///
/// # Examples
///
/// ```
/// use reheat_core::{CacheKey, RecomputationDescriptor};
/// use serde_json::json;
///
/// let descriptor = RecomputationDescriptor {
///     key: CacheKey::from("42"),
///     target: "OrderService".to_string(),
///     operation: "find_order".to_string(),
///     argument_types: vec!["u64".to_string()],
///     arguments: vec![json!(42)],
/// };
///
/// let bytes = descriptor.to_bytes().unwrap();
/// let decoded = RecomputationDescriptor::from_bytes(&bytes).unwrap();
/// assert_eq!(decoded.operation, "find_order");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputationDescriptor {
    pub key: CacheKey,
    pub target: String,
    pub operation: String,
    #[serde(default)]
    pub argument_types: Vec<String>,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl RecomputationDescriptor {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Deserializes argument `index` into `T`.
    ///
    /// Invokers use this to rebuild typed arguments from the snapshot.
    pub fn argument<T: serde::de::DeserializeOwned>(
        &self,
        index: usize,
    ) -> Option<serde_json::Result<T>> {
        self.arguments
            .get(index)
            .map(|value| T::deserialize(value))
    }
}

impl PartialEq for RecomputationDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for RecomputationDescriptor {}

impl Hash for RecomputationDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
