use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;

/// Opaque cache key.
///
/// Equality and hashing are plain string equality. Within one cache name a
/// key denotes exactly one recomputable value.
///
/// # Examples
///
/// ```
/// use reheat_core::CacheKey;
///
/// let key = CacheKey::from("42-eu");
/// assert_eq!(key.as_str(), "42-eu");
/// assert_eq!(key, CacheKey::new("42-eu".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: String) -> Self {
        Self(key)
    }

    /// The key as it appears after the cache name prefix.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strategy that derives a [`CacheKey`] from an intercepted call.
///
/// The call-interception layer may bypass the generator entirely by
/// supplying its own key (see `Invocation::with_key`).
pub trait KeyGenerator: Send + Sync {
    /// Builds the key for `operation` on `target` called with `args`.
    fn generate(&self, target: &str, operation: &str, args: &[Value]) -> CacheKey;
}

/// Default key generator: joins the string form of each argument with `-`.
///
/// - `null` arguments are written as `NULL`
/// - strings are written without quotes
/// - any other JSON value is written as compact JSON
/// - a call without arguments maps to the fixed key `{}`
///
/// The target and operation do not take part in the key; the cache name
/// already scopes it.
///
/// # Examples
///
/// ```
/// use reheat_core::{HyphenKeyGenerator, KeyGenerator};
/// use serde_json::json;
///
/// let args = [json!("a"), json!(null), json!(3)];
/// let key = HyphenKeyGenerator.generate("OrderService", "find", &args);
/// assert_eq!(key.as_str(), "a-NULL-3");
///
/// let key = HyphenKeyGenerator.generate("OrderService", "all", &[]);
/// assert_eq!(key.as_str(), "{}");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct HyphenKeyGenerator;

impl HyphenKeyGenerator {
    pub const SEPARATOR: &'static str = "-";
    pub const NULL_TOKEN: &'static str = "NULL";
    pub const EMPTY_KEY: &'static str = "{}";

    fn key_part(arg: &Value) -> String {
        match arg {
            Value::Null => Self::NULL_TOKEN.to_string(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl KeyGenerator for HyphenKeyGenerator {
    fn generate(&self, _target: &str, _operation: &str, args: &[Value]) -> CacheKey {
        if args.is_empty() {
            return CacheKey::from(Self::EMPTY_KEY);
        }

        let parts: Vec<String> = args.iter().map(Self::key_part).collect();
        CacheKey::new(parts.join(Self::SEPARATOR))
    }
}
