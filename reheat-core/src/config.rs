//! # Cache configuration
//!
//! Parsing of cache-name configuration strings and the store-wide settings.
//!
//! A cache is declared with a single string of the form
//! `name[#ttlSeconds][#preloadSeconds]`:
//!
//! - `name` - the logical cache name, also used as the key prefix in the store
//! - `ttlSeconds` - lifetime of every entry written to this cache
//!   (defaults to [`CacheSettings::default_ttl_secs`])
//! - `preloadSeconds` - once the *remaining* TTL of an entry drops to this
//!   value, reads trigger a background refresh (defaults to `0`, never)
//!
//! Numeric fields may reference external properties through `${property}` or
//! `${property:default}` placeholders, resolved once through a
//! [`PropertyResolver`] before the integer is parsed.
//!
//! # Examples
//!
//! ```
//! use reheat_core::{CacheConfig, NoProperties};
//!
//! let config = CacheConfig::parse("orders#60#10", 3600, &NoProperties).unwrap();
//! assert_eq!(config.name, "orders");
//! assert_eq!(config.ttl_secs, 60);
//! assert_eq!(config.preload_secs, 10);
//!
//! let config = CacheConfig::parse("orders", 3600, &NoProperties).unwrap();
//! assert_eq!(config.ttl_secs, 3600);
//! assert_eq!(config.preload_secs, 0);
//! ```

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Separator between the fields of a cache-name configuration string.
pub const FIELD_SEPARATOR: char = '#';

const PLACEHOLDER_OPEN: &str = "${";
const PLACEHOLDER_CLOSE: char = '}';

/// Source of external property values used to resolve `${...}` placeholders.
///
/// Loading properties (files, remote config services, ...) is left to the
/// application; this trait is the only thing the cache needs from it.
pub trait PropertyResolver: Send + Sync {
    /// Returns the value of `property`, or `None` if it is not defined.
    fn resolve(&self, property: &str) -> Option<String>;
}

impl PropertyResolver for HashMap<String, String> {
    fn resolve(&self, property: &str) -> Option<String> {
        self.get(property).cloned()
    }
}

/// A resolver with no properties at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProperties;

impl PropertyResolver for NoProperties {
    fn resolve(&self, _property: &str) -> Option<String> {
        None
    }
}

/// Resolves properties from the process environment.
///
/// The property name is looked up verbatim first, then in its conventional
/// environment form: upper-cased, with `.` and `-` replaced by `_`
/// (`orders.ttl` -> `ORDERS_TTL`).
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvResolver;

impl EnvResolver {
    fn env_name(property: &str) -> String {
        property
            .chars()
            .map(|c| match c {
                '.' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect()
    }
}

impl PropertyResolver for EnvResolver {
    fn resolve(&self, property: &str) -> Option<String> {
        std::env::var(property)
            .ok()
            .or_else(|| std::env::var(Self::env_name(property)).ok())
    }
}

/// Replaces every `${property}` / `${property:default}` in `raw`.
///
/// # Errors
///
/// * [`ConfigError::UnresolvedProperty`] if a property is missing and the
///   placeholder has no default
/// * [`ConfigError::UnterminatedPlaceholder`] if a `${` is never closed
///
/// # Examples
///
/// ```
/// use reheat_core::config::resolve_placeholders;
/// use std::collections::HashMap;
///
/// let mut props = HashMap::new();
/// props.insert("orders.ttl".to_string(), "120".to_string());
///
/// assert_eq!(resolve_placeholders("${orders.ttl}", &props).unwrap(), "120");
/// assert_eq!(resolve_placeholders("${orders.preload:15}", &props).unwrap(), "15");
/// assert!(resolve_placeholders("${missing}", &props).is_err());
/// ```
pub fn resolve_placeholders(
    raw: &str,
    resolver: &dyn PropertyResolver,
) -> Result<String, ConfigError> {
    let mut resolved = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find(PLACEHOLDER_OPEN) {
        resolved.push_str(&rest[..start]);
        let body = &rest[start + PLACEHOLDER_OPEN.len()..];
        let end = body
            .find(PLACEHOLDER_CLOSE)
            .ok_or_else(|| ConfigError::UnterminatedPlaceholder {
                raw: raw.to_string(),
            })?;

        let expression = &body[..end];
        let (property, default) = match expression.split_once(':') {
            Some((property, default)) => (property.trim(), Some(default)),
            None => (expression.trim(), None),
        };

        match resolver
            .resolve(property)
            .or_else(|| default.map(str::to_string))
        {
            Some(value) => resolved.push_str(&value),
            None => {
                return Err(ConfigError::UnresolvedProperty {
                    property: property.to_string(),
                    raw: raw.to_string(),
                })
            }
        }

        rest = &body[end + 1..];
    }

    resolved.push_str(rest);
    Ok(resolved)
}

/// Returns the logical cache name of a configuration string without parsing
/// (or resolving) its numeric fields.
///
/// ```
/// assert_eq!(reheat_core::config::cache_name(" orders #60#10"), "orders");
/// ```
pub fn cache_name(raw: &str) -> &str {
    raw.split(FIELD_SEPARATOR).next().unwrap_or(raw).trim()
}

/// Per-cache configuration: name, entry TTL and preload threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Logical cache name
    pub name: String,
    /// Lifetime of every entry written to the cache, in seconds
    pub ttl_secs: u64,
    /// Remaining-TTL cutoff at or below which reads trigger a refresh.
    /// `0` disables proactive refresh.
    pub preload_secs: u64,
}

impl CacheConfig {
    pub fn new(name: impl Into<String>, ttl_secs: u64, preload_secs: u64) -> Self {
        Self {
            name: name.into(),
            ttl_secs,
            preload_secs,
        }
    }

    /// Parses a `name[#ttl][#preload]` configuration string.
    ///
    /// Blank or absent numeric fields fall back to `default_ttl_secs` and `0`.
    /// Negative values clamp to `0`. Fields beyond the third are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the name is blank, a placeholder cannot
    /// be resolved, or a field is not an integer.
    ///
    /// # Examples
    ///
    /// ```
    /// use reheat_core::{CacheConfig, NoProperties};
    ///
    /// let config = CacheConfig::parse("orders#-5", 3600, &NoProperties).unwrap();
    /// assert_eq!(config.ttl_secs, 0);
    ///
    /// assert!(CacheConfig::parse("orders#soon", 3600, &NoProperties).is_err());
    /// ```
    pub fn parse(
        raw: &str,
        default_ttl_secs: u64,
        resolver: &dyn PropertyResolver,
    ) -> Result<Self, ConfigError> {
        let mut fields = raw.split(FIELD_SEPARATOR);

        let name = fields.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(ConfigError::BlankName {
                raw: raw.to_string(),
            });
        }

        let ttl_secs = parse_seconds(fields.next(), "ttl", resolver)?.unwrap_or(default_ttl_secs);
        let preload_secs = parse_seconds(fields.next(), "preload", resolver)?.unwrap_or(0);

        Ok(Self::new(name, ttl_secs, preload_secs))
    }

    /// Whether reads of this cache ever trigger a proactive refresh.
    #[inline]
    pub fn refresh_enabled(&self) -> bool {
        self.preload_secs > 0
    }

    /// Whether an entry with `remaining_secs` left to live is due for refresh.
    ///
    /// ```
    /// use reheat_core::CacheConfig;
    ///
    /// let config = CacheConfig::new("orders", 100, 20);
    /// assert!(config.is_due(15));
    /// assert!(config.is_due(20));
    /// assert!(!config.is_due(21));
    ///
    /// // preload 0 never refreshes, even at the very end of the TTL
    /// assert!(!CacheConfig::new("orders", 100, 0).is_due(0));
    /// ```
    #[inline]
    pub fn is_due(&self, remaining_secs: u64) -> bool {
        self.refresh_enabled() && remaining_secs <= self.preload_secs
    }
}

impl fmt::Display for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.name,
            self.ttl_secs,
            self.preload_secs,
            sep = FIELD_SEPARATOR
        )
    }
}

fn parse_seconds(
    field: Option<&str>,
    field_name: &'static str,
    resolver: &dyn PropertyResolver,
) -> Result<Option<u64>, ConfigError> {
    let field = match field {
        Some(field) if !field.trim().is_empty() => field,
        _ => return Ok(None),
    };

    let resolved = if field.contains(PLACEHOLDER_OPEN) {
        resolve_placeholders(field, resolver)?
    } else {
        field.to_string()
    };

    let resolved = resolved.trim();
    if resolved.is_empty() {
        return Ok(None);
    }

    let seconds = resolved
        .parse::<i64>()
        .map_err(|_| ConfigError::InvalidNumber {
            field: field_name,
            value: resolved.to_string(),
        })?;

    Ok(Some(seconds.max(0) as u64))
}

/// Store-wide settings shared by every cache of a manager.
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// use reheat_core::CacheSettings;
///
/// let settings: CacheSettings = serde_json::from_str(r#"{"default_ttl_secs": 600}"#).unwrap();
/// assert_eq!(settings.default_ttl_secs, 600);
/// assert_eq!(settings.lock_lease_secs, 60);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// TTL used by caches whose configuration string has no TTL field
    pub default_ttl_secs: u64,
    /// Lease of the refresh lock; must exceed the slowest recomputation
    pub lock_lease_secs: u64,
    /// Number of background refresh workers
    pub refresh_workers: usize,
    /// Refresh jobs that may wait for a worker before submissions are dropped
    pub refresh_queue_capacity: usize,
}

impl CacheSettings {
    pub const DEFAULT_TTL_PROPERTY: &'static str = "reheat.default-ttl";
    pub const LOCK_LEASE_PROPERTY: &'static str = "reheat.lock-lease";
    pub const REFRESH_WORKERS_PROPERTY: &'static str = "reheat.refresh-workers";
    pub const REFRESH_QUEUE_CAPACITY_PROPERTY: &'static str = "reheat.refresh-queue-capacity";

    /// Reads the settings from properties, using defaults for missing ones.
    ///
    /// ```
    /// use reheat_core::CacheSettings;
    /// use std::collections::HashMap;
    ///
    /// let mut props = HashMap::new();
    /// props.insert("reheat.default-ttl".to_string(), "900".to_string());
    ///
    /// let settings = CacheSettings::from_properties(&props).unwrap();
    /// assert_eq!(settings.default_ttl_secs, 900);
    /// assert_eq!(settings.refresh_workers, 4);
    /// ```
    pub fn from_properties(resolver: &dyn PropertyResolver) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let settings = Self {
            default_ttl_secs: read_property(
                resolver,
                Self::DEFAULT_TTL_PROPERTY,
                "default_ttl_secs",
            )?
            .unwrap_or(defaults.default_ttl_secs),
            lock_lease_secs: read_property(resolver, Self::LOCK_LEASE_PROPERTY, "lock_lease_secs")?
                .unwrap_or(defaults.lock_lease_secs),
            refresh_workers: read_property(
                resolver,
                Self::REFRESH_WORKERS_PROPERTY,
                "refresh_workers",
            )?
            .unwrap_or(defaults.refresh_workers),
            refresh_queue_capacity: read_property(
                resolver,
                Self::REFRESH_QUEUE_CAPACITY_PROPERTY,
                "refresh_queue_capacity",
            )?
            .unwrap_or(defaults.refresh_queue_capacity),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects settings the refresh machinery cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_lease_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                setting: "lock_lease_secs",
                reason: "the refresh lock needs a lease of at least one second".to_string(),
            });
        }
        if self.refresh_workers == 0 {
            return Err(ConfigError::InvalidSetting {
                setting: "refresh_workers",
                reason: "at least one refresh worker is required".to_string(),
            });
        }
        if self.refresh_queue_capacity == 0 {
            return Err(ConfigError::InvalidSetting {
                setting: "refresh_queue_capacity",
                reason: "the refresh queue must hold at least one job".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            lock_lease_secs: 60,
            refresh_workers: 4,
            refresh_queue_capacity: 1024,
        }
    }
}

fn read_property<T: FromStr>(
    resolver: &dyn PropertyResolver,
    property: &'static str,
    setting: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = resolver.resolve(property) else {
        return Ok(None);
    };
    let value = resolve_placeholders(&raw, resolver)?;
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidSetting {
            setting,
            reason: format!("`{value}` is not a valid number"),
        })
}
