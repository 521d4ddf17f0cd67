use thiserror::Error;

/// Errors raised while turning a cache-name string or the store-wide
/// settings into a usable configuration.
///
/// These are fatal at creation time: a cache whose TTL cannot be determined
/// is never created with a guessed value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The name part of `name#ttl#preload` is empty or whitespace.
    #[error("cache name is blank in `{raw}`")]
    BlankName { raw: String },

    /// A `${...}` placeholder referenced a property that does not exist and
    /// carries no default.
    #[error("unresolved property `{property}` in `{raw}`")]
    UnresolvedProperty { property: String, raw: String },

    /// A `${` without its closing `}`.
    #[error("unterminated placeholder in `{raw}`")]
    UnterminatedPlaceholder { raw: String },

    /// The field resolved to something that is not a signed integer.
    #[error("{field} must be an integer number of seconds, got `{value}`")]
    InvalidNumber { field: &'static str, value: String },

    /// A store-wide setting is out of range.
    #[error("invalid setting `{setting}`: {reason}")]
    InvalidSetting {
        setting: &'static str,
        reason: String,
    },
}
