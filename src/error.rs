//! Error types for the region eviction engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while accounting for or evicting region entries
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Caller-visible errors
    // =========================================================================
    /// The key/value pair cannot be sized under the active algorithm
    #[error("Invalid entry {key}: {reason}")]
    InvalidEntry { key: String, reason: String },

    /// Invalid limit, algorithm/action combination or region setup
    #[error("Configuration error: {0}")]
    Config(String),

    /// The region (or bucket) has been destroyed
    #[error("Region destroyed: {0}")]
    RegionDestroyed(String),

    // =========================================================================
    // Recoverable eviction errors
    // =========================================================================
    /// A candidate eviction (destroy or disk persist) failed
    #[error("Eviction of {key} failed: {reason}")]
    EvictionApplication { key: String, reason: String },

    // =========================================================================
    // Infrastructure errors
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file parse error
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Returns true if the eviction loop may swallow this error and move on
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::EvictionApplication { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let err = Error::EvictionApplication {
            key: "k".into(),
            reason: "disk full".into(),
        };
        assert!(err.is_recoverable());
        assert!(!Error::config("limit must be positive").is_recoverable());
        assert!(!Error::InvalidEntry {
            key: "k".into(),
            reason: "unresolved".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::config("limit must be positive");
        assert_eq!(err.to_string(), "Configuration error: limit must be positive");
    }
}
