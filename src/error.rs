//! Error types for the tiered cache engine

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache engine
///
/// Logical absence is never an error: lookups return `Ok(None)`.
#[derive(Error, Debug)]
pub enum Error {
    /// A cache tier could not be reached
    #[error("{tier} tier unavailable: {reason}")]
    TierUnavailable { tier: String, reason: String },

    /// A loader callback failed; every single-flight waiter sees this
    #[error("Loader failed for key {key}: {reason}")]
    LoadFailed { key: String, reason: String },

    /// A value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The shared store rejected an operation
    #[error("Store error: {0}")]
    Store(String),

    /// Redis client error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML configuration parse error
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a `TierUnavailable` error for the shared store
    pub fn l2_unavailable(reason: impl Into<String>) -> Self {
        Error::TierUnavailable {
            tier: "L2".to_string(),
            reason: reason.into(),
        }
    }

    /// True when the error means a tier could not be reached
    pub fn is_tier_unavailable(&self) -> bool {
        matches!(
            self,
            Error::TierUnavailable { .. } | Error::Redis(_) | Error::Timeout { .. }
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
