//! Error types for the cache and analytics engine.

use std::time::Duration;

use thiserror::Error;

/// Main error type for cache and analytics operations.
///
/// Cache-layer failures never become query failures: `RemoteUnavailable` is
/// handled internally as a miss and `Serialization` as "skip caching". Only
/// `InvalidSpec`, `Compute`, `ComputeTimeout` and `Refresh` reach callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The query spec is malformed; rejected before any cache access.
    #[error("invalid query spec: {0}")]
    InvalidSpec(String),

    /// The remote tier could not be reached within its deadline.
    #[error("remote tier unavailable: {0}")]
    RemoteUnavailable(String),

    /// A value could not be serialized for caching.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The underlying aggregate computation failed.
    #[error("aggregate computation failed: {0}")]
    Compute(String),

    /// The computation exceeded the configured compute deadline.
    #[error("computation timed out after {0:?}")]
    ComputeTimeout(Duration),

    /// A materialized view refresh failed.
    #[error("view refresh failed: {0}")]
    Refresh(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl CacheError {
    /// Wrap a collaborator error as a compute failure, keeping its context chain.
    pub fn compute(err: &anyhow::Error) -> Self {
        Self::Compute(format!("{err:#}"))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CacheError>;
