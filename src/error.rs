//! Error types for the cache layer
//!
//! Nothing here is fatal to the host process. Every failure is returned to
//! the caller as a value, who decides whether to show an error, retry, or
//! serve stale data.

use thiserror::Error;

use crate::fetch::FetchError;

/// Errors surfaced by [`RateCache`](crate::cache::RateCache) and its admin surface
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key was never populated and its fetch failed, so there is nothing to fall back to
    #[error("no data available for '{key}': {source}")]
    NoDataEverFetched {
        key: String,
        #[source]
        source: FetchError,
    },

    /// One or more schedule times failed HH:MM parsing; nothing was applied
    #[error("invalid schedule for '{key}': {}", invalid.join(", "))]
    InvalidSchedule { key: String, invalid: Vec<String> },

    /// No fetcher is registered for the key
    #[error("unknown dataset key: {0}")]
    UnknownKey(String),

    /// Snapshot could not be written
    #[error("snapshot error: {0}")]
    Snapshot(#[from] std::io::Error),

    /// Snapshot could not be encoded
    #[error("snapshot encoding error: {0}")]
    SnapshotEncoding(#[from] serde_json::Error),

    /// Invalid configuration (unknown timezone, unreadable file, bad TOML)
    #[error("configuration error: {0}")]
    Configuration(String),
}
