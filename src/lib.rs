//! Scheduled TTL cache for the finance bot's upstream datasets
//!
//! Currency rates, the CBR key rate, RUONIA, crypto prices and weather are
//! fetched from slow or rate-limited sources. This crate keeps the latest
//! good value of each in memory, refreshes it on a TTL or at fixed daily
//! times, and exposes admin operations plus a CLI for operators.

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod datasets;
pub mod error;
pub mod fetch;
pub mod refresh;

pub use cache::{CachedData, Origin, RateCache};
pub use config::Config;
pub use error::CacheError;
pub use fetch::{FetchError, Fetcher, FetcherMap};
