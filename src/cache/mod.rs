//! Scheduled TTL cache for upstream financial datasets
//!
//! This module provides [`RateCache`], an in-memory cache keyed by dataset
//! name. An entry is refreshed when it is missing, when its TTL has elapsed,
//! or when one of the key's daily refresh times (Moscow time by default) has
//! passed since it was stored. Failed refreshes fall back to the last good
//! value, and [`SnapshotStore`] persists the cache between runs.

pub mod admin;
pub mod manager;
pub mod policy;
pub mod schedule;
pub mod snapshot;
pub mod store;

pub use admin::{CacheReport, EntryInfo, RefreshResult};
pub use manager::{CachedData, Origin, RateCache, DEFAULT_TTL_SECS};
pub use policy::RefreshReason;
pub use schedule::Schedule;
pub use snapshot::{Snapshot, SnapshotEntry, SnapshotStore};
pub use store::{CacheEntry, TtlStore};
