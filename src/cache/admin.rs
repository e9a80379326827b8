//! Administrative control surface
//!
//! Forced refresh, clearing, introspection and schedule updates. The caller
//! is trusted; identity checks happen before these methods are reached.
//! Results are structured data, never pre-formatted text.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use super::manager::{CachedData, Origin, RateCache};
use super::policy;
use super::schedule::format_time;
use crate::error::CacheError;
use crate::fetch::FetcherMap;

/// Outcome of a forced refresh for one key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshResult<V> {
    /// Fresh value fetched and stored
    Success {
        value: V,
        stored_at: DateTime<Utc>,
    },
    /// Refresh failed; any previously cached value is untouched
    Error { message: String },
}

impl<V> RefreshResult<V> {
    /// Whether the refresh succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, RefreshResult::Success { .. })
    }
}

/// Snapshot of one cache entry for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryInfo {
    /// When the entry was stored, in the schedule timezone
    pub stored_at: DateTime<FixedOffset>,
    /// Seconds since the entry was stored
    pub age_secs: i64,
    /// Configured TTL in seconds
    pub ttl_secs: i64,
    /// Seconds until the TTL expires (0 once expired)
    pub ttl_remaining_secs: i64,
    /// Whether the next read would trigger a refresh
    pub is_stale: bool,
    /// Next scheduled refresh time (`HH:MM`), if the key is scheduled
    pub next_scheduled_time: Option<String>,
    /// Size of the value serialized as JSON, in bytes
    pub data_size: usize,
}

/// Read-only view of the whole cache
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheReport {
    /// Number of stored entries
    pub total_entries: usize,
    /// Per-key details
    pub entries: BTreeMap<String, EntryInfo>,
}

impl<V: Clone> RateCache<V> {
    /// Forces a refetch of `key`, or of every key in `fetchers` when `None`
    ///
    /// Keys are refreshed concurrently and one key's failure never stops the
    /// others. A key missing from `fetchers` is reported as unknown.
    pub async fn force_refresh(
        &self,
        key: Option<&str>,
        fetchers: &FetcherMap<V>,
    ) -> BTreeMap<String, RefreshResult<V>> {
        let keys: Vec<String> = match key {
            Some(key) => vec![key.to_string()],
            None => fetchers.keys().cloned().collect(),
        };
        info!(keys = ?keys, "forced refresh requested");

        let jobs = keys.into_iter().map(|key| async move {
            let result = match fetchers.get(&key) {
                None => {
                    let err = CacheError::UnknownKey(key.clone());
                    warn!(key = %key, "forced refresh of unknown key");
                    RefreshResult::Error {
                        message: err.to_string(),
                    }
                }
                Some(fetcher) => {
                    match self.get_or_fetch_with(&key, fetcher.as_ref(), true).await {
                        Ok(CachedData {
                            origin: Origin::Fallback { error },
                            ..
                        }) => RefreshResult::Error { message: error },
                        Ok(CachedData {
                            data, cached_at, ..
                        }) => RefreshResult::Success {
                            value: data,
                            stored_at: cached_at,
                        },
                        Err(err) => RefreshResult::Error {
                            message: err.to_string(),
                        },
                    }
                }
            };
            (key, result)
        });

        join_all(jobs).await.into_iter().collect()
    }

    /// Removes one entry, or all entries when `key` is `None`
    pub fn clear(&self, key: Option<&str>) {
        self.store.clear(key);
        self.prune_gates(key);
        match key {
            Some(key) => info!(key, "cache entry cleared"),
            None => info!("whole cache cleared"),
        }
    }

    /// Validates and replaces the refresh times for `key`
    ///
    /// Rejects the whole list if any time is malformed, leaving the previous
    /// schedule in place.
    pub fn update_schedule<S: AsRef<str>>(
        &self,
        key: &str,
        times: &[S],
    ) -> Result<Vec<NaiveTime>, CacheError> {
        match self.schedule.replace(key, times) {
            Ok(times) => {
                let formatted: Vec<String> = times.iter().copied().map(format_time).collect();
                info!(key, times = ?formatted, "schedule updated");
                Ok(times)
            }
            Err(err) => {
                warn!(key, error = %err, "schedule update rejected");
                Err(err)
            }
        }
    }
}

impl<V: Serialize> RateCache<V> {
    /// Age, TTL, size and schedule information for every stored key
    ///
    /// Never triggers a fetch. A clock reading earlier than an entry's
    /// `stored_at` counts as age zero.
    pub fn inspect(&self) -> CacheReport {
        let now = self.now();
        let tz = self.schedule.timezone();

        let rows = self.store.map_entries(|entry| {
            let size = serde_json::to_vec(&entry.value).map_or(0, |bytes| bytes.len());
            (entry.stored_at, entry.ttl, size)
        });

        let entries: BTreeMap<String, EntryInfo> = rows
            .into_iter()
            .map(|(key, (stored_at, ttl, data_size))| {
                let age = (now - stored_at).max(Duration::zero());
                let remaining = (ttl - age).max(Duration::zero());
                let is_stale =
                    policy::evaluate(&key, Some((stored_at, ttl)), &self.schedule, now).is_some();
                let info = EntryInfo {
                    stored_at: stored_at.with_timezone(&tz).fixed_offset(),
                    age_secs: age.num_seconds(),
                    ttl_secs: ttl.num_seconds(),
                    ttl_remaining_secs: remaining.num_seconds(),
                    is_stale,
                    next_scheduled_time: self.schedule.next_due(&key, now).map(format_time),
                    data_size,
                };
                (key, info)
            })
            .collect();

        CacheReport {
            total_entries: entries.len(),
            entries,
        }
    }
}
