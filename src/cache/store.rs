//! In-memory TTL store
//!
//! Holds the latest successfully fetched value per key together with the
//! time it was stored and its TTL. The store never judges staleness; that is
//! the refresh policy's job.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// A single cached value with its metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value, opaque to the cache
    pub value: V,
    /// When the value was last successfully stored
    pub stored_at: DateTime<Utc>,
    /// Age after which the value is stale absent a schedule event
    pub ttl: Duration,
    /// Store-wide population counter at the time of this write
    pub generation: u64,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    generation: u64,
}

/// Key-value store with one entry per key and overwrite semantics
///
/// Value and timestamp are replaced together under one write lock, so a
/// reader never sees a half-updated entry.
#[derive(Debug)]
pub struct TtlStore<V> {
    inner: RwLock<Inner<V>>,
}

impl<V> Default for TtlStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TtlStore<V> {
    /// Creates an empty store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                generation: 0,
            }),
        }
    }

    /// Stores `value` as of `now` and returns the recorded `stored_at`
    ///
    /// `stored_at` never moves backwards for a key: if `now` is earlier than
    /// the previous timestamp, the previous timestamp is kept.
    pub fn set(&self, key: &str, value: V, ttl: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut inner = self.inner.write();
        let stored_at = match inner.entries.get(key) {
            Some(prev) if prev.stored_at > now => prev.stored_at,
            _ => now,
        };
        inner.generation += 1;
        let generation = inner.generation;
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at,
                ttl,
                generation,
            },
        );
        stored_at
    }

    /// Removes one entry, or every entry when `key` is `None`
    ///
    /// Clearing an absent key is a no-op.
    pub fn clear(&self, key: Option<&str>) {
        let mut inner = self.inner.write();
        match key {
            Some(key) => {
                inner.entries.remove(key);
            }
            None => inner.entries.clear(),
        }
    }

    /// Whether an entry exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamp, TTL and generation for `key` without cloning the value
    pub fn meta(&self, key: &str) -> Option<(DateTime<Utc>, Duration, u64)> {
        self.inner
            .read()
            .entries
            .get(key)
            .map(|e| (e.stored_at, e.ttl, e.generation))
    }

    /// Generation of the entry for `key`, or 0 if absent
    pub fn generation(&self, key: &str) -> u64 {
        self.meta(key).map(|(_, _, g)| g).unwrap_or(0)
    }

    /// Applies `f` to every entry under one read lock, sorted by key
    ///
    /// Lets callers summarize values without cloning them.
    pub fn map_entries<T, F>(&self, f: F) -> Vec<(String, T)>
    where
        F: Fn(&CacheEntry<V>) -> T,
    {
        let inner = self.inner.read();
        let mut mapped: Vec<(String, T)> = inner
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), f(e)))
            .collect();
        mapped.sort_by(|a, b| a.0.cmp(&b.0));
        mapped
    }

    /// Inserts a previously persisted entry with its original `stored_at`
    ///
    /// Skipped (returns `false`) when the key already holds an entry stored
    /// at or after `stored_at`, so an older value never replaces a newer one.
    pub fn restore(&self, key: &str, value: V, ttl: Duration, stored_at: DateTime<Utc>) -> bool {
        let mut inner = self.inner.write();
        if inner
            .entries
            .get(key)
            .is_some_and(|existing| existing.stored_at >= stored_at)
        {
            return false;
        }
        inner.generation += 1;
        let generation = inner.generation;
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at,
                ttl,
                generation,
            },
        );
        true
    }
}

impl<V: Clone> TtlStore<V> {
    /// Returns the stored value regardless of staleness
    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.read().entries.get(key).map(|e| e.value.clone())
    }

    /// Returns a copy of the whole entry
    pub fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.inner.read().entries.get(key).cloned()
    }

    /// Copies of every entry, sorted by key
    pub fn entries(&self) -> Vec<(String, CacheEntry<V>)> {
        let inner = self.inner.read();
        let mut entries: Vec<(String, CacheEntry<V>)> = inner
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
