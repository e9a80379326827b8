//! Cache manager: the read path every chat handler goes through
//!
//! Provides [`RateCache`], which combines the TTL store, the daily schedule
//! and the refresh policy with caller-supplied fetch functions. A failing
//! upstream never destroys previously good data, and a key that was never
//! populated surfaces its failure instead of a placeholder.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::policy::{self, RefreshReason};
use super::schedule::Schedule;
use super::store::TtlStore;
use crate::clock::{Clock, SystemClock};
use crate::error::CacheError;
use crate::fetch::{FetchError, Fetcher};

/// TTL applied to keys that were never registered (1 hour)
pub const DEFAULT_TTL_SECS: i64 = 3600;

/// Where the value returned by a read came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Fresh cache hit, no I/O
    Cache,
    /// Just fetched from upstream (by this caller or a coalesced one)
    Upstream,
    /// Upstream failed; this is the last good value
    Fallback {
        /// Why the refresh failed
        error: String,
    },
}

/// Result of reading through the cache, including freshness metadata
#[derive(Debug, Clone)]
pub struct CachedData<V> {
    /// The cached data
    pub data: V,
    /// When the data was last successfully stored
    pub cached_at: DateTime<Utc>,
    /// How this read was served
    pub origin: Origin,
}

impl<V> CachedData<V> {
    /// Whether the data is being served after a failed refresh
    pub fn is_stale(&self) -> bool {
        matches!(self.origin, Origin::Fallback { .. })
    }
}

/// Scheduled TTL cache for named datasets
///
/// One instance is created at startup and shared (usually behind an `Arc`)
/// with every request handler and the background refresh driver.
pub struct RateCache<V> {
    pub(crate) store: TtlStore<V>,
    pub(crate) schedule: Schedule,
    ttls: RwLock<HashMap<String, Duration>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    /// One async gate per key so only one fetch per key is in flight
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<V> RateCache<V> {
    /// Creates an empty cache whose schedules are evaluated in `tz`
    pub fn new(tz: Tz) -> Self {
        Self {
            store: TtlStore::new(),
            schedule: Schedule::new(tz),
            ttls: RwLock::new(HashMap::new()),
            default_ttl: Duration::seconds(DEFAULT_TTL_SECS),
            clock: Arc::new(SystemClock),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the clock (tests use a `ManualClock`)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the TTL for keys without a registered TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Registers the TTL used whenever `key` is stored
    pub fn register(&self, key: &str, ttl: Duration) {
        self.ttls.write().insert(key.to_string(), ttl);
    }

    /// TTL applied when storing `key`
    pub fn ttl_for(&self, key: &str) -> Duration {
        self.ttls
            .read()
            .get(key)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// Current time according to the cache's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Underlying TTL store
    pub fn store(&self) -> &TtlStore<V> {
        &self.store
    }

    /// Underlying schedule
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Why `key` needs a refresh right now, if it does
    pub fn refresh_reason(&self, key: &str) -> Option<RefreshReason> {
        let meta = self.store.meta(key).map(|(stored_at, ttl, _)| (stored_at, ttl));
        policy::evaluate(key, meta, &self.schedule, self.now())
    }

    /// Whether a read of `key` would go upstream. Has no side effects.
    pub fn needs_refresh(&self, key: &str) -> bool {
        self.refresh_reason(key).is_some()
    }

    fn gate(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock();
        Arc::clone(gates.entry(key.to_string()).or_default())
    }

    /// Drops the gates of `key` (or of every key) that no caller holds
    pub(crate) fn prune_gates(&self, key: Option<&str>) {
        let mut gates = self.gates.lock();
        match key {
            Some(key) => {
                if gates.get(key).is_some_and(|gate| Arc::strong_count(gate) == 1) {
                    gates.remove(key);
                }
            }
            None => gates.retain(|_, gate| Arc::strong_count(gate) > 1),
        }
    }
}

impl<V: Clone> RateCache<V> {
    /// Stored value for `key` regardless of staleness, without fetching
    pub fn peek(&self, key: &str) -> Option<V> {
        self.store.get(key)
    }

    /// Stores a value directly, using the key's TTL
    pub fn set(&self, key: &str, value: V) -> DateTime<Utc> {
        self.store.set(key, value, self.ttl_for(key), self.now())
    }

    /// Entry for `key` if it exists and no refresh trigger fired
    fn fresh_hit(&self, key: &str) -> Option<CachedData<V>> {
        let entry = self.store.entry(key)?;
        let meta = Some((entry.stored_at, entry.ttl));
        if policy::evaluate(key, meta, &self.schedule, self.now()).is_some() {
            return None;
        }
        Some(CachedData {
            data: entry.value,
            cached_at: entry.stored_at,
            origin: Origin::Cache,
        })
    }

    /// Returns the value for `key`, fetching it if stale, missing, or `force`d
    ///
    /// # Behavior
    /// - Fresh entry and no `force`: returned immediately, `fetch` is not called
    /// - Otherwise `fetch` runs with no store lock held, and a success
    ///   overwrites the entry
    /// - On fetch failure the previous entry is returned as
    ///   [`Origin::Fallback`] and left untouched
    /// - On fetch failure with no previous entry, returns
    ///   [`CacheError::NoDataEverFetched`]
    ///
    /// Concurrent callers for the same key wait for the fetch already in
    /// flight and reuse its result instead of fetching again.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        fetch: F,
        force: bool,
    ) -> Result<CachedData<V>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
    {
        if !force {
            if let Some(hit) = self.fresh_hit(key) {
                debug!(key, "cache hit");
                return Ok(hit);
            }
        }

        let seen = self.store.generation(key);
        let gate = self.gate(key);
        let _in_flight = gate.lock().await;

        // Another caller may have populated the key while this one waited
        let current = self.store.generation(key);
        if current != seen {
            if let Some(entry) = self.store.entry(key) {
                debug!(key, "reusing value fetched by concurrent caller");
                return Ok(CachedData {
                    data: entry.value,
                    cached_at: entry.stored_at,
                    origin: Origin::Upstream,
                });
            }
        }
        if !force {
            if let Some(hit) = self.fresh_hit(key) {
                return Ok(hit);
            }
        }

        match self.refresh_reason(key) {
            Some(reason) if !force => info!(key, %reason, "refreshing dataset"),
            _ => info!(key, force, "refreshing dataset"),
        }

        match fetch().await {
            Ok(value) => {
                let stored_at = self
                    .store
                    .set(key, value.clone(), self.ttl_for(key), self.now());
                info!(key, %stored_at, "dataset refreshed");
                Ok(CachedData {
                    data: value,
                    cached_at: stored_at,
                    origin: Origin::Upstream,
                })
            }
            Err(fetch_error) => match self.store.entry(key) {
                Some(entry) => {
                    warn!(
                        key,
                        error = %fetch_error,
                        stored_at = %entry.stored_at,
                        "fetch failed, serving last good value"
                    );
                    Ok(CachedData {
                        data: entry.value,
                        cached_at: entry.stored_at,
                        origin: Origin::Fallback {
                            error: fetch_error.to_string(),
                        },
                    })
                }
                None => {
                    error!(key, error = %fetch_error, "fetch failed and nothing cached");
                    Err(CacheError::NoDataEverFetched {
                        key: key.to_string(),
                        source: fetch_error,
                    })
                }
            },
        }
    }

    /// [`get_or_fetch`](Self::get_or_fetch) with a boxed [`Fetcher`]
    pub async fn get_or_fetch_with(
        &self,
        key: &str,
        fetcher: &dyn Fetcher<V>,
        force: bool,
    ) -> Result<CachedData<V>, CacheError> {
        self.get_or_fetch(key, || fetcher.fetch(), force).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use chrono_tz::Europe::Moscow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn create_test_cache() -> (RateCache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 11, 3, 7, 0, 0).unwrap(),
        ));
        let cache = RateCache::new(Moscow).with_clock(clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_unregistered_key_uses_default_ttl() {
        let (cache, _clock) = create_test_cache();
        assert_eq!(cache.ttl_for("anything"), Duration::seconds(DEFAULT_TTL_SECS));
    }

    #[test]
    fn test_registered_ttl_is_applied_on_set() {
        let (cache, _clock) = create_test_cache();
        cache.register("crypto_rates", Duration::minutes(30));

        cache.set("crypto_rates", "btc".to_string());

        let entry = cache.store().entry("crypto_rates").unwrap();
        assert_eq!(entry.ttl, Duration::minutes(30));
    }

    #[test]
    fn test_needs_refresh_has_no_side_effects() {
        let (cache, _clock) = create_test_cache();
        assert!(cache.needs_refresh("weather"));
        assert!(cache.needs_refresh("weather"));
        assert!(cache.store().is_empty());
    }

    #[tokio::test]
    async fn test_hit_reports_cache_origin() {
        let (cache, _clock) = create_test_cache();
        cache.set("weather", "sunny".to_string());

        let result = cache
            .get_or_fetch("weather", || async { Err(FetchError::NoData) }, false)
            .await
            .unwrap();

        assert_eq!(result.origin, Origin::Cache);
        assert!(!result.is_stale());
    }

    #[tokio::test]
    async fn test_fallback_is_flagged_stale() {
        let (cache, clock) = create_test_cache();
        cache.set("weather", "sunny".to_string());
        clock.advance(Duration::hours(2));

        let result = cache
            .get_or_fetch(
                "weather",
                || async { Err(FetchError::Other("timeout".to_string())) },
                false,
            )
            .await
            .unwrap();

        assert_eq!(result.data, "sunny");
        assert!(result.is_stale());
        assert_eq!(
            result.origin,
            Origin::Fallback {
                error: "timeout".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_fetch() {
        let (cache, _clock) = create_test_cache();
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let reads = (0..5).map(|_| {
            cache.get_or_fetch(
                "currency_rates",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(StdDuration::from_millis(20)).await;
                    Ok("USD 81.5".to_string())
                },
                false,
            )
        });
        let results = futures::future::join_all(reads).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap().data, "USD 81.5");
        }
    }

    #[tokio::test]
    async fn test_concurrent_forced_reads_share_one_fetch() {
        let (cache, _clock) = create_test_cache();
        cache.set("key_rate", "16.5".to_string());
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let reads = (0..3).map(|_| {
            cache.get_or_fetch(
                "key_rate",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(StdDuration::from_millis(20)).await;
                    Ok("16.0".to_string())
                },
                true,
            )
        });
        let results = futures::future::join_all(reads).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_ref().unwrap().data == "16.0"));
    }

    #[tokio::test]
    async fn test_failed_fetch_lets_next_waiter_retry() {
        let (cache, _clock) = create_test_cache();
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let reads = (0..2).map(|_| {
            cache.get_or_fetch(
                "ruonia_rate",
                move || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(StdDuration::from_millis(10)).await;
                    if n == 0 {
                        Err(FetchError::Other("upstream down".to_string()))
                    } else {
                        Ok("16.31".to_string())
                    }
                },
                false,
            )
        });
        let results = futures::future::join_all(reads).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap().data, "16.31");
    }

    #[tokio::test]
    async fn test_clear_prunes_idle_gates() {
        let (cache, _clock) = create_test_cache();
        for key in ["weather", "key_rate", "ruonia_rate"] {
            cache
                .get_or_fetch(key, || async { Ok("v".to_string()) }, false)
                .await
                .unwrap();
        }
        assert_eq!(cache.gates.lock().len(), 3);

        cache.clear(Some("weather"));
        assert_eq!(cache.gates.lock().len(), 2);

        let held = cache.gate("key_rate");
        cache.clear(None);

        assert_eq!(cache.gates.lock().len(), 1);
        assert!(cache.gates.lock().contains_key("key_rate"));
        drop(held);
    }

    #[tokio::test]
    async fn test_slow_fetch_does_not_block_other_keys() {
        let (cache, _clock) = create_test_cache();
        cache.register("key_rate", Duration::hours(24));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();

        let slow = cache.get_or_fetch(
            "key_rate",
            move || async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok("16.5".to_string())
            },
            false,
        );
        let others = async {
            started_rx.await.unwrap();

            let weather = cache
                .get_or_fetch("weather", || async { Ok("snow".to_string()) }, false)
                .await
                .unwrap();
            assert_eq!(weather.data, "snow");
            assert_eq!(cache.inspect().total_entries, 1);
            assert!(cache.needs_refresh("key_rate"));
            assert!(cache.peek("key_rate").is_none());

            release_tx.send(()).unwrap();
        };

        let (slow, ()) = tokio::time::timeout(StdDuration::from_secs(5), async {
            tokio::join!(slow, others)
        })
        .await
        .expect("reads of other keys were blocked by an in-flight fetch");

        assert_eq!(slow.unwrap().data, "16.5");
        assert_eq!(cache.peek("key_rate").as_deref(), Some("16.5"));
    }

    #[tokio::test]
    async fn test_get_or_fetch_with_boxed_fetcher() {
        let (cache, _clock) = create_test_cache();
        let fetcher = crate::fetch::fetcher_fn(|| async { Ok("42".to_string()) });

        let result = cache
            .get_or_fetch_with("crypto_rates", fetcher.as_ref(), false)
            .await
            .unwrap();

        assert_eq!(result.data, "42");
        assert_eq!(result.origin, Origin::Upstream);
    }
}
