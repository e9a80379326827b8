//! Fetch functions supplied to the cache
//!
//! A fetcher is an opaque, possibly slow, possibly failing operation that
//! produces a fresh value for one dataset. The cache treats the value as
//! opaque and imposes no timeout; timeout discipline belongs to the fetcher.

pub mod http;

pub use http::HttpFetcher;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Errors a fetcher can report
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed (connect, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status
    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Response could not be interpreted
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Upstream answered but had nothing to offer
    #[error("upstream returned no data")]
    NoData,

    /// Any other failure raised by a caller-supplied fetcher
    #[error("{0}")]
    Other(String),
}

/// Produces a fresh value for a dataset
#[async_trait]
pub trait Fetcher<V>: Send + Sync {
    /// Fetch the current value from upstream
    async fn fetch(&self) -> Result<V, FetchError>;
}

/// Fetchers keyed by dataset key, as handed to the admin surface and the refresh driver
pub type FetcherMap<V> = BTreeMap<String, Arc<dyn Fetcher<V>>>;

/// Adapter turning an async closure into a [`Fetcher`]
pub struct FnFetcher<F> {
    f: F,
}

#[async_trait]
impl<V, F, Fut> Fetcher<V> for FnFetcher<F>
where
    V: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
{
    async fn fetch(&self) -> Result<V, FetchError> {
        (self.f)().await
    }
}

/// Wraps a closure returning a future as a shareable fetcher
///
/// ```
/// use finbot_cache::fetch::{fetcher_fn, FetchError};
///
/// let fetcher = fetcher_fn(|| async { Ok::<_, FetchError>(42u32) });
/// # let _ = fetcher;
/// ```
pub fn fetcher_fn<V, F, Fut>(f: F) -> Arc<dyn Fetcher<V>>
where
    V: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
{
    Arc::new(FnFetcher { f })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fetcher_fn_invokes_closure_each_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = fetcher_fn(move || {
            let counter = Arc::clone(&counter);
            async move { Ok::<_, FetchError>(counter.fetch_add(1, Ordering::SeqCst) + 1) }
        });

        assert_eq!(fetcher.fetch().await.unwrap(), 1);
        assert_eq!(fetcher.fetch().await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetcher_fn_propagates_failure() {
        let fetcher = fetcher_fn(|| async { Err::<String, _>(FetchError::NoData) });

        let err = fetcher.fetch().await.unwrap_err();

        assert!(matches!(err, FetchError::NoData));
    }

    #[test]
    fn test_status_error_message() {
        let err = FetchError::Status {
            status: 503,
            message: "Service Unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "upstream returned 503: Service Unavailable");
    }
}
