//! Background refresh driver
//!
//! Periodically walks every registered fetcher and refreshes the cache
//! through the same interface chat handlers use. Progress is reported to
//! the owner over a tokio channel.
//!
//! Jobs run inline in a single task loop, so two runs never overlap: a tick
//! that arrives while a run is in progress is skipped, and at most one manual
//! request can be queued behind the current run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{Origin, RateCache, RefreshResult};
use crate::fetch::FetcherMap;

/// How a driver run refreshes the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverMode {
    /// Ordinary reads: only keys the refresh policy marks stale are fetched
    #[default]
    Warm,
    /// Forced refresh of every key
    Force,
}

/// Messages sent from the background driver to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshMessage {
    /// A run started
    RefreshStarted,
    /// A dataset was fetched and stored
    DatasetRefreshed {
        key: String,
        stored_at: DateTime<Utc>,
    },
    /// A dataset could not be refreshed; any cached value was kept
    RefreshError { key: String, message: String },
    /// A run finished
    RefreshCompleted { refreshed: usize, failed: usize },
}

/// Configuration for the refresh driver
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Interval between runs
    pub interval: Duration,
    /// Warm (stale keys only) or force (every key)
    pub mode: DriverMode,
    /// Whether the driver runs at all
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1800), // 30 minutes
            mode: DriverMode::Warm,
            enabled: true,
        }
    }
}

/// Handle for controlling the background refresh driver
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    /// Spawns the driver task
    ///
    /// The first run happens one `interval` after spawning, or earlier via
    /// [`request_refresh`](Self::request_refresh). With `enabled = false`
    /// nothing is spawned.
    pub fn spawn<V>(
        cache: Arc<RateCache<V>>,
        fetchers: Arc<FetcherMap<V>>,
        config: RefreshConfig,
    ) -> Self
    where
        V: Clone + Send + Sync + 'static,
    {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = if config.enabled {
            info!(
                interval_secs = config.interval.as_secs(),
                mode = ?config.mode,
                datasets = fetchers.len(),
                "refresh driver started"
            );
            Some(tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // Skip the first tick (immediate)
                interval.tick().await;

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            run_job(&cache, &fetchers, config.mode, &msg_tx).await;
                        }
                        Some(()) = trigger_rx.recv() => {
                            run_job(&cache, &fetchers, config.mode, &msg_tx).await;
                        }
                        _ = shutdown_rx.recv() => {
                            break;
                        }
                    }
                }
                info!("refresh driver stopped");
            }))
        } else {
            None
        };

        Self {
            receiver: msg_rx,
            trigger_tx,
            shutdown_tx,
            task,
        }
    }

    /// Whether the driver task is running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Requests an immediate run
    ///
    /// Returns `false` if the driver is disabled or a request is already
    /// queued behind the current run.
    pub fn request_refresh(&self) -> bool {
        self.task.is_some() && self.trigger_tx.try_send(()).is_ok()
    }

    /// Shuts down the driver and waits for the current run to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// One driver run. Messages are dropped rather than blocking the run when
/// nobody drains the channel.
async fn run_job<V>(
    cache: &RateCache<V>,
    fetchers: &FetcherMap<V>,
    mode: DriverMode,
    tx: &mpsc::Sender<RefreshMessage>,
) where
    V: Clone + Send + Sync + 'static,
{
    let _ = tx.try_send(RefreshMessage::RefreshStarted);
    let mut refreshed = 0;
    let mut failed = 0;

    match mode {
        DriverMode::Force => {
            for (key, result) in cache.force_refresh(None, fetchers).await {
                let message = match result {
                    RefreshResult::Success { stored_at, .. } => {
                        refreshed += 1;
                        RefreshMessage::DatasetRefreshed { key, stored_at }
                    }
                    RefreshResult::Error { message } => {
                        failed += 1;
                        RefreshMessage::RefreshError { key, message }
                    }
                };
                let _ = tx.try_send(message);
            }
        }
        DriverMode::Warm => {
            // The read itself decides: a fresh hit is a skip, not a refresh
            for (key, fetcher) in fetchers {
                let message = match cache.get_or_fetch_with(key, fetcher.as_ref(), false).await {
                    Ok(data) => match data.origin {
                        Origin::Cache => {
                            debug!(key = %key, "still fresh, skipping");
                            continue;
                        }
                        Origin::Fallback { error } => {
                            failed += 1;
                            RefreshMessage::RefreshError {
                                key: key.clone(),
                                message: error,
                            }
                        }
                        Origin::Upstream => {
                            refreshed += 1;
                            RefreshMessage::DatasetRefreshed {
                                key: key.clone(),
                                stored_at: data.cached_at,
                            }
                        }
                    },
                    Err(err) => {
                        failed += 1;
                        RefreshMessage::RefreshError {
                            key: key.clone(),
                            message: err.to_string(),
                        }
                    }
                };
                let _ = tx.try_send(message);
            }
        }
    }

    if failed > 0 {
        warn!(refreshed, failed, "refresh run finished with failures");
    } else {
        info!(refreshed, "refresh run finished");
    }
    let _ = tx.try_send(RefreshMessage::RefreshCompleted { refreshed, failed });
}
