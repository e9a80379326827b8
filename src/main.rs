//! finbot-cache - Operator CLI for the finance bot's dataset cache
//!
//! Each invocation restores the cache from its snapshot, runs one command,
//! prints the result as JSON on stdout and saves the snapshot again. Logs
//! go to stderr (`RUST_LOG` overrides the default `info` level).

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Value};
use tracing::{info, warn};

use finbot_cache::cache::schedule::format_time;
use finbot_cache::cache::{Origin, RateCache, SnapshotStore};
use finbot_cache::cli::{Cli, Command};
use finbot_cache::config::Config;
use finbot_cache::error::CacheError;
use finbot_cache::fetch::FetcherMap;
use finbot_cache::refresh::{DriverMode, RefreshConfig, RefreshHandle, RefreshMessage};

type BoxError = Box<dyn Error + Send + Sync>;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let config = Config::load(cli.config.as_deref())?;
    let cache: Arc<RateCache<Value>> = Arc::new(config.build_cache()?);

    let snapshots = match cli.state_dir {
        Some(dir) => SnapshotStore::with_dir(dir),
        None => SnapshotStore::new().ok_or_else(|| {
            CacheError::Configuration("cannot determine a cache directory; pass --state-dir".into())
        })?,
    };
    if let Some(snapshot) = snapshots.load() {
        cache.restore(snapshot);
    }

    let fetchers = config.http_fetchers()?;

    match cli.command {
        Command::Get { key, force } => {
            let fetcher = fetchers
                .get(&key)
                .ok_or_else(|| CacheError::UnknownKey(key.clone()))?;
            let result = cache.get_or_fetch_with(&key, fetcher.as_ref(), force).await;
            snapshots.save(&cache.snapshot())?;
            let data = result?;
            let (origin, error) = match data.origin {
                Origin::Cache => ("cache", None),
                Origin::Upstream => ("upstream", None),
                Origin::Fallback { error } => ("fallback", Some(error)),
            };
            print_json(&json!({
                "key": key,
                "value": data.data,
                "cached_at": data.cached_at,
                "origin": origin,
                "error": error,
            }))?;
        }
        Command::Refresh { key } => {
            let results = cache.force_refresh(key.as_deref(), &fetchers).await;
            snapshots.save(&cache.snapshot())?;
            let failed = results.values().filter(|r| !r.is_success()).count();
            if failed > 0 {
                warn!(failed, total = results.len(), "some datasets were not refreshed");
            }
            print_json(&results)?;
        }
        Command::Inspect => {
            print_json(&cache.inspect())?;
        }
        Command::Clear { key } => {
            cache.clear(key.as_deref());
            snapshots.save(&cache.snapshot())?;
            print_json(&json!({ "cleared": key.as_deref().unwrap_or("*") }))?;
        }
        Command::Schedule { key, times, clear } => {
            let current = if clear || !times.is_empty() {
                let updated = cache.update_schedule(&key, times.as_slice())?;
                snapshots.save(&cache.snapshot())?;
                updated
            } else {
                cache.schedule().times(&key)
            };
            let formatted: Vec<String> = current.into_iter().map(format_time).collect();
            print_json(&json!({
                "key": key,
                "timezone": cache.schedule().timezone().name(),
                "times": formatted,
            }))?;
        }
        Command::Watch { interval, force } => {
            let mut refresh_config = config.refresh_config();
            if let Some(secs) = interval {
                refresh_config.interval = Duration::from_secs(secs.max(1));
            }
            if force {
                refresh_config.mode = DriverMode::Force;
            }
            if !refresh_config.enabled {
                return Err(CacheError::Configuration(
                    "the refresh driver is disabled in the configuration".into(),
                )
                .into());
            }
            watch(cache, fetchers, refresh_config, &snapshots).await?;
        }
    }

    Ok(())
}

/// Runs the refresh driver until Ctrl-C, saving the snapshot after every run
async fn watch(
    cache: Arc<RateCache<Value>>,
    fetchers: FetcherMap<Value>,
    refresh_config: RefreshConfig,
    snapshots: &SnapshotStore,
) -> Result<(), BoxError> {
    let mut handle = RefreshHandle::spawn(Arc::clone(&cache), Arc::new(fetchers), refresh_config);
    handle.request_refresh();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping");
                break;
            }
            message = handle.receiver.recv() => match message {
                Some(RefreshMessage::RefreshCompleted { refreshed, failed }) => {
                    if let Err(err) = snapshots.save(&cache.snapshot()) {
                        warn!(error = %err, "could not save snapshot");
                    }
                    print_json(&json!({ "refreshed": refreshed, "failed": failed }))?;
                }
                Some(RefreshMessage::RefreshError { key, message }) => {
                    warn!(key = %key, error = %message, "dataset not refreshed");
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    handle.shutdown().await;
    snapshots.save(&cache.snapshot())?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), BoxError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
