//! Configuration loading
//!
//! Configuration is loaded from TOML with the following resolution order:
//! 1. `--config <path>` (CLI flag; the file must exist)
//! 2. `config.toml` in the XDG config directory (`~/.config/finbot-cache/` on Linux)
//! 3. Built-in defaults
//!
//! Datasets from the file are layered over the built-in ones: a
//! `[datasets.key_rate]` section only overrides the fields it sets.
//!
//! ```toml
//! [cache]
//! timezone = "Europe/Moscow"
//! default_ttl_secs = 3600
//!
//! [driver]
//! enabled = true
//! interval_secs = 1800
//! mode = "warm"
//!
//! [datasets.weather]
//! url = "https://api.openweathermap.org/data/2.5/weather?q=Moscow&appid=KEY&units=metric"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use chrono_tz::Tz;
use directories::ProjectDirs;
use serde::Deserialize;
use serde_json::Value;

use crate::cache::schedule::parse_times;
use crate::cache::RateCache;
use crate::datasets::{all_datasets, DEFAULT_TIMEZONE};
use crate::error::CacheError;
use crate::fetch::http::{build_client, DEFAULT_TIMEOUT_SECS};
use crate::fetch::{Fetcher, FetcherMap, HttpFetcher};
use crate::refresh::{DriverMode, RefreshConfig};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub driver: DriverSection,
    #[serde(default)]
    pub http: HttpSection,
    /// Per-dataset overrides and additions
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetConfig>,
}

/// Cache-wide settings
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// IANA timezone schedules are evaluated in (default: Europe/Moscow)
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// TTL for keys without their own (default: 3600)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_ttl_secs() -> u64 {
    3600
}

/// Background refresh driver settings
#[derive(Debug, Clone, Deserialize)]
pub struct DriverSection {
    /// Whether `watch` runs periodic refreshes (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Seconds between runs (default: 1800)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// `warm` refreshes stale keys only, `force` refetches everything
    #[serde(default)]
    pub mode: DriverMode,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval_secs(),
            mode: DriverMode::default(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    1800
}

/// HTTP fetcher settings
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSection {
    /// Per-request timeout in seconds (default: 15)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Dataset section as written in the file; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetConfig {
    pub ttl_secs: Option<u64>,
    pub schedule: Option<Vec<String>>,
    pub url: Option<String>,
}

/// Dataset after layering the file over the built-ins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDataset {
    pub ttl_secs: u64,
    pub schedule: Vec<String>,
    pub url: Option<String>,
}

impl Config {
    /// Load configuration from `path`, the default location, or built-ins
    pub fn load(path: Option<&Path>) -> Result<Self, CacheError> {
        match path {
            Some(path) => Self::load_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::load_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn load_file(path: &Path) -> Result<Self, CacheError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CacheError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, CacheError> {
        toml::from_str(content).map_err(|e| CacheError::Configuration(e.to_string()))
    }

    /// Timezone schedules are evaluated in
    pub fn timezone(&self) -> Result<Tz, CacheError> {
        self.cache.timezone.parse::<Tz>().map_err(|e| {
            CacheError::Configuration(format!("unknown timezone '{}': {e}", self.cache.timezone))
        })
    }

    /// Built-in datasets with the file's sections layered on top
    pub fn datasets(&self) -> BTreeMap<String, ResolvedDataset> {
        let mut resolved: BTreeMap<String, ResolvedDataset> = all_datasets()
            .iter()
            .map(|d| {
                (
                    d.key.to_string(),
                    ResolvedDataset {
                        ttl_secs: d.ttl_secs,
                        schedule: d.schedule.iter().map(|s| s.to_string()).collect(),
                        url: d.url.map(str::to_string),
                    },
                )
            })
            .collect();

        for (key, section) in &self.datasets {
            let entry = resolved
                .entry(key.clone())
                .or_insert_with(|| ResolvedDataset {
                    ttl_secs: self.cache.default_ttl_secs,
                    schedule: Vec::new(),
                    url: None,
                });
            if let Some(ttl_secs) = section.ttl_secs {
                entry.ttl_secs = ttl_secs;
            }
            if let Some(schedule) = &section.schedule {
                entry.schedule = schedule.clone();
            }
            if let Some(url) = &section.url {
                entry.url = Some(url.clone());
            }
        }

        resolved
    }

    /// Builds a cache with every dataset's TTL and schedule registered
    ///
    /// Fails on an unknown timezone or any malformed schedule time.
    pub fn build_cache<V>(&self) -> Result<RateCache<V>, CacheError> {
        let cache = RateCache::new(self.timezone()?)
            .with_default_ttl(seconds(self.cache.default_ttl_secs)?);

        for (key, dataset) in self.datasets() {
            let times = parse_times(&key, dataset.schedule.as_slice())?;
            cache.register(&key, seconds(dataset.ttl_secs)?);
            cache.schedule().set(&key, times);
        }

        Ok(cache)
    }

    /// HTTP fetchers for every dataset that has a URL
    pub fn http_fetchers(&self) -> Result<FetcherMap<Value>, CacheError> {
        let client = build_client(StdDuration::from_secs(self.http.timeout_secs))
            .map_err(|e| CacheError::Configuration(format!("cannot build HTTP client: {e}")))?;

        let mut fetchers = FetcherMap::new();
        for (key, dataset) in self.datasets() {
            if let Some(url) = dataset.url {
                let fetcher: Arc<dyn Fetcher<Value>> =
                    Arc::new(HttpFetcher::with_client(client.clone(), url));
                fetchers.insert(key, fetcher);
            }
        }
        Ok(fetchers)
    }

    /// Settings for the background refresh driver
    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            interval: StdDuration::from_secs(self.driver.interval_secs.max(1)),
            mode: self.driver.mode,
            enabled: self.driver.enabled,
        }
    }
}

/// `config.toml` in the XDG config directory, if a home directory exists
pub fn default_config_path() -> Option<PathBuf> {
    let dirs = ProjectDirs::from("", "", "finbot-cache")?;
    Some(dirs.config_dir().join("config.toml"))
}

fn seconds(secs: u64) -> Result<Duration, CacheError> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| CacheError::Configuration(format!("duration out of range: {secs}s")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{CRYPTO_RATES, KEY_RATE, WEATHER};
    use chrono::NaiveTime;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.timezone, "Europe/Moscow");
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert!(config.driver.enabled);
        assert_eq!(config.driver.interval_secs, 1800);
        assert_eq!(config.driver.mode, DriverMode::Warm);
        assert_eq!(config.http.timeout_secs, 15);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.cache.timezone, "Europe/Moscow");
        assert_eq!(config.datasets().len(), 5);
    }

    #[test]
    fn test_datasets_layer_over_builtins() {
        let config = Config::from_toml(
            r#"
            [datasets.key_rate]
            schedule = ["10:00"]

            [datasets.weather]
            url = "https://weather.example/moscow"

            [datasets.gold_price]
            url = "https://gold.example/"
            "#,
        )
        .unwrap();

        let datasets = config.datasets();
        assert_eq!(datasets[KEY_RATE].schedule, vec!["10:00"]);
        assert_eq!(datasets[KEY_RATE].ttl_secs, 86_400);
        assert_eq!(
            datasets[WEATHER].url.as_deref(),
            Some("https://weather.example/moscow")
        );
        assert_eq!(datasets["gold_price"].ttl_secs, 3600);
        assert!(datasets["gold_price"].schedule.is_empty());
    }

    #[test]
    fn test_build_cache_registers_ttls_and_schedules() {
        let cache: RateCache<String> = Config::default().build_cache().unwrap();

        assert_eq!(cache.ttl_for(CRYPTO_RATES), Duration::minutes(30));
        assert_eq!(cache.ttl_for(KEY_RATE), Duration::hours(24));
        assert_eq!(
            cache.schedule().times(KEY_RATE),
            vec![
                NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
                NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            ]
        );
        assert!(cache.schedule().times(CRYPTO_RATES).is_empty());
    }

    #[test]
    fn test_build_cache_rejects_bad_schedule() {
        let config = Config::from_toml(
            r#"
            [datasets.key_rate]
            schedule = ["10:00", "noon"]
            "#,
        )
        .unwrap();

        let result: Result<RateCache<String>, _> = config.build_cache();
        assert!(matches!(result, Err(CacheError::InvalidSchedule { .. })));
    }

    #[test]
    fn test_unknown_timezone_is_configuration_error() {
        let config = Config::from_toml(
            r#"
            [cache]
            timezone = "Mars/Olympus_Mons"
            "#,
        )
        .unwrap();

        let err = config.timezone().unwrap_err();
        assert!(err.to_string().contains("Mars/Olympus_Mons"));
    }

    #[test]
    fn test_malformed_toml_is_configuration_error() {
        let err = Config::from_toml("[cache\ntimezone =").unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[test]
    fn test_driver_mode_parses() {
        let config = Config::from_toml(
            r#"
            [driver]
            mode = "force"
            interval_secs = 600
            "#,
        )
        .unwrap();

        let refresh = config.refresh_config();
        assert_eq!(refresh.mode, DriverMode::Force);
        assert_eq!(refresh.interval, StdDuration::from_secs(600));
    }

    #[test]
    fn test_http_fetchers_skip_datasets_without_url() {
        let fetchers = Config::default().http_fetchers().unwrap();
        assert!(fetchers.contains_key(KEY_RATE));
        assert!(!fetchers.contains_key(WEATHER));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(file, "[http]\ntimeout_secs = 5").unwrap();

        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.http.timeout_secs, 5);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let result = Config::load(Some(Path::new("/nonexistent/finbot-cache.toml")));
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }
}
