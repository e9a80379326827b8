//! Snapshot persistence for the in-memory cache
//!
//! The cache itself lives in memory; a snapshot lets a short-lived process
//! (the CLI) or a restarted bot pick up where the previous run left off.
//! Snapshots are a single JSON file in an XDG-compliant cache directory
//! (`~/.cache/finbot-cache/` on Linux).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use super::manager::RateCache;
use super::schedule::format_time;
use crate::error::CacheError;

const SNAPSHOT_FILE: &str = "snapshot.json";

/// One persisted cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry<V> {
    /// The cached data
    pub data: V,
    /// When the data was originally stored
    pub stored_at: DateTime<Utc>,
}

/// Everything needed to rebuild a cache's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<V> {
    /// When the snapshot was taken
    pub saved_at: DateTime<Utc>,
    /// Stored entries by key
    pub entries: BTreeMap<String, SnapshotEntry<V>>,
    /// Schedules replaced at runtime (`HH:MM`), overriding configured ones
    #[serde(default)]
    pub schedules: BTreeMap<String, Vec<String>>,
}

/// Reads and writes cache snapshots on disk
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    /// Directory where the snapshot file is stored
    dir: PathBuf,
}

impl SnapshotStore {
    /// Creates a store in the XDG cache directory
    ///
    /// Returns `None` if the directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "finbot-cache")?;
        Some(Self {
            dir: project_dirs.cache_dir().to_path_buf(),
        })
    }

    /// Creates a store in a custom directory
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Directory holding the snapshot
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the snapshot file
    pub fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Writes `snapshot`, replacing any previous one
    ///
    /// The file is written next to its final location and renamed into
    /// place, so a crash mid-write leaves the old snapshot intact.
    pub fn save<V: Serialize>(&self, snapshot: &Snapshot<V>) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.path())?;

        debug!(path = %self.path().display(), entries = snapshot.entries.len(), "snapshot saved");
        Ok(())
    }

    /// Reads the snapshot
    ///
    /// Returns `None` if there is no snapshot yet or it cannot be parsed; a
    /// corrupt snapshot only costs a refetch.
    pub fn load<V: DeserializeOwned>(&self) -> Option<Snapshot<V>> {
        let path = self.path();
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable snapshot");
                None
            }
        }
    }
}

impl<V: Clone> RateCache<V> {
    /// Captures every stored entry and runtime schedule override
    pub fn snapshot(&self) -> Snapshot<V> {
        let entries = self
            .store
            .entries()
            .into_iter()
            .map(|(key, entry)| {
                (
                    key,
                    SnapshotEntry {
                        data: entry.value,
                        stored_at: entry.stored_at,
                    },
                )
            })
            .collect();

        let schedules = self
            .schedule
            .overrides()
            .into_iter()
            .map(|(key, times)| (key, times.into_iter().map(format_time).collect()))
            .collect();

        Snapshot {
            saved_at: self.now(),
            entries,
            schedules,
        }
    }

    /// Loads entries and schedule overrides from `snapshot`
    ///
    /// Entries keep their original `stored_at` and take the key's current
    /// TTL, so a restored value is judged exactly as if the process never
    /// stopped. An entry is skipped when the cache already holds a value
    /// stored at or after it. Invalid schedules are skipped. Returns the
    /// number of entries restored.
    pub fn restore(&self, snapshot: Snapshot<V>) -> usize {
        for (key, times) in &snapshot.schedules {
            if let Err(err) = self.schedule.replace(key, times.as_slice()) {
                warn!(key = %key, error = %err, "skipping persisted schedule");
            }
        }

        let mut count = 0;
        for (key, entry) in snapshot.entries {
            let ttl = self.ttl_for(&key);
            if self.store.restore(&key, entry.data, ttl, entry.stored_at) {
                count += 1;
            } else {
                debug!(key = %key, "cached value is newer than snapshot, keeping it");
            }
        }
        debug!(entries = count, "snapshot restored");
        count
    }
}
