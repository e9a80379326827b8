//! Daily refresh schedule
//!
//! Each key may carry a sorted set of wall-clock times ("09:30", "16:00")
//! evaluated in one fixed timezone. A key is due once a scheduled instant
//! falls between its last store and now; after the next successful store
//! that same instant no longer counts.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;

use crate::error::CacheError;

/// Parses a strict 24-hour `HH:MM` string
///
/// Surrounding whitespace is ignored. `9:00`, `24:00` and `12:60` are rejected.
pub fn parse_time(input: &str) -> Option<NaiveTime> {
    let bytes = input.trim().as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return None;
    }
    if ![0, 1, 3, 4].iter().all(|&i| bytes[i].is_ascii_digit()) {
        return None;
    }
    let digit = |i: usize| u32::from(bytes[i] - b'0');
    let hour = digit(0) * 10 + digit(1);
    let minute = digit(3) * 10 + digit(4);
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Validates a whole list of times for `key`
///
/// Returns the de-duplicated, ascending list, or every invalid token if any
/// entry fails to parse.
pub fn parse_times<S: AsRef<str>>(key: &str, inputs: &[S]) -> Result<Vec<NaiveTime>, CacheError> {
    let mut times = BTreeSet::new();
    let mut invalid = Vec::new();

    for input in inputs {
        match parse_time(input.as_ref()) {
            Some(time) => {
                times.insert(time);
            }
            None => invalid.push(input.as_ref().to_string()),
        }
    }

    if !invalid.is_empty() {
        return Err(CacheError::InvalidSchedule {
            key: key.to_string(),
            invalid,
        });
    }
    Ok(times.into_iter().collect())
}

/// Formats a schedule time as `HH:MM`
pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Whether any daily `times` falls in `(last, now]`, all in local wall-clock time
fn crossed(times: &[NaiveTime], last: NaiveDateTime, now: NaiveDateTime) -> bool {
    if times.is_empty() || now <= last {
        return false;
    }

    let today = now.date();
    let mut day = last.date();

    // A whole calendar day in between means every time was crossed at least once
    if (today - day).num_days() >= 2 {
        return true;
    }

    loop {
        let hit = times.iter().any(|t| {
            let instant = day.and_time(*t);
            instant > last && instant <= now
        });
        if hit {
            return true;
        }
        if day >= today {
            return false;
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => return false,
        };
    }
}

/// Per-key daily refresh times in a single timezone
#[derive(Debug)]
pub struct Schedule {
    tz: Tz,
    table: RwLock<HashMap<String, Vec<NaiveTime>>>,
    /// Keys whose times were replaced at runtime rather than configured
    overridden: RwLock<BTreeSet<String>>,
}

impl Schedule {
    /// Creates an empty schedule evaluated in `tz`
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            table: RwLock::new(HashMap::new()),
            overridden: RwLock::new(BTreeSet::new()),
        }
    }

    /// The timezone schedule times are expressed in
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Validates and replaces the times for `key`
    ///
    /// Nothing changes if any entry is invalid. An empty list removes the
    /// key's schedule so that TTL alone governs it.
    pub fn replace<S: AsRef<str>>(&self, key: &str, inputs: &[S]) -> Result<Vec<NaiveTime>, CacheError> {
        let times = parse_times(key, inputs)?;
        self.set(key, times.clone());
        self.overridden.write().insert(key.to_string());
        Ok(times)
    }

    /// Installs already-validated times
    pub(crate) fn set(&self, key: &str, times: Vec<NaiveTime>) {
        let mut table = self.table.write();
        if times.is_empty() {
            table.remove(key);
        } else {
            table.insert(key.to_string(), times);
        }
    }

    /// Sorted times configured for `key` (empty when unscheduled)
    pub fn times(&self, key: &str) -> Vec<NaiveTime> {
        self.table.read().get(key).cloned().unwrap_or_default()
    }

    /// Schedules replaced at runtime, including ones cleared to empty
    pub fn overrides(&self) -> BTreeMap<String, Vec<NaiveTime>> {
        self.overridden
            .read()
            .iter()
            .map(|key| (key.clone(), self.times(key)))
            .collect()
    }

    /// Whether a scheduled boundary for `key` was crossed after `last_stored_at`
    pub fn is_due(&self, key: &str, last_stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let table = self.table.read();
        match table.get(key) {
            Some(times) => crossed(times, self.local(last_stored_at), self.local(now)),
            None => false,
        }
    }

    /// Next scheduled time of day after `now`, wrapping to tomorrow's first
    ///
    /// For display only; `None` when the key has no schedule.
    pub fn next_due(&self, key: &str, now: DateTime<Utc>) -> Option<NaiveTime> {
        let table = self.table.read();
        let times = table.get(key)?;
        let current = self.local(now).time();
        times
            .iter()
            .find(|t| **t > current)
            .or_else(|| times.first())
            .copied()
    }

    fn local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.with_timezone(&self.tz).naive_local()
    }
}
