//! Refresh decision
//!
//! The single place that decides whether a read must go upstream. Any one
//! trigger is enough: missing entry, crossed schedule boundary, or expired TTL.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use super::schedule::Schedule;

/// Why a key needs a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    /// Nothing has been stored for the key
    Missing,
    /// A scheduled time passed since the key was stored
    ScheduleCrossed,
    /// The entry is older than its TTL
    TtlExpired,
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefreshReason::Missing => "missing",
            RefreshReason::ScheduleCrossed => "schedule crossed",
            RefreshReason::TtlExpired => "ttl expired",
        };
        f.write_str(s)
    }
}

/// Decides whether `key` needs a refresh at `now`
///
/// `entry` is the stored `(stored_at, ttl)` if any. Pure: no state is touched.
pub fn evaluate(
    key: &str,
    entry: Option<(DateTime<Utc>, Duration)>,
    schedule: &Schedule,
    now: DateTime<Utc>,
) -> Option<RefreshReason> {
    let Some((stored_at, ttl)) = entry else {
        return Some(RefreshReason::Missing);
    };

    if schedule.is_due(key, stored_at, now) {
        return Some(RefreshReason::ScheduleCrossed);
    }

    if now - stored_at > ttl {
        return Some(RefreshReason::TtlExpired);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Moscow;

    fn msk(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Moscow
            .with_ymd_and_hms(2025, 11, 3, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_missing_entry_needs_refresh() {
        let schedule = Schedule::new(Moscow);
        assert_eq!(
            evaluate("weather", None, &schedule, msk(10, 0, 0)),
            Some(RefreshReason::Missing)
        );
    }

    #[test]
    fn test_fresh_entry_does_not_need_refresh() {
        let schedule = Schedule::new(Moscow);
        let entry = Some((msk(10, 0, 0), Duration::minutes(30)));
        assert_eq!(evaluate("weather", entry, &schedule, msk(10, 29, 59)), None);
    }

    #[test]
    fn test_ttl_boundary_is_exclusive() {
        let schedule = Schedule::new(Moscow);
        let entry = Some((msk(10, 0, 0), Duration::minutes(30)));

        assert_eq!(evaluate("weather", entry, &schedule, msk(10, 30, 0)), None);
        assert_eq!(
            evaluate("weather", entry, &schedule, msk(10, 30, 1)),
            Some(RefreshReason::TtlExpired)
        );
    }

    #[test]
    fn test_schedule_triggers_before_ttl() {
        let schedule = Schedule::new(Moscow);
        schedule.replace("key_rate", &["12:00"]).unwrap();
        let entry = Some((msk(11, 0, 0), Duration::hours(24)));

        assert_eq!(
            evaluate("key_rate", entry, &schedule, msk(12, 1, 0)),
            Some(RefreshReason::ScheduleCrossed)
        );
    }

    #[test]
    fn test_evaluate_is_repeatable() {
        let schedule = Schedule::new(Moscow);
        schedule.replace("key_rate", &["12:00"]).unwrap();
        let entry = Some((msk(11, 0, 0), Duration::hours(24)));

        let first = evaluate("key_rate", entry, &schedule, msk(12, 1, 0));
        let second = evaluate("key_rate", entry, &schedule, msk(12, 1, 0));

        assert_eq!(first, second);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(RefreshReason::TtlExpired.to_string(), "ttl expired");
    }
}
