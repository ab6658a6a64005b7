use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::sync::Mutex;

/// MonotonicClock
///
/// Produces the `created` version stamp of new entries: ISO-8601 UTC with
/// millisecond precision, strictly increasing within the process so two writes
/// landing in the same millisecond can never share a `(key, created)` pair.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next stamp, never equal to or older than a previous one.
    pub fn next_stamp(&self) -> String {
        let now = truncate_to_millis(Utc::now());
        // The stored instant stays a valid lower bound even if poisoned.
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let stamp = match *last {
            Some(previous) if now <= previous => previous + Duration::milliseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(instant.timestamp_millis()).unwrap_or(instant)
}
