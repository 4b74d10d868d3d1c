//! Time sources for Parley.
//!
//! The core never reads the system clock directly; every component receives
//! a [`Clock`] so staleness can be driven deterministically in tests.

use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use serde::Serializer;
use std::sync::Mutex;
use std::time::Duration;

/// A source of "now".
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by [`Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a manual clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let Ok(step) = ChronoDuration::from_std(by) else {
            return;
        };
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.checked_add_signed(step).unwrap_or(*now);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Format an instant as local `HH:MM:SS`, the way messages are stamped on the wire.
#[must_use]
pub fn format_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// Serde adapter writing an instant as `HH:MM:SS`.
pub fn serialize_hms<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_time(at))
}

/// Time elapsed between `since` and `now`, zero if `since` lies in the future.
#[must_use]
pub fn elapsed(since: &DateTime<Utc>, now: &DateTime<Utc>) -> Duration {
    now.signed_duration_since(*since)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
