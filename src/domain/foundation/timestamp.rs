//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Returns the calendar day (UTC) this timestamp falls on.
    pub fn date(&self) -> NaiveDate {
        self.0.date_naive()
    }

    /// Creates a new timestamp by adding the specified number of microseconds.
    pub fn plus_micros(&self, micros: i64) -> Self {
        Self(self.0 + Duration::microseconds(micros))
    }

    /// Creates a new timestamp by adding the specified number of seconds.
    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0 + Duration::seconds(secs))
    }

    /// Returns the current time, or one microsecond after `floor` if the
    /// clock has not moved past it.
    ///
    /// Truncated to microseconds so values survive storage unchanged.
    pub fn now_after(floor: Option<&Timestamp>) -> Self {
        let now = Self(Utc::now().trunc_subsecs(6));
        match floor {
            Some(floor) if !now.is_after(floor) => floor.plus_micros(1),
            _ => now,
        }
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}
