//! Bucket granularity and the flooring rule that maps instants to buckets.
//!
//! All bucket boundaries are computed in a fixed UTC offset ("local" time for
//! the store) and reported back as UTC instants. Flooring is the single
//! contract every rebucketing step relies on: a value belongs to a coarse
//! bucket exactly when its timestamp floors to that bucket's start.

use chrono::{
  DateTime, Datelike, Days, FixedOffset, Months, NaiveDateTime, NaiveTime,
  Offset, TimeDelta, Timelike, Utc,
};
use serde::{Deserialize, Serialize};

use crate::{ConfigurationError, width::Width};

// ─── Resolution ──────────────────────────────────────────────────────────────

/// The bucket granularity of a metric's series.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
  FiveMinute,
  Hour,
  Day,
  /// Weeks start on Monday.
  Week,
  Month,
}

impl Resolution {
  /// The token stored in configuration.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::FiveMinute => "five_minute",
      Self::Hour => "hour",
      Self::Day => "day",
      Self::Week => "week",
      Self::Month => "month",
    }
  }

  /// The start of the bucket containing `ts`.
  pub fn floor(self, ts: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = to_local(ts, offset);
    let midnight = local.date().and_time(NaiveTime::MIN);
    let start = match self {
      Self::FiveMinute => {
        let minutes = local.hour() * 60 + local.minute() / 5 * 5;
        midnight + TimeDelta::minutes(minutes.into())
      }
      Self::Hour => midnight + TimeDelta::hours(local.hour().into()),
      Self::Day => midnight,
      Self::Week => {
        midnight - Days::new(local.weekday().num_days_from_monday().into())
      }
      Self::Month => midnight - Days::new(local.day0().into()),
    };
    from_local(start, offset)
  }

  /// The start of the bucket following the one starting at `start`.
  ///
  /// `start` must already be floored. Returns `None` only at the edge of the
  /// representable calendar.
  pub fn step(self, start: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let local = to_local(start, offset);
    let next = match self {
      Self::FiveMinute => local.checked_add_signed(TimeDelta::minutes(5)),
      Self::Hour => local.checked_add_signed(TimeDelta::hours(1)),
      Self::Day => local.checked_add_days(Days::new(1)),
      Self::Week => local.checked_add_days(Days::new(7)),
      Self::Month => local.checked_add_months(Months::new(1)),
    }?;
    Some(from_local(next, offset))
  }
}

impl std::fmt::Display for Resolution {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for Resolution {
  type Err = ConfigurationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "five_minute" => Ok(Self::FiveMinute),
      "hour" => Ok(Self::Hour),
      "day" => Ok(Self::Day),
      "week" => Ok(Self::Week),
      "month" => Ok(Self::Month),
      other => Err(ConfigurationError::UnknownToken {
        kind:  "resolution",
        token: other.to_owned(),
      }),
    }
  }
}

pub(crate) fn to_local(ts: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
  ts.with_timezone(&offset).naive_local()
}

pub(crate) fn from_local(local: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
  (local - TimeDelta::seconds(offset.local_minus_utc().into())).and_utc()
}

// ─── Horizon ─────────────────────────────────────────────────────────────────

/// A half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
  pub start: DateTime<Utc>,
  pub end:   DateTime<Utc>,
}

impl TimeRange {
  pub fn contains(&self, ts: DateTime<Utc>) -> bool {
    self.start <= ts && ts < self.end
  }
}

/// Upper bound on the number of buckets a horizon may span. A year of
/// five-minute buckets fits.
pub const MAX_BUCKETS: usize = 120_000;

/// The ordered bucket starts a metric's series spans at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Horizon {
  pub resolution: Resolution,
  pub buckets:    Vec<DateTime<Utc>>,
  /// Covers every bucket, from the first bucket's start to the end of the
  /// bucket containing `now`.
  pub range:      TimeRange,
}

impl Horizon {
  /// Resolve `width` against `now`: every bucket from the one containing
  /// `now - width` through the one containing `now`, inclusive.
  ///
  /// Fails with [`ConfigurationError::WidthOutOfRange`] when the horizon
  /// would exceed [`MAX_BUCKETS`] buckets.
  pub fn resolve(
    resolution: Resolution,
    width: Width,
    now: DateTime<Utc>,
    offset: FixedOffset,
  ) -> Result<Self, ConfigurationError> {
    let out_of_range = || ConfigurationError::WidthOutOfRange(width.to_string());

    let earliest = width.earliest(now, offset).ok_or_else(out_of_range)?;
    let first = resolution.floor(earliest, offset);
    let last = resolution.floor(now, offset);

    let mut buckets = Vec::new();
    let mut cursor = first;
    while cursor <= last {
      if buckets.len() == MAX_BUCKETS {
        return Err(out_of_range());
      }
      buckets.push(cursor);
      cursor = resolution.step(cursor, offset).ok_or_else(out_of_range)?;
    }

    Ok(Self {
      resolution,
      buckets,
      range: TimeRange { start: first, end: cursor },
    })
  }

  /// Check at configuration time that `width` at `resolution` stays within
  /// [`MAX_BUCKETS`].
  pub fn check(resolution: Resolution, width: Width) -> Result<(), ConfigurationError> {
    Self::resolve(resolution, width, DateTime::<Utc>::UNIX_EPOCH, Utc.fix()).map(drop)
  }
}
