//! The lookback horizon of a metric.
//!
//! Grammar: `<count>_<unit>` where `count` is a positive integer and `unit` is
//! one of `minute`, `hour`, `day`, `week`, `month` or `year`, singular or
//! plural. `90_days` and `1_year` are both valid.

use chrono::{DateTime, Days, FixedOffset, Months, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
  ConfigurationError,
  bucket::{from_local, to_local},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidthUnit {
  Minutes,
  Hours,
  Days,
  Weeks,
  Months,
  Years,
}

impl WidthUnit {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Minutes => "minutes",
      Self::Hours => "hours",
      Self::Days => "days",
      Self::Weeks => "weeks",
      Self::Months => "months",
      Self::Years => "years",
    }
  }

  fn parse(token: &str) -> Option<Self> {
    let unit = match token.strip_suffix('s').unwrap_or(token) {
      "minute" => Self::Minutes,
      "hour" => Self::Hours,
      "day" => Self::Days,
      "week" => Self::Weeks,
      "month" => Self::Months,
      "year" => Self::Years,
      _ => return None,
    };
    Some(unit)
  }
}

/// How far back a series reaches from the evaluation instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Width {
  pub count: u32,
  pub unit:  WidthUnit,
}

impl Width {
  /// `now` minus this width, computed on the local calendar so that month and
  /// year widths land on the same day of the month.
  pub fn earliest(self, now: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let local = to_local(now, offset);
    let count = i64::from(self.count);
    let earliest = match self.unit {
      WidthUnit::Minutes => local.checked_sub_signed(TimeDelta::try_minutes(count)?),
      WidthUnit::Hours => local.checked_sub_signed(TimeDelta::try_hours(count)?),
      WidthUnit::Days => local.checked_sub_days(Days::new(count as u64)),
      WidthUnit::Weeks => local.checked_sub_days(Days::new(count as u64 * 7)),
      WidthUnit::Months => local.checked_sub_months(Months::new(self.count)),
      WidthUnit::Years => local.checked_sub_months(Months::new(self.count.checked_mul(12)?)),
    }?;
    Some(from_local(earliest, offset))
  }
}

impl std::fmt::Display for Width {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let unit = self.unit.as_str();
    let unit = if self.count == 1 { unit.trim_end_matches('s') } else { unit };
    write!(f, "{}_{unit}", self.count)
  }
}

impl std::str::FromStr for Width {
  type Err = ConfigurationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || ConfigurationError::InvalidWidth(s.to_owned());

    let (count, unit) = s.split_once('_').ok_or_else(invalid)?;
    if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
      return Err(invalid());
    }
    let count: u32 = count.parse().map_err(|_| invalid())?;
    if count == 0 {
      return Err(invalid());
    }
    let unit = WidthUnit::parse(unit).ok_or_else(invalid)?;

    Ok(Self { count, unit })
  }
}

impl Serialize for Width {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for Width {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
  }
}
