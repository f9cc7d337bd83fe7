//! Threshold alerts over a metric's trailing buckets.
//!
//! An alert activates only when every one of its `delay` most recent bucket
//! values exceeds the threshold, and deactivates as soon as any of them does
//! not. The delay window is the alert's hysteresis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConfigurationError, metric::MetricId, series::Series};

id_type!(
  /// Identifier of an [`Alert`].
  AlertId
);

/// Which side of the threshold counts as exceeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
  Above,
  Below,
  AtOrAbove,
  AtOrBelow,
}

impl Direction {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Above => "above",
      Self::Below => "below",
      Self::AtOrAbove => "at_or_above",
      Self::AtOrBelow => "at_or_below",
    }
  }

  pub fn exceeds(self, value: f64, threshold: f64) -> bool {
    match self {
      Self::Above => value > threshold,
      Self::Below => value < threshold,
      Self::AtOrAbove => value >= threshold,
      Self::AtOrBelow => value <= threshold,
    }
  }
}

impl std::fmt::Display for Direction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for Direction {
  type Err = ConfigurationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "above" => Ok(Self::Above),
      "below" => Ok(Self::Below),
      "at_or_above" => Ok(Self::AtOrAbove),
      "at_or_below" => Ok(Self::AtOrBelow),
      other => Err(ConfigurationError::UnknownToken {
        kind:  "direction",
        token: other.to_owned(),
      }),
    }
  }
}

/// A rule watching one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
  pub alert_id:  AlertId,
  pub metric_id: MetricId,
  pub name:      String,
  pub threshold: f64,
  pub direction: Direction,
  /// Number of trailing buckets that must all exceed; at least 1.
  pub delay:     u32,
  pub enabled:   bool,
}

/// Input to [`crate::store::MetricStore::create_alert`].
#[derive(Debug, Clone)]
pub struct NewAlert {
  pub metric_id: MetricId,
  pub name:      String,
  pub threshold: f64,
  pub direction: Direction,
  pub delay:     u32,
  pub enabled:   bool,
}

pub(crate) fn check_delay(delay: u32) -> Result<(), ConfigurationError> {
  if delay == 0 { Err(ConfigurationError::ZeroDelay) } else { Ok(()) }
}

/// The cached activation of one alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertStatusCache {
  pub alert_id:     AlertId,
  pub is_activated: bool,
  pub computed_at:  DateTime<Utc>,
}

/// How close an alert is to activating.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivationProgress {
  /// `exceeding_count / total_count`, in `0.0..=1.0`.
  pub progress:        f64,
  /// Length of the run of exceeding values ending at the most recent bucket.
  pub exceeding_count: u32,
  pub total_count:     u32,
}

/// Display state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
  Disabled,
  Activated,
  Deactivated,
}

impl Alert {
  /// The trailing `delay` values, or `None` when the series is too short or
  /// any of them is absent.
  fn window(&self, series: &Series) -> Option<Vec<f64>> {
    series
      .trailing(self.delay as usize)?
      .iter()
      .map(|p| p.value)
      .collect()
  }

  /// Whether every trailing value exceeds the threshold.
  pub fn evaluate(&self, series: &Series) -> bool {
    if self.delay == 0 {
      return false;
    }
    self.window(series).is_some_and(|values| {
      values.iter().all(|&v| self.direction.exceeds(v, self.threshold))
    })
  }

  /// Count the exceeding values backward from the most recent bucket,
  /// stopping at the first one that does not exceed.
  pub fn progress(&self, series: &Series) -> ActivationProgress {
    let exceeding_count = match self.window(series) {
      Some(values) if self.delay > 0 => values
        .iter()
        .rev()
        .take_while(|&&v| self.direction.exceeds(v, self.threshold))
        .count() as u32,
      _ => 0,
    };
    let progress = if self.delay == 0 {
      0.0
    } else {
      f64::from(exceeding_count) / f64::from(self.delay)
    };
    ActivationProgress { progress, exceeding_count, total_count: self.delay }
  }
}
