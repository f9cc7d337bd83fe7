//! Materialized series and their cache records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metric::MetricId;

/// One bucket of a series. `value` is `None` when nothing landed in the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
  pub bucket_start: DateTime<Utc>,
  pub value:        Option<f64>,
}

/// An ascending, gap-free sequence of buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Series {
  points: Vec<SeriesPoint>,
}

impl Series {
  /// Wrap points that are already sorted by `bucket_start`.
  pub fn from_points(points: Vec<SeriesPoint>) -> Self {
    debug_assert!(points.windows(2).all(|w| w[0].bucket_start < w[1].bucket_start));
    Self { points }
  }

  pub fn points(&self) -> &[SeriesPoint] { &self.points }

  pub fn len(&self) -> usize { self.points.len() }

  pub fn is_empty(&self) -> bool { self.points.is_empty() }

  pub fn iter(&self) -> std::slice::Iter<'_, SeriesPoint> { self.points.iter() }

  /// The most recent `n` buckets, or `None` if the series is shorter.
  pub fn trailing(&self, n: usize) -> Option<&[SeriesPoint]> {
    let start = self.points.len().checked_sub(n)?;
    Some(&self.points[start..])
  }

  /// The value of the most recent bucket.
  pub fn latest_value(&self) -> Option<f64> {
    self.points.last().and_then(|p| p.value)
  }
}

impl<'a> IntoIterator for &'a Series {
  type Item = &'a SeriesPoint;
  type IntoIter = std::slice::Iter<'a, SeriesPoint>;

  fn into_iter(self) -> Self::IntoIter { self.points.iter() }
}

/// The cached series of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesCache {
  pub metric_id:   MetricId,
  pub series:      Series,
  pub computed_at: DateTime<Utc>,
}
