//! The series materializer.
//!
//! A pure function of a metric's configuration, its horizon, the answers of
//! its linked questions and the already-read series of its child metrics. It
//! never touches storage; the [`Engine`](crate::engine::Engine) gathers the
//! inputs and makes sure child series are fresh first.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Utc};

use crate::{
  bucket::Horizon,
  leaf::AnswerPoint,
  metric::{AggregationFunction, Metric},
  series::{Series, SeriesPoint},
};

/// Everything a metric's series is computed from.
#[derive(Debug, Clone, Copy)]
pub struct Inputs<'a> {
  /// Non-deleted answers of the metric's linked questions.
  pub answers:  &'a [AnswerPoint],
  /// The series of each child metric, at the child's own resolution.
  pub children: &'a [&'a Series],
}

/// A single value landing in the parent's bucket.
struct Contribution {
  bucket: usize,
  /// Recency key for [`AggregationFunction::Answer`]: occurrence, then
  /// mutation instant.
  order:  (DateTime<Utc>, DateTime<Utc>),
  value:  f64,
}

/// Compute `metric`'s series over `horizon`.
///
/// Contributions are floored to the metric's resolution; those falling
/// outside the horizon are dropped. Child buckets are re-floored the same way,
/// so a finer child is summed into the coarser parent bucket that contains it.
/// Buckets nothing lands in stay absent.
pub fn materialize(
  metric: &Metric,
  horizon: &Horizon,
  inputs: Inputs<'_>,
  offset: FixedOffset,
) -> Series {
  let resolution = horizon.resolution;
  let index: HashMap<DateTime<Utc>, usize> = horizon
    .buckets
    .iter()
    .enumerate()
    .map(|(i, start)| (*start, i))
    .collect();

  let answers = inputs.answers.iter().filter_map(|answer| {
    let value = answer.value.as_number()?;
    Some((answer.occurred_at, answer.mutated_at, value))
  });
  let children = inputs
    .children
    .iter()
    .flat_map(|series| series.iter())
    .filter_map(|point| Some((point.bucket_start, DateTime::<Utc>::MIN_UTC, point.value?)));

  let contributions = answers.chain(children).filter_map(|(at, mutated, value)| {
    let bucket = *index.get(&resolution.floor(at, offset))?;
    Some(Contribution { bucket, order: (at, mutated), value })
  });

  let mut values: Vec<Option<f64>> = vec![None; horizon.buckets.len()];
  match metric.function {
    AggregationFunction::Sum => {
      for c in contributions {
        let slot = &mut values[c.bucket];
        *slot = Some(slot.unwrap_or(0.0) + c.value);
      }
    }
    AggregationFunction::Answer => {
      let mut latest: Vec<Option<(DateTime<Utc>, DateTime<Utc>)>> =
        vec![None; horizon.buckets.len()];
      for c in contributions {
        if latest[c.bucket].is_none_or(|seen| c.order >= seen) {
          latest[c.bucket] = Some(c.order);
          values[c.bucket] = Some(c.value);
        }
      }
    }
  }

  Series::from_points(
    horizon
      .buckets
      .iter()
      .zip(values)
      .map(|(&bucket_start, value)| SeriesPoint { bucket_start, value })
      .collect(),
  )
}
