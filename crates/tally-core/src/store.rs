//! The `MetricStore` trait: everything the engine needs from a backend.
//!
//! The trait is implemented by storage backends (e.g. `tally-store-sqlite`).
//! Leaf data (questions, answers, responses) is written through the backend's
//! own API; the engine only reads it here. Metric and alert configuration and
//! the two cache tables are read and written through this trait.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  alert::{Alert, AlertId, AlertStatusCache, NewAlert},
  bucket::TimeRange,
  leaf::{AnswerPoint, QuestionId},
  metric::{Metric, MetricId, NewMetric},
  series::SeriesCache,
};

/// Abstraction over a Tally storage backend.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes.
pub trait MetricStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Leaf data ─────────────────────────────────────────────────────────

  /// Non-deleted answers of any of `question_ids` whose `occurred_at` falls
  /// in `range`, ordered by `occurred_at`.
  fn fetch_answers<'a>(
    &'a self,
    question_ids: &'a [QuestionId],
    range: TimeRange,
  ) -> impl Future<Output = Result<Vec<AnswerPoint>, Self::Error>> + Send + 'a;

  /// The latest `mutated_at` over all answers of `question_ids`, soft-deleted
  /// ones included. `None` if no answer was ever recorded.
  fn latest_answer_mutation<'a>(
    &'a self,
    question_ids: &'a [QuestionId],
  ) -> impl Future<Output = Result<Option<DateTime<Utc>>, Self::Error>> + Send + 'a;

  // ── Configuration ─────────────────────────────────────────────────────

  /// Retrieve a metric and its source edges. Returns `None` if not found.
  fn load_metric(
    &self,
    metric_id: MetricId,
  ) -> impl Future<Output = Result<Option<Metric>, Self::Error>> + Send + '_;

  /// All metrics with their source edges.
  fn list_metrics(&self) -> impl Future<Output = Result<Vec<Metric>, Self::Error>> + Send + '_;

  /// Persist a new metric with its sources. Callers validate first; see
  /// [`Engine::create_metric`](crate::engine::Engine::create_metric).
  fn create_metric(
    &self,
    input: NewMetric,
  ) -> impl Future<Output = Result<Metric, Self::Error>> + Send + '_;

  /// Replace a metric's configuration and source edges.
  fn update_metric<'a>(
    &'a self,
    metric: &'a Metric,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Retrieve an alert. Returns `None` if not found.
  fn load_alert(
    &self,
    alert_id: AlertId,
  ) -> impl Future<Output = Result<Option<Alert>, Self::Error>> + Send + '_;

  /// Alerts bound to `metric_id`, enabled or not.
  fn alerts_for_metric(
    &self,
    metric_id: MetricId,
  ) -> impl Future<Output = Result<Vec<Alert>, Self::Error>> + Send + '_;

  fn create_alert(
    &self,
    input: NewAlert,
  ) -> impl Future<Output = Result<Alert, Self::Error>> + Send + '_;

  fn update_alert<'a>(
    &'a self,
    alert: &'a Alert,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Series cache ──────────────────────────────────────────────────────

  fn load_series_cache(
    &self,
    metric_id: MetricId,
  ) -> impl Future<Output = Result<Option<SeriesCache>, Self::Error>> + Send + '_;

  /// Insert or replace the cache row for `cache.metric_id`.
  fn upsert_series_cache<'a>(
    &'a self,
    cache: &'a SeriesCache,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Delete the cache row. Returns whether a row existed; deleting an absent
  /// row is not an error.
  fn delete_series_cache(
    &self,
    metric_id: MetricId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Alert status cache ────────────────────────────────────────────────

  fn load_alert_status_cache(
    &self,
    alert_id: AlertId,
  ) -> impl Future<Output = Result<Option<AlertStatusCache>, Self::Error>> + Send + '_;

  fn upsert_alert_status_cache(
    &self,
    cache: AlertStatusCache,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn delete_alert_status_cache(
    &self,
    alert_id: AlertId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}
