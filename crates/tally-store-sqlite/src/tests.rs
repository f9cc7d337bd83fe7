//! Integration tests for `SqliteStore` and the engine running over it, against
//! an in-memory database.

use chrono::{DateTime, Duration, TimeZone, Utc};
use tally_core::{
  ConfigurationError,
  alert::{Alert, AlertId, AlertStatus, AlertStatusCache, Direction, NewAlert},
  bucket::{Resolution, TimeRange},
  engine::Engine,
  leaf::{AnswerPoint, AnswerValue, NewAnswer, QuestionId, QuestionKind},
  metric::{AggregationFunction, Metric, MetricId, NewMetric},
  series::{Series, SeriesCache},
  settings::EngineSettings,
  store::MetricStore,
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn engine<S: MetricStore>(store: S) -> Engine<S> {
  Engine::new(store, EngineSettings::default()).expect("engine")
}

fn at(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
}

fn value_at(series: &Series, bucket: DateTime<Utc>) -> Option<f64> {
  series
    .iter()
    .find(|p| p.bucket_start == bucket)
    .and_then(|p| p.value)
}

async fn number_question(s: &SqliteStore, name: &str) -> QuestionId {
  s.add_question(name, QuestionKind::Number)
    .await
    .unwrap()
    .question_id
}

async fn answer(s: &SqliteStore, q: QuestionId, value: f64, occurred_at: DateTime<Utc>) {
  s.record_answer(NewAnswer::new(q, AnswerValue::Number(value), occurred_at), occurred_at)
    .await
    .unwrap();
}

fn daily(name: &str, function: AggregationFunction, width: &str) -> NewMetric {
  NewMetric::new(name, function, Resolution::Day, width.parse().unwrap())
}

fn weekly_sum(name: &str) -> NewMetric {
  NewMetric::new(
    name,
    AggregationFunction::Sum,
    Resolution::Week,
    "90_days".parse().unwrap(),
  )
}

// ─── Leaf data ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_and_get_question() {
  let s = store().await;
  let q = s.add_question("sleep hours", QuestionKind::Number).await.unwrap();

  let fetched = s.get_question(q.question_id).await.unwrap().unwrap();
  assert_eq!(fetched.name, "sleep hours");
  assert_eq!(fetched.kind, QuestionKind::Number);

  assert!(s.get_question(QuestionId(999)).await.unwrap().is_none());
  assert_eq!(s.list_questions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn answer_must_match_question_kind() {
  let s = store().await;
  let q = number_question(&s, "weight").await;

  let err = s
    .record_answer(NewAnswer::new(q, AnswerValue::Bool(true), at(2025, 7, 1, 8)), at(2025, 7, 1, 8))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::KindMismatch { expected: QuestionKind::Number, actual: QuestionKind::Bool, .. }
  ));

  let err = s
    .record_answer(
      NewAnswer::new(QuestionId(42), AnswerValue::Number(1.0), at(2025, 7, 1, 8)),
      at(2025, 7, 1, 8),
    )
    .await
    .unwrap_err();
  assert!(matches!(err, Error::QuestionNotFound(QuestionId(42))));
}

#[tokio::test]
async fn fetch_answers_respects_range_and_deletion() {
  let s = store().await;
  let q = number_question(&s, "steps").await;
  answer(&s, q, 1.0, at(2025, 7, 1, 8)).await;
  answer(&s, q, 2.0, at(2025, 7, 2, 8)).await;
  answer(&s, q, 3.0, at(2025, 7, 3, 8)).await;

  let range = TimeRange { start: at(2025, 7, 2, 0), end: at(2025, 7, 3, 8) };
  let points: Vec<AnswerPoint> = s.fetch_answers(&[q], range).await.unwrap();
  assert_eq!(points.len(), 1, "end of range is exclusive");
  assert_eq!(points[0].value, AnswerValue::Number(2.0));

  let doomed = s.list_answers(q, false).await.unwrap()[1].answer_id;
  s.soft_delete_answer(doomed, at(2025, 7, 4, 0)).await.unwrap();

  let all = TimeRange { start: at(2025, 1, 1, 0), end: at(2026, 1, 1, 0) };
  assert_eq!(s.fetch_answers(&[q], all).await.unwrap().len(), 2);
  assert_eq!(s.list_answers(q, true).await.unwrap().len(), 3);

  // Deletion is a mutation.
  assert_eq!(
    s.latest_answer_mutation(&[q]).await.unwrap(),
    Some(at(2025, 7, 4, 0))
  );
  assert!(matches!(
    s.soft_delete_answer(doomed, at(2025, 7, 5, 0)).await,
    Err(Error::AnswerNotFound(_))
  ));
}

#[tokio::test]
async fn non_finite_numbers_are_rejected() {
  let s = store().await;
  let e = engine(s.clone());
  let q = number_question(&s, "weight").await;
  let scale = s.add_question("energy", QuestionKind::Range).await.unwrap().question_id;
  answer(&s, q, 72.0, at(2025, 7, 26, 8)).await;

  let when = at(2025, 7, 26, 9);
  for bad in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
    let err = s
      .record_answer(NewAnswer::new(q, AnswerValue::Number(bad), when), when)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::NonFiniteValue(id) if id == q));
    let err = s
      .record_answer(NewAnswer::new(scale, AnswerValue::Range(bad), when), when)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::NonFiniteValue(id) if id == scale));
  }

  let only = s.list_answers(q, false).await.unwrap()[0].answer_id;
  assert!(matches!(
    s.update_answer_value(only, AnswerValue::Number(f64::INFINITY), when).await,
    Err(Error::NonFiniteValue(_))
  ));
  assert_eq!(s.list_answers(q, true).await.unwrap().len(), 1);

  // The question stays readable.
  let m = e
    .create_metric(daily("weight", AggregationFunction::Answer, "7_days").with_question(q))
    .await
    .unwrap();
  let series = e.series_of(m.metric_id, at(2025, 7, 27, 14)).await.unwrap();
  assert_eq!(value_at(&series, at(2025, 7, 26, 0)), Some(72.0));
}

#[tokio::test]
async fn metric_round_trips_with_sources() {
  let s = store().await;
  let q1 = number_question(&s, "a").await;
  let q2 = number_question(&s, "b").await;
  let child = s
    .create_metric(daily("child", AggregationFunction::Answer, "30_days").with_question(q1))
    .await
    .unwrap();
  let parent = s
    .create_metric(
      weekly_sum("parent")
        .with_question(q2)
        .with_child(child.metric_id),
    )
    .await
    .unwrap();

  let loaded = s.load_metric(parent.metric_id).await.unwrap().unwrap();
  assert_eq!(loaded, parent);
  assert_eq!(s.list_metrics().await.unwrap().len(), 2);
  assert!(s.load_metric(MetricId(999)).await.unwrap().is_none());
}

#[tokio::test]
async fn cache_rows_upsert_and_delete() {
  let s = store().await;
  let m = s
    .create_metric(daily("m", AggregationFunction::Sum, "7_days"))
    .await
    .unwrap();

  let cache = SeriesCache {
    metric_id:   m.metric_id,
    series:      Series::default(),
    computed_at: at(2025, 7, 1, 0),
  };
  s.upsert_series_cache(&cache).await.unwrap();
  let later = SeriesCache { computed_at: at(2025, 7, 2, 0), ..cache };
  s.upsert_series_cache(&later).await.unwrap();
  assert_eq!(s.load_series_cache(m.metric_id).await.unwrap(), Some(later));

  assert!(s.delete_series_cache(m.metric_id).await.unwrap());
  assert!(!s.delete_series_cache(m.metric_id).await.unwrap());
  assert!(s.load_series_cache(m.metric_id).await.unwrap().is_none());
}

// ─── Series reads ────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_read_is_served_from_cache() {
  let s = store().await;
  let e = engine(s.clone());
  let q = number_question(&s, "mood").await;
  answer(&s, q, 3.0, at(2025, 7, 26, 8)).await;
  let m = e
    .create_metric(daily("mood", AggregationFunction::Answer, "7_days").with_question(q))
    .await
    .unwrap();

  let now = at(2025, 7, 27, 14);
  let first = e.read(m.metric_id, now).await.unwrap();
  assert!(!first.from_cache);
  assert_eq!(first.computed_at, now);

  let second = e.read(m.metric_id, now + Duration::minutes(5)).await.unwrap();
  assert!(second.from_cache);
  assert_eq!(second.computed_at, now);
  assert_eq!(second.series, first.series);
  assert_eq!(value_at(&second.series, at(2025, 7, 26, 0)), Some(3.0));
}

#[tokio::test]
async fn answers_recorded_before_the_metric_are_included() {
  let s = store().await;
  let e = engine(s.clone());
  let q = number_question(&s, "weight").await;
  answer(&s, q, 2.53, at(2025, 7, 18, 9)).await;
  answer(&s, q, 3.38, at(2025, 7, 27, 9)).await;

  let m = e
    .create_metric(daily("weight", AggregationFunction::Answer, "90_days").with_question(q))
    .await
    .unwrap();

  let series = e.series_of(m.metric_id, at(2025, 7, 28, 12)).await.unwrap();
  assert_eq!(value_at(&series, at(2025, 7, 18, 0)), Some(2.53));
  assert_eq!(value_at(&series, at(2025, 7, 27, 0)), Some(3.38));
  assert_eq!(series.iter().filter(|p| p.value.is_some()).count(), 2);
}

#[tokio::test]
async fn daily_answers_sum_into_weeks() {
  let s = store().await;
  let e = engine(s.clone());
  let q = number_question(&s, "km").await;
  answer(&s, q, 2.5, at(2025, 7, 18, 23)).await;
  answer(&s, q, 3.0, at(2025, 7, 21, 23)).await;
  answer(&s, q, 4.5, at(2025, 7, 25, 23)).await;

  let m1 = e
    .create_metric(daily("km daily", AggregationFunction::Answer, "90_days").with_question(q))
    .await
    .unwrap();
  let m2 = e
    .create_metric(weekly_sum("km weekly").with_child(m1.metric_id))
    .await
    .unwrap();

  let weekly = e.series_of(m2.metric_id, at(2025, 7, 27, 14)).await.unwrap();
  assert_eq!(value_at(&weekly, at(2025, 7, 14, 0)), Some(2.5));
  assert_eq!(value_at(&weekly, at(2025, 7, 21, 0)), Some(7.5));
  assert_eq!(weekly.points().last().unwrap().bucket_start, at(2025, 7, 21, 0));
}

#[tokio::test]
async fn new_answer_invalidates_the_whole_chain() {
  let s = store().await;
  let e = engine(s.clone());
  let q = number_question(&s, "km").await;
  answer(&s, q, 2.0, at(2025, 7, 21, 8)).await;
  let m1 = e
    .create_metric(daily("daily", AggregationFunction::Answer, "90_days").with_question(q))
    .await
    .unwrap();
  let m2 = e
    .create_metric(weekly_sum("weekly").with_child(m1.metric_id))
    .await
    .unwrap();

  let now = at(2025, 7, 27, 14);
  e.series_of(m2.metric_id, now).await.unwrap();
  assert!(s.load_series_cache(m1.metric_id).await.unwrap().is_some());
  assert!(s.load_series_cache(m2.metric_id).await.unwrap().is_some());

  let mutation = now + Duration::hours(1);
  s.record_answer(NewAnswer::new(q, AnswerValue::Number(5.0), at(2025, 7, 27, 8)), mutation)
    .await
    .unwrap();
  let invalidation = e.on_answer_changed(q, mutation).await.unwrap();
  assert_eq!(invalidation.metrics, vec![m1.metric_id, m2.metric_id]);
  assert!(s.load_series_cache(m1.metric_id).await.unwrap().is_none());
  assert!(s.load_series_cache(m2.metric_id).await.unwrap().is_none());

  // Idempotent.
  e.on_answer_changed(q, mutation).await.unwrap();

  let read = e.read(m2.metric_id, mutation).await.unwrap();
  assert!(!read.from_cache);
  assert_eq!(value_at(&read.series, at(2025, 7, 21, 0)), Some(7.0));
  assert!(s.load_series_cache(m1.metric_id).await.unwrap().is_some());
}

#[tokio::test]
async fn mutation_after_compute_is_detected_without_notification() {
  let s = store().await;
  let e = engine(s.clone());
  let q = number_question(&s, "steps").await;
  answer(&s, q, 4.0, at(2025, 7, 26, 8)).await;
  let m = e
    .create_metric(daily("steps", AggregationFunction::Sum, "7_days").with_question(q))
    .await
    .unwrap();

  let now = at(2025, 7, 27, 14);
  e.series_of(m.metric_id, now).await.unwrap();

  let only = s.list_answers(q, false).await.unwrap()[0].answer_id;
  s.soft_delete_answer(only, now + Duration::minutes(1))
    .await
    .unwrap();

  let read = e.read(m.metric_id, now + Duration::minutes(2)).await.unwrap();
  assert!(!read.from_cache);
  assert!(read.series.iter().all(|p| p.value.is_none()));
}

#[tokio::test]
async fn mutation_within_a_microsecond_is_detected() {
  let s = store().await;
  let e = engine(s.clone());
  let q = number_question(&s, "steps").await;
  let m = e
    .create_metric(daily("steps", AggregationFunction::Sum, "7_days").with_question(q))
    .await
    .unwrap();

  let now = at(2025, 7, 27, 14);
  e.series_of(m.metric_id, now).await.unwrap();

  s.record_answer(
    NewAnswer::new(q, AnswerValue::Number(4.0), at(2025, 7, 27, 8)),
    now + Duration::nanoseconds(1),
  )
  .await
  .unwrap();

  let read = e.read(m.metric_id, now + Duration::minutes(1)).await.unwrap();
  assert!(!read.from_cache);
  assert_eq!(value_at(&read.series, at(2025, 7, 27, 0)), Some(4.0));
}

#[tokio::test]
async fn overflowed_sums_are_served_but_not_cached() {
  let s = store().await;
  let e = engine(s.clone());
  let q = number_question(&s, "distance").await;
  answer(&s, q, f64::MAX, at(2025, 7, 26, 8)).await;
  answer(&s, q, f64::MAX, at(2025, 7, 26, 9)).await;
  let m = e
    .create_metric(daily("distance", AggregationFunction::Sum, "7_days").with_question(q))
    .await
    .unwrap();

  let now = at(2025, 7, 27, 14);
  for minutes in [0, 5] {
    let read = e.read(m.metric_id, now + Duration::minutes(minutes)).await.unwrap();
    assert!(!read.from_cache);
    assert_eq!(value_at(&read.series, at(2025, 7, 26, 0)), Some(f64::INFINITY));
  }
  assert!(s.load_series_cache(m.metric_id).await.unwrap().is_none());
  assert!(matches!(
    s.upsert_series_cache(&SeriesCache {
      metric_id:   m.metric_id,
      series:      e.series_of(m.metric_id, now).await.unwrap(),
      computed_at: now,
    })
    .await,
    Err(Error::NonFiniteSeries(_))
  ));
}

#[tokio::test]
async fn stale_child_forces_parent_recompute() {
  let s = store().await;
  let e = engine(s.clone());
  let q = number_question(&s, "km").await;
  let m1 = e
    .create_metric(daily("daily", AggregationFunction::Sum, "30_days").with_question(q))
    .await
    .unwrap();
  let m2 = e
    .create_metric(weekly_sum("weekly").with_child(m1.metric_id))
    .await
    .unwrap();

  let now = at(2025, 7, 27, 14);
  e.series_of(m2.metric_id, now).await.unwrap();

  // Only the child's cache is dropped; the parent must notice.
  s.delete_series_cache(m1.metric_id).await.unwrap();
  answer(&s, q, 6.0, at(2025, 7, 24, 8)).await;

  let read = e.read(m2.metric_id, now + Duration::minutes(1)).await.unwrap();
  assert!(!read.from_cache);
  assert_eq!(value_at(&read.series, at(2025, 7, 21, 0)), Some(6.0));
}

#[tokio::test]
async fn horizon_rolls_forward_into_a_new_bucket() {
  let s = store().await;
  let e = engine(s.clone());
  let m = e
    .create_metric(daily("empty", AggregationFunction::Sum, "7_days"))
    .await
    .unwrap();

  let now = at(2025, 7, 27, 14);
  let first = e.series_of(m.metric_id, now).await.unwrap();
  let next = e.read(m.metric_id, now + Duration::days(1)).await.unwrap();
  assert!(!next.from_cache);
  assert_eq!(next.series.len(), first.len());
  assert_eq!(next.series.points().last().unwrap().bucket_start, at(2025, 7, 28, 0));
}

#[tokio::test]
async fn unknown_metric_is_not_found() {
  let e = engine(store().await);
  assert!(matches!(
    e.series_of(MetricId(7), at(2025, 7, 1, 0)).await,
    Err(tally_core::Error::MetricNotFound(MetricId(7)))
  ));
}

// ─── Responses ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn moving_a_response_moves_its_answers() {
  let s = store().await;
  let e = engine(s.clone());
  let q1 = number_question(&s, "coffee").await;
  let q2 = number_question(&s, "tea").await;
  let m = e
    .create_metric(daily("coffee", AggregationFunction::Sum, "14_days").with_question(q1))
    .await
    .unwrap();

  let recorded = at(2025, 7, 20, 10);
  let response = s.add_response(recorded, recorded).await.unwrap();
  for (q, v) in [(q1, 2.0), (q2, 1.0)] {
    let mut input = NewAnswer::new(q, AnswerValue::Number(v), recorded);
    input.response_id = Some(response.response_id);
    s.record_answer(input, recorded).await.unwrap();
  }

  let now = at(2025, 7, 27, 14);
  let before = e.series_of(m.metric_id, now).await.unwrap();
  assert_eq!(value_at(&before, at(2025, 7, 20, 0)), Some(2.0));

  let moved_at = now + Duration::minutes(1);
  let touched = s
    .shift_response(response.response_id, at(2025, 7, 22, 10), moved_at)
    .await
    .unwrap();
  assert_eq!(touched, vec![q1, q2]);
  let invalidation = e.on_response_changed(&touched, moved_at).await.unwrap();
  assert_eq!(invalidation.metrics, vec![m.metric_id]);

  let after = e.series_of(m.metric_id, moved_at).await.unwrap();
  assert_eq!(value_at(&after, at(2025, 7, 20, 0)), None);
  assert_eq!(value_at(&after, at(2025, 7, 22, 0)), Some(2.0));

  let deleted_at = moved_at + Duration::minutes(1);
  let touched = s
    .soft_delete_response(response.response_id, deleted_at)
    .await
    .unwrap();
  assert_eq!(touched, vec![q1, q2]);
  e.on_response_changed(&touched, deleted_at).await.unwrap();

  let gone = e.series_of(m.metric_id, deleted_at).await.unwrap();
  assert!(gone.iter().all(|p| p.value.is_none()));
  assert!(matches!(
    s.shift_response(response.response_id, at(2025, 7, 23, 0), deleted_at).await,
    Err(Error::ResponseNotFound(_))
  ));
}

// ─── Configuration ───────────────────────────────────────────────────────────

#[tokio::test]
async fn metric_edits_that_close_a_cycle_are_rejected() {
  let s = store().await;
  let e = engine(s.clone());
  let m1 = e
    .create_metric(daily("m1", AggregationFunction::Sum, "7_days"))
    .await
    .unwrap();
  let m2 = e
    .create_metric(daily("m2", AggregationFunction::Sum, "7_days").with_child(m1.metric_id))
    .await
    .unwrap();

  let mut edited = m1.clone();
  edited.sources.child_metrics.insert(m2.metric_id);
  assert!(matches!(
    e.update_metric(&edited).await,
    Err(tally_core::Error::Configuration(ConfigurationError::Cycle(_)))
  ));

  let mut selfish = m1.clone();
  selfish.sources.child_metrics.insert(m1.metric_id);
  assert!(matches!(
    e.update_metric(&selfish).await,
    Err(tally_core::Error::Configuration(ConfigurationError::SelfReference(_)))
  ));

  assert!(matches!(
    e.create_metric(daily("m3", AggregationFunction::Sum, "7_days").with_child(MetricId(99)))
      .await,
    Err(tally_core::Error::Configuration(ConfigurationError::UnknownChild(MetricId(99))))
  ));

  // Nothing was persisted.
  assert_eq!(s.load_metric(m1.metric_id).await.unwrap(), Some(m1));
}

#[tokio::test]
async fn cycles_written_behind_the_engine_are_reported() {
  let s = store().await;
  let e = engine(s.clone());
  let m1 = e
    .create_metric(daily("m1", AggregationFunction::Sum, "7_days"))
    .await
    .unwrap();
  let m2 = e
    .create_metric(daily("m2", AggregationFunction::Sum, "7_days").with_child(m1.metric_id))
    .await
    .unwrap();

  // The store writes edge rows as given; only the engine validates them.
  let mut looped = m1.clone();
  looped.sources.child_metrics.insert(m2.metric_id);
  MetricStore::update_metric(&s, &looped).await.unwrap();

  let now = at(2025, 7, 27, 14);
  for metric_id in [m1.metric_id, m2.metric_id] {
    assert!(matches!(
      e.series_of(metric_id, now).await,
      Err(tally_core::Error::Configuration(ConfigurationError::Cycle(_)))
    ));
  }
  assert!(s.load_series_cache(m1.metric_id).await.unwrap().is_none());
}

#[tokio::test]
async fn horizons_beyond_the_bucket_cap_are_rejected() {
  let s = store().await;
  let e = engine(s.clone());
  let century = NewMetric::new(
    "century",
    AggregationFunction::Sum,
    Resolution::FiveMinute,
    "100_years".parse().unwrap(),
  );
  assert!(matches!(
    e.create_metric(century).await,
    Err(tally_core::Error::Configuration(ConfigurationError::WidthOutOfRange(_)))
  ));

  let m = e
    .create_metric(daily("m", AggregationFunction::Sum, "100_years"))
    .await
    .unwrap();
  let finer = Metric { resolution: Resolution::FiveMinute, ..m.clone() };
  assert!(matches!(
    e.update_metric(&finer).await,
    Err(tally_core::Error::Configuration(ConfigurationError::WidthOutOfRange(_)))
  ));
  assert_eq!(s.load_metric(m.metric_id).await.unwrap(), Some(m));
  assert_eq!(s.list_metrics().await.unwrap().len(), 1);
}

#[tokio::test]
async fn metric_edit_discards_itself_and_dependents() {
  let s = store().await;
  let e = engine(s.clone());
  let m1 = e
    .create_metric(daily("m1", AggregationFunction::Sum, "7_days"))
    .await
    .unwrap();
  let m2 = e
    .create_metric(weekly_sum("m2").with_child(m1.metric_id))
    .await
    .unwrap();
  e.series_of(m2.metric_id, at(2025, 7, 27, 14)).await.unwrap();

  let edited = Metric { width: "14_days".parse().unwrap(), ..m1.clone() };
  let invalidation = e.update_metric(&edited).await.unwrap();
  assert_eq!(invalidation.metrics, vec![m1.metric_id, m2.metric_id]);
  assert!(s.load_series_cache(m1.metric_id).await.unwrap().is_none());
  assert!(s.load_series_cache(m2.metric_id).await.unwrap().is_none());

  let reread = e.read(m1.metric_id, at(2025, 7, 27, 15)).await.unwrap();
  assert_eq!(reread.series.len(), 15);
}

// ─── Alerts ──────────────────────────────────────────────────────────────────

async fn alert_on_daily_sum(
  e: &Engine<SqliteStore>,
  s: &SqliteStore,
  values: [f64; 3],
  direction: Direction,
) -> (QuestionId, MetricId, Alert) {
  let q = number_question(s, "load").await;
  for (day, v) in (25..=27).zip(values) {
    answer(s, q, v, at(2025, 7, day, 8)).await;
  }
  let m = e
    .create_metric(daily("load", AggregationFunction::Sum, "7_days").with_question(q))
    .await
    .unwrap();
  let alert = e
    .create_alert(NewAlert {
      metric_id: m.metric_id,
      name: "too much".into(),
      threshold: 100.0,
      direction,
      delay: 3,
      enabled: true,
    })
    .await
    .unwrap();
  (q, m.metric_id, alert)
}

#[tokio::test]
async fn alert_needs_every_trailing_bucket() {
  let s = store().await;
  let e = engine(s.clone());
  let now = at(2025, 7, 27, 14);

  let (_, _, dip) = alert_on_daily_sum(&e, &s, [150.0, 90.0, 200.0], Direction::Above).await;
  assert!(!e.is_activated(dip.alert_id, now).await.unwrap());

  let (_, _, high) = alert_on_daily_sum(&e, &s, [101.0, 150.0, 200.0], Direction::Above).await;
  assert!(e.is_activated(high.alert_id, now).await.unwrap());
  assert_eq!(e.alert_status(high.alert_id, now).await.unwrap(), AlertStatus::Activated);
}

#[tokio::test]
async fn progress_counts_back_from_latest_bucket() {
  let s = store().await;
  let e = engine(s.clone());
  let (_, _, alert) = alert_on_daily_sum(&e, &s, [150.0, 50.0, 200.0], Direction::Above).await;

  let progress = e
    .activation_progress(alert.alert_id, at(2025, 7, 27, 14))
    .await
    .unwrap();
  assert_eq!(progress.exceeding_count, 1);
  assert_eq!(progress.total_count, 3);
  assert!((progress.progress - 1.0 / 3.0).abs() < 1e-12);
}

#[tokio::test]
async fn alert_status_cache_follows_its_metric() {
  let s = store().await;
  let e = engine(s.clone());
  let now = at(2025, 7, 27, 14);
  let (q, _, alert) = alert_on_daily_sum(&e, &s, [101.0, 150.0, 200.0], Direction::Above).await;

  assert!(e.is_activated(alert.alert_id, now).await.unwrap());
  let cached = s.load_alert_status_cache(alert.alert_id).await.unwrap().unwrap();
  assert!(cached.is_activated);

  let mutation = now + Duration::minutes(1);
  s.record_answer(NewAnswer::new(q, AnswerValue::Number(-150.0), at(2025, 7, 26, 9)), mutation)
    .await
    .unwrap();
  let invalidation = e.on_answer_changed(q, mutation).await.unwrap();
  assert_eq!(invalidation.alerts, vec![alert.alert_id]);
  assert!(s.load_alert_status_cache(alert.alert_id).await.unwrap().is_none());

  assert!(!e.is_activated(alert.alert_id, mutation).await.unwrap());
  assert_eq!(
    e.alert_status(alert.alert_id, mutation).await.unwrap(),
    AlertStatus::Deactivated
  );
}

#[tokio::test]
async fn alert_status_is_served_from_its_cache() {
  let s = store().await;
  let e = engine(s.clone());
  let now = at(2025, 7, 27, 14);
  let (_, _, alert) = alert_on_daily_sum(&e, &s, [101.0, 150.0, 200.0], Direction::Above).await;
  assert!(e.is_activated(alert.alert_id, now).await.unwrap());

  // Flip the stored status; a fresh row is returned as is.
  let cached = s.load_alert_status_cache(alert.alert_id).await.unwrap().unwrap();
  assert_eq!(cached.computed_at, now);
  s.upsert_alert_status_cache(AlertStatusCache { is_activated: false, ..cached })
    .await
    .unwrap();

  let later = now + Duration::minutes(5);
  assert!(!e.is_activated(alert.alert_id, later).await.unwrap());
  assert_eq!(e.alert_status(alert.alert_id, later).await.unwrap(), AlertStatus::Deactivated);
  let row = s.load_alert_status_cache(alert.alert_id).await.unwrap().unwrap();
  assert_eq!(row.computed_at, now, "a cache hit does not rewrite the row");
}

#[tokio::test]
async fn alert_recomputes_when_its_metric_goes_stale() {
  let s = store().await;
  let e = engine(s.clone());
  let now = at(2025, 7, 27, 14);
  let (q, _, alert) = alert_on_daily_sum(&e, &s, [101.0, 150.0, 200.0], Direction::Above).await;
  assert!(e.is_activated(alert.alert_id, now).await.unwrap());

  // No notification: the status row survives but is out of date.
  s.record_answer(
    NewAnswer::new(q, AnswerValue::Number(-150.0), at(2025, 7, 26, 9)),
    now + Duration::minutes(1),
  )
  .await
  .unwrap();
  assert!(s.load_alert_status_cache(alert.alert_id).await.unwrap().unwrap().is_activated);

  let later = now + Duration::minutes(2);
  assert!(!e.is_activated(alert.alert_id, later).await.unwrap());
  let row = s.load_alert_status_cache(alert.alert_id).await.unwrap().unwrap();
  assert!(!row.is_activated);
  assert_eq!(row.computed_at, later);
}

#[tokio::test]
async fn disabled_alert_is_never_activated() {
  let s = store().await;
  let e = engine(s.clone());
  let now = at(2025, 7, 27, 14);
  let (_, _, alert) = alert_on_daily_sum(&e, &s, [101.0, 150.0, 200.0], Direction::Above).await;
  assert!(e.is_activated(alert.alert_id, now).await.unwrap());

  let disabled = Alert { enabled: false, ..alert.clone() };
  let invalidation = e.update_alert(&disabled).await.unwrap();
  assert_eq!(invalidation.alerts, vec![alert.alert_id]);

  assert!(!e.is_activated(alert.alert_id, now).await.unwrap());
  assert_eq!(e.alert_status(alert.alert_id, now).await.unwrap(), AlertStatus::Disabled);
  assert!(s.load_alert_status_cache(alert.alert_id).await.unwrap().is_none());
}

#[tokio::test]
async fn alert_configuration_is_validated() {
  let s = store().await;
  let e = engine(s.clone());
  let (_, m, alert) = alert_on_daily_sum(&e, &s, [1.0, 1.0, 1.0], Direction::Below).await;

  let zero = NewAlert {
    metric_id: m,
    name: "never".into(),
    threshold: 0.0,
    direction: Direction::Below,
    delay: 0,
    enabled: true,
  };
  assert!(matches!(
    e.create_alert(zero).await,
    Err(tally_core::Error::Configuration(ConfigurationError::ZeroDelay))
  ));

  let orphan = Alert { metric_id: MetricId(404), ..alert };
  assert!(matches!(
    e.update_alert(&orphan).await,
    Err(tally_core::Error::MetricNotFound(MetricId(404)))
  ));
  assert!(matches!(
    e.is_activated(AlertId(404), at(2025, 7, 27, 0)).await,
    Err(tally_core::Error::AlertNotFound(AlertId(404)))
  ));
}

// ─── Degraded caches ─────────────────────────────────────────────────────────

/// Delegates to a real store but refuses every cache write.
struct ReadOnlyCaches(SqliteStore);

fn refused() -> Error { Error::Database(tokio_rusqlite::Error::ConnectionClosed) }

impl MetricStore for ReadOnlyCaches {
  type Error = Error;

  async fn fetch_answers<'a>(
    &'a self,
    question_ids: &'a [QuestionId],
    range: TimeRange,
  ) -> Result<Vec<AnswerPoint>, Error> {
    self.0.fetch_answers(question_ids, range).await
  }

  async fn latest_answer_mutation<'a>(
    &'a self,
    question_ids: &'a [QuestionId],
  ) -> Result<Option<DateTime<Utc>>, Error> {
    self.0.latest_answer_mutation(question_ids).await
  }

  async fn load_metric(&self, metric_id: MetricId) -> Result<Option<Metric>, Error> {
    self.0.load_metric(metric_id).await
  }

  async fn list_metrics(&self) -> Result<Vec<Metric>, Error> { self.0.list_metrics().await }

  async fn create_metric(&self, input: NewMetric) -> Result<Metric, Error> {
    self.0.create_metric(input).await
  }

  async fn update_metric<'a>(&'a self, metric: &'a Metric) -> Result<(), Error> {
    self.0.update_metric(metric).await
  }

  async fn load_alert(&self, alert_id: AlertId) -> Result<Option<Alert>, Error> {
    self.0.load_alert(alert_id).await
  }

  async fn alerts_for_metric(&self, metric_id: MetricId) -> Result<Vec<Alert>, Error> {
    self.0.alerts_for_metric(metric_id).await
  }

  async fn create_alert(&self, input: NewAlert) -> Result<Alert, Error> {
    self.0.create_alert(input).await
  }

  async fn update_alert<'a>(&'a self, alert: &'a Alert) -> Result<(), Error> {
    self.0.update_alert(alert).await
  }

  async fn load_series_cache(&self, metric_id: MetricId) -> Result<Option<SeriesCache>, Error> {
    self.0.load_series_cache(metric_id).await
  }

  async fn upsert_series_cache<'a>(&'a self, _cache: &'a SeriesCache) -> Result<(), Error> {
    Err(refused())
  }

  async fn delete_series_cache(&self, metric_id: MetricId) -> Result<bool, Error> {
    self.0.delete_series_cache(metric_id).await
  }

  async fn load_alert_status_cache(
    &self,
    alert_id: AlertId,
  ) -> Result<Option<AlertStatusCache>, Error> {
    self.0.load_alert_status_cache(alert_id).await
  }

  async fn upsert_alert_status_cache(&self, _cache: AlertStatusCache) -> Result<(), Error> {
    Err(refused())
  }

  async fn delete_alert_status_cache(&self, alert_id: AlertId) -> Result<bool, Error> {
    self.0.delete_alert_status_cache(alert_id).await
  }
}

#[tokio::test]
async fn failed_cache_writes_still_serve_correct_values() {
  let s = store().await;
  let e = engine(ReadOnlyCaches(s.clone()));
  let now = at(2025, 7, 27, 14);

  let q = number_question(&s, "load").await;
  for (day, v) in (25..=27).zip([101.0, 150.0, 200.0]) {
    answer(&s, q, v, at(2025, 7, day, 8)).await;
  }
  let m = e
    .create_metric(daily("load", AggregationFunction::Sum, "7_days").with_question(q))
    .await
    .unwrap();
  let alert = e
    .create_alert(NewAlert {
      metric_id: m.metric_id,
      name: "too much".into(),
      threshold: 100.0,
      direction: Direction::Above,
      delay: 3,
      enabled: true,
    })
    .await
    .unwrap();

  for _ in 0..2 {
    let read = e.read(m.metric_id, now).await.unwrap();
    assert!(!read.from_cache);
    assert_eq!(read.series.latest_value(), Some(200.0));
    assert!(e.is_activated(alert.alert_id, now).await.unwrap());
  }
  assert!(s.load_series_cache(m.metric_id).await.unwrap().is_none());
  assert!(s.load_alert_status_cache(alert.alert_id).await.unwrap().is_none());
}
