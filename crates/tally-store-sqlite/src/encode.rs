//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings. Answer values and
//! cached series are stored as compact JSON. Enum tokens reuse the core
//! crate's `as_str`/`FromStr` pairs.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use tally_core::{
  alert::{Alert, AlertId, AlertStatusCache},
  leaf::{Answer, AnswerId, AnswerPoint, AnswerValue, Question, QuestionId, Response, ResponseId},
  metric::{Metric, MetricId, MetricSources},
  series::SeriesCache,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

/// Nanosecond precision with a `Z` suffix. Every string has the same width,
/// so string comparison in SQL matches chronological order, and decoding
/// gives back the exact instant.
pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Tokens ──────────────────────────────────────────────────────────────────

pub fn decode_token<T>(s: &str) -> Result<T>
where
  T: std::str::FromStr<Err = tally_core::ConfigurationError>,
{
  Ok(s.parse()?)
}

// ─── AnswerValue ─────────────────────────────────────────────────────────────

pub fn encode_answer_value(value: &AnswerValue) -> Result<String> {
  Ok(serde_json::to_string(value)?)
}

pub fn decode_answer_value(s: &str) -> Result<AnswerValue> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `questions` row.
pub struct RawQuestion {
  pub question_id: i64,
  pub name:        String,
  pub kind:        String,
}

impl RawQuestion {
  pub fn into_question(self) -> Result<Question> {
    Ok(Question {
      question_id: QuestionId(self.question_id),
      name:        self.name,
      kind:        decode_token(&self.kind)?,
    })
  }
}

/// Raw values read directly from a `responses` row.
pub struct RawResponse {
  pub response_id: i64,
  pub occurred_at: String,
  pub recorded_at: String,
  pub mutated_at:  String,
  pub deleted:     bool,
}

impl RawResponse {
  pub fn into_response(self) -> Result<Response> {
    Ok(Response {
      response_id: ResponseId(self.response_id),
      occurred_at: decode_dt(&self.occurred_at)?,
      recorded_at: decode_dt(&self.recorded_at)?,
      mutated_at:  decode_dt(&self.mutated_at)?,
      deleted:     self.deleted,
    })
  }
}

/// Raw values read directly from an `answers` row.
pub struct RawAnswer {
  pub answer_id:   i64,
  pub question_id: i64,
  pub response_id: Option<i64>,
  pub value_json:  String,
  pub occurred_at: String,
  pub recorded_at: String,
  pub mutated_at:  String,
  pub deleted:     bool,
}

impl RawAnswer {
  pub fn into_answer(self) -> Result<Answer> {
    Ok(Answer {
      answer_id:   AnswerId(self.answer_id),
      question_id: QuestionId(self.question_id),
      response_id: self.response_id.map(ResponseId),
      value:       decode_answer_value(&self.value_json)?,
      occurred_at: decode_dt(&self.occurred_at)?,
      recorded_at: decode_dt(&self.recorded_at)?,
      mutated_at:  decode_dt(&self.mutated_at)?,
      deleted:     self.deleted,
    })
  }
}

/// The subset of an `answers` row the engine reads.
pub struct RawAnswerPoint {
  pub question_id: i64,
  pub value_json:  String,
  pub occurred_at: String,
  pub mutated_at:  String,
}

impl RawAnswerPoint {
  pub fn into_point(self) -> Result<AnswerPoint> {
    Ok(AnswerPoint {
      question_id: QuestionId(self.question_id),
      value:       decode_answer_value(&self.value_json)?,
      occurred_at: decode_dt(&self.occurred_at)?,
      mutated_at:  decode_dt(&self.mutated_at)?,
    })
  }
}

/// A `metrics` row together with its rows in the two edge tables.
pub struct RawMetric {
  pub metric_id:  i64,
  pub name:       String,
  pub function:   String,
  pub resolution: String,
  pub width:      String,
  pub questions:  Vec<i64>,
  pub children:   Vec<i64>,
}

impl RawMetric {
  pub fn into_metric(self) -> Result<Metric> {
    Ok(Metric {
      metric_id:  MetricId(self.metric_id),
      name:       self.name,
      function:   decode_token(&self.function)?,
      resolution: decode_token(&self.resolution)?,
      width:      decode_token(&self.width)?,
      sources:    MetricSources {
        questions:     self.questions.into_iter().map(QuestionId).collect::<BTreeSet<_>>(),
        child_metrics: self.children.into_iter().map(MetricId).collect::<BTreeSet<_>>(),
      },
    })
  }
}

/// Raw values read directly from an `alerts` row.
pub struct RawAlert {
  pub alert_id:  i64,
  pub metric_id: i64,
  pub name:      String,
  pub threshold: f64,
  pub direction: String,
  pub delay:     u32,
  pub enabled:   bool,
}

impl RawAlert {
  pub fn into_alert(self) -> Result<Alert> {
    Ok(Alert {
      alert_id:  AlertId(self.alert_id),
      metric_id: MetricId(self.metric_id),
      name:      self.name,
      threshold: self.threshold,
      direction: decode_token(&self.direction)?,
      delay:     self.delay,
      enabled:   self.enabled,
    })
  }
}

/// Raw values read directly from a `metric_series_caches` row.
pub struct RawSeriesCache {
  pub metric_id:   i64,
  pub series_json: String,
  pub computed_at: String,
}

impl RawSeriesCache {
  pub fn into_cache(self) -> Result<SeriesCache> {
    Ok(SeriesCache {
      metric_id:   MetricId(self.metric_id),
      series:      serde_json::from_str(&self.series_json)?,
      computed_at: decode_dt(&self.computed_at)?,
    })
  }
}

/// Raw values read directly from an `alert_status_caches` row.
pub struct RawAlertStatusCache {
  pub alert_id:     i64,
  pub is_activated: bool,
  pub computed_at:  String,
}

impl RawAlertStatusCache {
  pub fn into_cache(self) -> Result<AlertStatusCache> {
    Ok(AlertStatusCache {
      alert_id:     AlertId(self.alert_id),
      is_activated: self.is_activated,
      computed_at:  decode_dt(&self.computed_at)?,
    })
  }
}
