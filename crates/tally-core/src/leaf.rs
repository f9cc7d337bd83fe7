//! Leaf data: questions, responses and the answers recorded against them.
//!
//! Leaf data is owned by the storage backend. The core reads it through
//! [`MetricStore`](crate::store::MetricStore) and never writes it; backends
//! notify the [`Engine`](crate::engine::Engine) after every mutation so dependent
//! caches can be discarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ConfigurationError;

id_type!(
  /// Identifier of a [`Question`].
  QuestionId
);

id_type!(
  /// Identifier of an [`Answer`].
  AnswerId
);

id_type!(
  /// Identifier of a [`Response`].
  ResponseId
);

// ─── Question ────────────────────────────────────────────────────────────────

/// The type of value a question collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
  String,
  Number,
  Bool,
  /// A number picked from a bounded scale.
  Range,
}

impl QuestionKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::String => "string",
      Self::Number => "number",
      Self::Bool => "bool",
      Self::Range => "range",
    }
  }
}

impl std::fmt::Display for QuestionKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for QuestionKind {
  type Err = ConfigurationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "string" => Ok(Self::String),
      "number" => Ok(Self::Number),
      "bool" => Ok(Self::Bool),
      "range" => Ok(Self::Range),
      other => Err(ConfigurationError::UnknownToken {
        kind:  "question kind",
        token: other.to_owned(),
      }),
    }
  }
}

/// A leaf data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
  pub question_id: QuestionId,
  pub name:        String,
  pub kind:        QuestionKind,
}

// ─── Answer ──────────────────────────────────────────────────────────────────

/// The typed payload of an answer. The variant must match the owning
/// question's [`QuestionKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AnswerValue {
  String(String),
  Number(f64),
  Bool(bool),
  Range(f64),
}

impl AnswerValue {
  pub fn kind(&self) -> QuestionKind {
    match self {
      Self::String(_) => QuestionKind::String,
      Self::Number(_) => QuestionKind::Number,
      Self::Bool(_) => QuestionKind::Bool,
      Self::Range(_) => QuestionKind::Range,
    }
  }

  /// The value as it enters a series.
  ///
  /// Booleans count as `1`/`0`; strings contribute only when they parse as a
  /// finite decimal number.
  pub fn as_number(&self) -> Option<f64> {
    match self {
      Self::Number(n) | Self::Range(n) => Some(*n),
      Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
      Self::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
    }
  }
}

/// A recorded answer. Answers are soft-deleted, never removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
  pub answer_id:   AnswerId,
  pub question_id: QuestionId,
  pub response_id: Option<ResponseId>,
  pub value:       AnswerValue,
  /// When the answered event happened; decides the bucket.
  pub occurred_at: DateTime<Utc>,
  pub recorded_at: DateTime<Utc>,
  /// Latest creation, update or soft-deletion instant; drives cache freshness.
  pub mutated_at:  DateTime<Utc>,
  pub deleted:     bool,
}

/// The slice of an answer the materializer reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerPoint {
  pub question_id: QuestionId,
  pub value:       AnswerValue,
  pub occurred_at: DateTime<Utc>,
  pub mutated_at:  DateTime<Utc>,
}

/// Input to a backend's answer-recording operation.
#[derive(Debug, Clone)]
pub struct NewAnswer {
  pub question_id: QuestionId,
  pub response_id: Option<ResponseId>,
  pub value:       AnswerValue,
  pub occurred_at: DateTime<Utc>,
}

impl NewAnswer {
  /// Convenience constructor for an answer outside any response.
  pub fn new(
    question_id: QuestionId,
    value: AnswerValue,
    occurred_at: DateTime<Utc>,
  ) -> Self {
    Self { question_id, response_id: None, value, occurred_at }
  }
}

// ─── Response ────────────────────────────────────────────────────────────────

/// A batch of answers submitted together. Moving or deleting a response
/// cascades to its answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
  pub response_id: ResponseId,
  pub occurred_at: DateTime<Utc>,
  pub recorded_at: DateTime<Utc>,
  pub mutated_at:  DateTime<Utc>,
  pub deleted:     bool,
}
