//! Error type for `tally-store-sqlite`.

use tally_core::{
  alert::AlertId,
  leaf::{AnswerId, QuestionId, QuestionKind, ResponseId},
  metric::MetricId,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tally_core::Error),

  #[error("configuration error: {0}")]
  Configuration(#[from] tally_core::ConfigurationError),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("question not found: {0}")]
  QuestionNotFound(QuestionId),

  #[error("answer not found: {0}")]
  AnswerNotFound(AnswerId),

  #[error("response not found: {0}")]
  ResponseNotFound(ResponseId),

  #[error("metric not found: {0}")]
  MetricNotFound(MetricId),

  #[error("alert not found: {0}")]
  AlertNotFound(AlertId),

  /// The answer's value does not match the kind its question collects.
  #[error("question {question_id} collects {expected} answers, got {actual}")]
  KindMismatch {
    question_id: QuestionId,
    expected:    QuestionKind,
    actual:      QuestionKind,
  },

  /// Numeric answers must be finite; JSON has no encoding for NaN or infinity.
  #[error("question {0} only accepts finite numbers")]
  NonFiniteValue(QuestionId),

  /// A series holding NaN or infinity cannot be cached losslessly.
  #[error("series of metric {0} holds a non-finite value")]
  NonFiniteSeries(MetricId),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
