//! Error types for `tally-core`.

use thiserror::Error;

use crate::{alert::AlertId, metric::MetricId};

/// A metric or alert configuration that cannot be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
  #[error("metric {0} depends on itself")]
  SelfReference(MetricId),

  #[error("metric dependency cycle through metric {0}")]
  Cycle(MetricId),

  #[error("unknown child metric {0}")]
  UnknownChild(MetricId),

  #[error("unknown {kind} token: {token:?}")]
  UnknownToken { kind: &'static str, token: String },

  #[error("invalid width {0:?}: expected `<count>_<unit>`, e.g. `90_days`")]
  InvalidWidth(String),

  #[error("width {0} reaches outside the representable time range")]
  WidthOutOfRange(String),

  #[error("alert delay must be at least 1")]
  ZeroDelay,

  #[error("invalid UTC offset: {0} minutes")]
  InvalidOffset(i32),
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("configuration error: {0}")]
  Configuration(#[from] ConfigurationError),

  #[error("metric not found: {0}")]
  MetricNotFound(MetricId),

  #[error("alert not found: {0}")]
  AlertNotFound(AlertId),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Box a backend error from any [`MetricStore`](crate::store::MetricStore).
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
