//! Metric configuration: the nodes of the dependency graph.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
  ConfigurationError,
  bucket::Resolution,
  leaf::QuestionId,
  width::Width,
};

id_type!(
  /// Identifier of a [`Metric`].
  MetricId
);

/// The per-bucket operator a metric applies to its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationFunction {
  /// Pass the most recent value in each bucket through unchanged.
  Answer,
  /// Add every contribution landing in a bucket.
  Sum,
}

impl AggregationFunction {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Answer => "answer",
      Self::Sum => "sum",
    }
  }
}

impl std::fmt::Display for AggregationFunction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for AggregationFunction {
  type Err = ConfigurationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "answer" => Ok(Self::Answer),
      "sum" => Ok(Self::Sum),
      other => Err(ConfigurationError::UnknownToken {
        kind:  "function",
        token: other.to_owned(),
      }),
    }
  }
}

/// The inputs a metric reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSources {
  pub questions:     BTreeSet<QuestionId>,
  pub child_metrics: BTreeSet<MetricId>,
}

/// A configured computation node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
  pub metric_id:  MetricId,
  pub name:       String,
  pub function:   AggregationFunction,
  pub resolution: Resolution,
  pub width:      Width,
  pub sources:    MetricSources,
}

/// Input to [`crate::store::MetricStore::create_metric`]; the id is assigned by
/// the store.
#[derive(Debug, Clone)]
pub struct NewMetric {
  pub name:       String,
  pub function:   AggregationFunction,
  pub resolution: Resolution,
  pub width:      Width,
  pub sources:    MetricSources,
}

impl NewMetric {
  /// A metric with no sources yet.
  pub fn new(
    name: impl Into<String>,
    function: AggregationFunction,
    resolution: Resolution,
    width: Width,
  ) -> Self {
    Self {
      name: name.into(),
      function,
      resolution,
      width,
      sources: MetricSources::default(),
    }
  }

  pub fn with_question(mut self, question_id: QuestionId) -> Self {
    self.sources.questions.insert(question_id);
    self
  }

  pub fn with_child(mut self, metric_id: MetricId) -> Self {
    self.sources.child_metrics.insert(metric_id);
    self
  }
}
