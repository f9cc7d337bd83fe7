//! The metric dependency graph.
//!
//! Nodes are questions and metrics keyed by their integer ids; edges point from
//! a source to the metric that consumes it (`question → metric`,
//! `child_metric → parent_metric`). Invalidation walks edges forward,
//! evaluation walks them backward and orders the result topologically.

use petgraph::{
  Direction,
  algo::{has_path_connecting, toposort},
  graphmap::DiGraphMap,
  visit::{Bfs, Dfs, Reversed},
};

use crate::{
  ConfigurationError,
  leaf::QuestionId,
  metric::{Metric, MetricId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Node {
  Question(QuestionId),
  Metric(MetricId),
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
  graph: DiGraphMap<Node, ()>,
}

impl DependencyGraph {
  pub fn new() -> Self { Self::default() }

  pub fn from_metrics<'a>(metrics: impl IntoIterator<Item = &'a Metric>) -> Self {
    let mut graph = Self::new();
    for metric in metrics {
      graph.insert_metric(metric);
    }
    graph
  }

  /// Add a metric and the edges from each of its sources. Does not validate;
  /// see [`Self::check_sources`].
  pub fn insert_metric(&mut self, metric: &Metric) {
    let node = Node::Metric(metric.metric_id);
    self.graph.add_node(node);
    for &question_id in &metric.sources.questions {
      self.graph.add_edge(Node::Question(question_id), node, ());
    }
    for &child_id in &metric.sources.child_metrics {
      self.graph.add_edge(Node::Metric(child_id), node, ());
    }
  }

  pub fn contains_metric(&self, metric_id: MetricId) -> bool {
    self.graph.contains_node(Node::Metric(metric_id))
  }

  /// Reject a (new or edited) metric configuration whose child metrics are
  /// unknown or would close a cycle.
  ///
  /// A child closes a cycle exactly when it is already reachable upward from
  /// the metric, i.e. the child consumes the metric directly or transitively.
  pub fn check_sources(&self, metric: &Metric) -> Result<(), ConfigurationError> {
    let node = Node::Metric(metric.metric_id);
    for &child_id in &metric.sources.child_metrics {
      if child_id == metric.metric_id {
        return Err(ConfigurationError::SelfReference(metric.metric_id));
      }
      if !self.contains_metric(child_id) {
        return Err(ConfigurationError::UnknownChild(child_id));
      }
      if self.graph.contains_node(node)
        && has_path_connecting(&self.graph, node, Node::Metric(child_id), None)
      {
        return Err(ConfigurationError::Cycle(metric.metric_id));
      }
    }
    Ok(())
  }

  /// Every metric that consumes `question_id`, directly or through any chain
  /// of parent metrics, in breadth-first order. Each metric appears once.
  pub fn dependents_of_question(&self, question_id: QuestionId) -> Vec<MetricId> {
    self.downstream(Node::Question(question_id))
  }

  /// Every metric that consumes `metric_id` transitively, excluding itself.
  pub fn dependents_of_metric(&self, metric_id: MetricId) -> Vec<MetricId> {
    self.downstream(Node::Metric(metric_id))
  }

  fn downstream(&self, start: Node) -> Vec<MetricId> {
    if !self.graph.contains_node(start) {
      return Vec::new();
    }
    let mut found = Vec::new();
    let mut bfs = Bfs::new(&self.graph, start);
    while let Some(node) = bfs.next(&self.graph) {
      if node == start {
        continue;
      }
      if let Node::Metric(id) = node {
        found.push(id);
      }
    }
    found
  }

  /// The metrics `root` depends on, including `root`, ordered so that every
  /// child precedes its parents.
  ///
  /// Fails if the metrics upstream of `root` contain a cycle.
  pub fn evaluation_order(&self, root: MetricId) -> Result<Vec<MetricId>, ConfigurationError> {
    let root_node = Node::Metric(root);
    if !self.graph.contains_node(root_node) {
      return Ok(vec![root]);
    }

    // Induced subgraph of the metrics reachable backward from the root.
    let reversed = Reversed(&self.graph);
    let mut upstream = DiGraphMap::<MetricId, ()>::new();
    let mut dfs = Dfs::new(reversed, root_node);
    while let Some(node) = dfs.next(reversed) {
      let Node::Metric(parent) = node else { continue };
      upstream.add_node(parent);
      for source in self.graph.neighbors_directed(node, Direction::Incoming) {
        if let Node::Metric(child) = source {
          upstream.add_edge(child, parent, ());
        }
      }
    }

    toposort(&upstream, None).map_err(|cycle| ConfigurationError::Cycle(cycle.node_id()))
  }
}
