//! [`Engine`]: the cache-aware read path, the alert evaluator and the
//! invalidation service over any [`MetricStore`].
//!
//! Every entry point takes the evaluation instant explicitly. Caches are a
//! performance detail: failures loading or writing them are logged and the
//! freshly computed value is served anyway.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::{
  ConfigurationError, Error, Result,
  alert::{ActivationProgress, Alert, AlertId, AlertStatus, AlertStatusCache, NewAlert, check_delay},
  bucket::Horizon,
  graph::DependencyGraph,
  leaf::QuestionId,
  materialize::{Inputs, materialize},
  metric::{Metric, MetricId, NewMetric},
  series::{Series, SeriesCache},
  settings::EngineSettings,
  store::MetricStore,
};

/// A series together with the cache bookkeeping of the read that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSeries {
  pub metric_id:   MetricId,
  pub series:      Series,
  pub computed_at: DateTime<Utc>,
  /// `true` when served from a fresh cache row, `false` when recomputed.
  pub from_cache:  bool,
}

/// The caches discarded by one invalidation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Invalidation {
  pub metrics: Vec<MetricId>,
  pub alerts:  Vec<AlertId>,
}

#[derive(Debug, Clone)]
pub struct Engine<S> {
  store:    S,
  settings: EngineSettings,
  offset:   FixedOffset,
}

impl<S: MetricStore> Engine<S> {
  pub fn new(store: S, settings: EngineSettings) -> Result<Self> {
    let offset = settings.offset()?;
    Ok(Self { store, settings, offset })
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn settings(&self) -> &EngineSettings { &self.settings }

  // ── Series ────────────────────────────────────────────────────────────

  /// The series of `metric_id` as of `now`, one point per bucket of its width.
  pub async fn series_of(&self, metric_id: MetricId, now: DateTime<Utc>) -> Result<Series> {
    Ok(self.read(metric_id, now).await?.series)
  }

  /// Read `metric_id` through its cache, recomputing it and any stale metric
  /// it depends on.
  ///
  /// Upstream metrics are visited children-first, so each one is checked
  /// (and repaired) before any parent looks at it.
  pub async fn read(&self, metric_id: MetricId, now: DateTime<Utc>) -> Result<CachedSeries> {
    let metrics = self.load_upstream(metric_id).await?;
    let order = DependencyGraph::from_metrics(metrics.values()).evaluation_order(metric_id)?;

    let mut done: HashMap<MetricId, CachedSeries> = HashMap::with_capacity(order.len());
    for id in order {
      let metric = metrics.get(&id).ok_or(Error::MetricNotFound(id))?;
      let read = self.read_one(metric, &done, now).await?;
      done.insert(id, read);
    }
    done.remove(&metric_id).ok_or(Error::MetricNotFound(metric_id))
  }

  /// Load `root` and every metric it transitively sources from.
  async fn load_upstream(&self, root: MetricId) -> Result<HashMap<MetricId, Metric>> {
    let mut loaded: HashMap<MetricId, Metric> = HashMap::new();
    let mut queue = VecDeque::from([(root, None)]);

    while let Some((id, parent)) = queue.pop_front() {
      if loaded.contains_key(&id) {
        continue;
      }
      let metric = match self.store.load_metric(id).await.map_err(Error::store)? {
        Some(m) => m,
        None if parent.is_some() => return Err(ConfigurationError::UnknownChild(id).into()),
        None => return Err(Error::MetricNotFound(id)),
      };
      for &child in &metric.sources.child_metrics {
        if !loaded.contains_key(&child) {
          queue.push_back((child, Some(id)));
        }
      }
      loaded.insert(id, metric);
    }

    Ok(loaded)
  }

  async fn read_one(
    &self,
    metric: &Metric,
    done: &HashMap<MetricId, CachedSeries>,
    now: DateTime<Utc>,
  ) -> Result<CachedSeries> {
    let metric_id = metric.metric_id;
    let question_ids: Vec<QuestionId> = metric.sources.questions.iter().copied().collect();

    if let Some(cache) = self.cached_series(metric_id).await
      && self.is_fresh(metric, &cache, &question_ids, done, now).await?
    {
      tracing::trace!(%metric_id, computed_at = %cache.computed_at, "series cache hit");
      return Ok(CachedSeries {
        metric_id,
        series: cache.series,
        computed_at: cache.computed_at,
        from_cache: true,
      });
    }

    let horizon = Horizon::resolve(metric.resolution, metric.width, now, self.offset)?;
    let answers = if question_ids.is_empty() {
      Vec::new()
    } else {
      self
        .store
        .fetch_answers(&question_ids, horizon.range)
        .await
        .map_err(Error::store)?
    };
    let children = metric
      .sources
      .child_metrics
      .iter()
      .map(|child| {
        done
          .get(child)
          .map(|read| &read.series)
          .ok_or(Error::MetricNotFound(*child))
      })
      .collect::<Result<Vec<&Series>>>()?;

    let series = materialize(
      metric,
      &horizon,
      Inputs { answers: &answers, children: &children },
      self.offset,
    );
    tracing::debug!(
      %metric_id,
      buckets = series.len(),
      answers = answers.len(),
      "recomputed series"
    );

    let cache = SeriesCache { metric_id, series, computed_at: now };
    if let Err(e) = self.store.upsert_series_cache(&cache).await {
      tracing::warn!(%metric_id, error = %e, "failed to persist series cache");
    }

    Ok(CachedSeries {
      metric_id,
      series: cache.series,
      computed_at: now,
      from_cache: false,
    })
  }

  async fn cached_series(&self, metric_id: MetricId) -> Option<SeriesCache> {
    match self.store.load_series_cache(metric_id).await {
      Ok(cache) => cache,
      Err(e) => {
        tracing::warn!(%metric_id, error = %e, "failed to load series cache; recomputing");
        None
      }
    }
  }

  /// A cache is fresh when its horizon still ends in the bucket containing
  /// `now`, every child was itself served fresh from a cache no newer than
  /// this one, and no linked answer changed after it was computed.
  async fn is_fresh(
    &self,
    metric: &Metric,
    cache: &SeriesCache,
    question_ids: &[QuestionId],
    done: &HashMap<MetricId, CachedSeries>,
    now: DateTime<Utc>,
  ) -> Result<bool> {
    let current_bucket = metric.resolution.floor(now, self.offset);
    if cache.series.points().last().map(|p| p.bucket_start) != Some(current_bucket) {
      return Ok(false);
    }

    for child in &metric.sources.child_metrics {
      match done.get(child) {
        Some(read) if read.from_cache && read.computed_at <= cache.computed_at => {}
        _ => return Ok(false),
      }
    }

    if question_ids.is_empty() {
      return Ok(true);
    }
    let latest = self
      .store
      .latest_answer_mutation(question_ids)
      .await
      .map_err(Error::store)?;
    Ok(latest.is_none_or(|mutated_at| mutated_at <= cache.computed_at))
  }

  // ── Alerts ────────────────────────────────────────────────────────────

  async fn load_alert(&self, alert_id: AlertId) -> Result<Alert> {
    self
      .store
      .load_alert(alert_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::AlertNotFound(alert_id))
  }

  /// Whether `alert_id` is activated as of `now`. Disabled alerts are never
  /// activated and leave their cache untouched.
  pub async fn is_activated(&self, alert_id: AlertId, now: DateTime<Utc>) -> Result<bool> {
    let alert = self.load_alert(alert_id).await?;
    if !alert.enabled {
      return Ok(false);
    }

    let read = self.read(alert.metric_id, now).await?;
    if read.from_cache
      && let Some(status) = self.cached_status(alert_id).await
      && status.computed_at >= read.computed_at
    {
      tracing::trace!(%alert_id, "alert status cache hit");
      return Ok(status.is_activated);
    }

    let is_activated = alert.evaluate(&read.series);
    tracing::debug!(%alert_id, is_activated, "recomputed alert status");

    let status = AlertStatusCache { alert_id, is_activated, computed_at: now };
    if let Err(e) = self.store.upsert_alert_status_cache(status).await {
      tracing::warn!(%alert_id, error = %e, "failed to persist alert status cache");
    }
    Ok(is_activated)
  }

  async fn cached_status(&self, alert_id: AlertId) -> Option<AlertStatusCache> {
    match self.store.load_alert_status_cache(alert_id).await {
      Ok(status) => status,
      Err(e) => {
        tracing::warn!(%alert_id, error = %e, "failed to load alert status cache; recomputing");
        None
      }
    }
  }

  /// The run of exceeding values ending at the most recent bucket. Computed
  /// from the series directly, never from the cached activation.
  pub async fn activation_progress(
    &self,
    alert_id: AlertId,
    now: DateTime<Utc>,
  ) -> Result<ActivationProgress> {
    let alert = self.load_alert(alert_id).await?;
    let series = self.series_of(alert.metric_id, now).await?;
    Ok(alert.progress(&series))
  }

  pub async fn alert_status(&self, alert_id: AlertId, now: DateTime<Utc>) -> Result<AlertStatus> {
    let alert = self.load_alert(alert_id).await?;
    if !alert.enabled {
      return Ok(AlertStatus::Disabled);
    }
    Ok(if self.is_activated(alert_id, now).await? {
      AlertStatus::Activated
    } else {
      AlertStatus::Deactivated
    })
  }

  // ── Invalidation ──────────────────────────────────────────────────────

  /// React to an answer of `question_id` being created, updated or
  /// soft-deleted: discard the series cache of every metric depending on the
  /// question, and the status cache of every alert bound to one of them.
  ///
  /// Idempotent; caches that are already gone are skipped silently.
  pub async fn on_answer_changed(
    &self,
    question_id: QuestionId,
    mutation_time: DateTime<Utc>,
  ) -> Result<Invalidation> {
    self.on_response_changed(&[question_id], mutation_time).await
  }

  /// [`Self::on_answer_changed`] for every question touched by a response
  /// edit. Metrics reachable from several of the questions are discarded once.
  pub async fn on_response_changed(
    &self,
    question_ids: &[QuestionId],
    mutation_time: DateTime<Utc>,
  ) -> Result<Invalidation> {
    let graph = self.graph().await?;
    let mut seen = HashSet::new();
    let affected: Vec<MetricId> = question_ids
      .iter()
      .flat_map(|&q| graph.dependents_of_question(q))
      .filter(|m| seen.insert(*m))
      .collect();

    let invalidation = self.discard(&affected).await?;
    tracing::debug!(
      questions = ?question_ids,
      %mutation_time,
      metrics = invalidation.metrics.len(),
      alerts = invalidation.alerts.len(),
      "invalidated dependent caches"
    );
    Ok(invalidation)
  }

  async fn graph(&self) -> Result<DependencyGraph> {
    let metrics = self.store.list_metrics().await.map_err(Error::store)?;
    Ok(DependencyGraph::from_metrics(&metrics))
  }

  async fn discard(&self, metric_ids: &[MetricId]) -> Result<Invalidation> {
    let mut invalidation = Invalidation::default();
    for &metric_id in metric_ids {
      self
        .store
        .delete_series_cache(metric_id)
        .await
        .map_err(Error::store)?;
      invalidation.metrics.push(metric_id);

      let alerts = self
        .store
        .alerts_for_metric(metric_id)
        .await
        .map_err(Error::store)?;
      for alert in alerts {
        self
          .store
          .delete_alert_status_cache(alert.alert_id)
          .await
          .map_err(Error::store)?;
        invalidation.alerts.push(alert.alert_id);
      }
    }
    Ok(invalidation)
  }

  // ── Configuration ─────────────────────────────────────────────────────

  /// Validate and persist a new metric. Every child must already exist; a new
  /// metric has no dependents yet, so it cannot close a cycle.
  pub async fn create_metric(&self, input: NewMetric) -> Result<Metric> {
    Horizon::check(input.resolution, input.width)?;
    let graph = self.graph().await?;
    if let Some(&child) = input
      .sources
      .child_metrics
      .iter()
      .find(|&&child| !graph.contains_metric(child))
    {
      return Err(ConfigurationError::UnknownChild(child).into());
    }
    let metric = self.store.create_metric(input).await.map_err(Error::store)?;
    tracing::info!(metric_id = %metric.metric_id, name = %metric.name, "created metric");
    Ok(metric)
  }

  /// Validate and persist an edited metric, then discard its cache and the
  /// caches of everything depending on it.
  pub async fn update_metric(&self, metric: &Metric) -> Result<Invalidation> {
    let graph = self.graph().await?;
    if !graph.contains_metric(metric.metric_id) {
      return Err(Error::MetricNotFound(metric.metric_id));
    }
    graph.check_sources(metric)?;
    Horizon::check(metric.resolution, metric.width)?;

    self.store.update_metric(metric).await.map_err(Error::store)?;

    let mut affected = vec![metric.metric_id];
    affected.extend(graph.dependents_of_metric(metric.metric_id));
    let invalidation = self.discard(&affected).await?;
    tracing::info!(
      metric_id = %metric.metric_id,
      discarded = invalidation.metrics.len(),
      "updated metric"
    );
    Ok(invalidation)
  }

  pub async fn create_alert(&self, input: NewAlert) -> Result<Alert> {
    check_delay(input.delay)?;
    self.require_metric(input.metric_id).await?;
    let alert = self.store.create_alert(input).await.map_err(Error::store)?;
    tracing::info!(alert_id = %alert.alert_id, metric_id = %alert.metric_id, "created alert");
    Ok(alert)
  }

  /// Persist an edited alert and discard its status cache.
  pub async fn update_alert(&self, alert: &Alert) -> Result<Invalidation> {
    check_delay(alert.delay)?;
    self.load_alert(alert.alert_id).await?;
    self.require_metric(alert.metric_id).await?;

    self.store.update_alert(alert).await.map_err(Error::store)?;
    self
      .store
      .delete_alert_status_cache(alert.alert_id)
      .await
      .map_err(Error::store)?;
    Ok(Invalidation { metrics: Vec::new(), alerts: vec![alert.alert_id] })
  }

  async fn require_metric(&self, metric_id: MetricId) -> Result<()> {
    match self.store.load_metric(metric_id).await.map_err(Error::store)? {
      Some(_) => Ok(()),
      None => Err(Error::MetricNotFound(metric_id)),
    }
  }
}
