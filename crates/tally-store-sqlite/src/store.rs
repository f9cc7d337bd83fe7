//! [`SqliteStore`]: the SQLite implementation of [`MetricStore`], plus the
//! write API for leaf data.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, types::Value};

use tally_core::{
  alert::{Alert, AlertId, AlertStatusCache, NewAlert},
  bucket::TimeRange,
  leaf::{
    Answer, AnswerId, AnswerPoint, AnswerValue, NewAnswer, Question, QuestionId, QuestionKind,
    Response, ResponseId,
  },
  metric::{Metric, MetricId, NewMetric},
  series::SeriesCache,
  store::MetricStore,
};

use crate::{
  Error, Result,
  encode::{
    RawAlert, RawAlertStatusCache, RawAnswer, RawAnswerPoint, RawMetric, RawQuestion, RawResponse,
    RawSeriesCache, decode_dt, encode_answer_value, encode_dt,
  },
  schema::SCHEMA,
};

const ANSWER_COLUMNS: &str = "answer_id, question_id, response_id, value_json, occurred_at, \
                              recorded_at, mutated_at, deleted";

const ALERT_COLUMNS: &str = "alert_id, metric_id, name, threshold, direction, delay, enabled";

fn raw_answer(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAnswer> {
  Ok(RawAnswer {
    answer_id:   row.get(0)?,
    question_id: row.get(1)?,
    response_id: row.get(2)?,
    value_json:  row.get(3)?,
    occurred_at: row.get(4)?,
    recorded_at: row.get(5)?,
    mutated_at:  row.get(6)?,
    deleted:     row.get(7)?,
  })
}

fn raw_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAlert> {
  Ok(RawAlert {
    alert_id:  row.get(0)?,
    metric_id: row.get(1)?,
    name:      row.get(2)?,
    threshold: row.get(3)?,
    direction: row.get(4)?,
    delay:     row.get(5)?,
    enabled:   row.get(6)?,
  })
}

/// Read one metric row and its edges. Runs on the connection thread.
fn read_metric(conn: &rusqlite::Connection, metric_id: i64) -> rusqlite::Result<Option<RawMetric>> {
  let row = conn
    .query_row(
      "SELECT metric_id, name, function, resolution, width FROM metrics WHERE metric_id = ?1",
      rusqlite::params![metric_id],
      |row| {
        Ok(RawMetric {
          metric_id:  row.get(0)?,
          name:       row.get(1)?,
          function:   row.get(2)?,
          resolution: row.get(3)?,
          width:      row.get(4)?,
          questions:  Vec::new(),
          children:   Vec::new(),
        })
      },
    )
    .optional()?;
  let Some(mut raw) = row else { return Ok(None) };

  raw.questions = conn
    .prepare("SELECT question_id FROM metric_questions WHERE metric_id = ?1")?
    .query_map(rusqlite::params![metric_id], |r| r.get(0))?
    .collect::<rusqlite::Result<Vec<i64>>>()?;
  raw.children = conn
    .prepare("SELECT child_metric_id FROM metric_metrics WHERE parent_metric_id = ?1")?
    .query_map(rusqlite::params![metric_id], |r| r.get(0))?
    .collect::<rusqlite::Result<Vec<i64>>>()?;
  Ok(Some(raw))
}

/// Replace the edge rows of `metric_id`. Runs inside a transaction.
fn write_sources(
  tx: &rusqlite::Transaction<'_>,
  metric_id: i64,
  questions: &[i64],
  children: &[i64],
) -> rusqlite::Result<()> {
  tx.execute("DELETE FROM metric_questions WHERE metric_id = ?1", rusqlite::params![metric_id])?;
  tx.execute(
    "DELETE FROM metric_metrics WHERE parent_metric_id = ?1",
    rusqlite::params![metric_id],
  )?;
  for question_id in questions {
    tx.execute(
      "INSERT INTO metric_questions (metric_id, question_id) VALUES (?1, ?2)",
      rusqlite::params![metric_id, question_id],
    )?;
  }
  for child_id in children {
    tx.execute(
      "INSERT INTO metric_metrics (parent_metric_id, child_metric_id) VALUES (?1, ?2)",
      rusqlite::params![metric_id, child_id],
    )?;
  }
  Ok(())
}

/// `?1, ?2, …` placeholders followed by the question ids as bound values.
fn question_params(question_ids: &[QuestionId]) -> (String, Vec<Value>) {
  let placeholders = (1..=question_ids.len())
    .map(|i| format!("?{i}"))
    .collect::<Vec<_>>()
    .join(", ");
  let values = question_ids.iter().map(|q| Value::Integer(q.0)).collect();
  (placeholders, values)
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tally store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Questions ─────────────────────────────────────────────────────────────

  pub async fn add_question(&self, name: impl Into<String>, kind: QuestionKind) -> Result<Question> {
    let name = name.into();
    let name_col = name.clone();
    let kind_str = kind.as_str();

    let question_id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO questions (name, kind) VALUES (?1, ?2)",
          rusqlite::params![name_col, kind_str],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(Question { question_id: QuestionId(question_id), name, kind })
  }

  pub async fn get_question(&self, question_id: QuestionId) -> Result<Option<Question>> {
    let raw: Option<RawQuestion> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT question_id, name, kind FROM questions WHERE question_id = ?1",
            rusqlite::params![question_id.0],
            |row| {
              Ok(RawQuestion {
                question_id: row.get(0)?,
                name:        row.get(1)?,
                kind:        row.get(2)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawQuestion::into_question).transpose()
  }

  pub async fn list_questions(&self) -> Result<Vec<Question>> {
    let raws: Vec<RawQuestion> = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare("SELECT question_id, name, kind FROM questions ORDER BY question_id")?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawQuestion {
              question_id: row.get(0)?,
              name:        row.get(1)?,
              kind:        row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawQuestion::into_question).collect()
  }

  // ── Responses ─────────────────────────────────────────────────────────────

  /// Open a response; answers recorded against it move and delete with it.
  pub async fn add_response(
    &self,
    occurred_at: DateTime<Utc>,
    at: DateTime<Utc>,
  ) -> Result<Response> {
    let occurred_str = encode_dt(occurred_at);
    let at_str = encode_dt(at);

    let response_id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO responses (occurred_at, recorded_at, mutated_at, deleted)
           VALUES (?1, ?2, ?2, 0)",
          rusqlite::params![occurred_str, at_str],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(Response {
      response_id: ResponseId(response_id),
      occurred_at,
      recorded_at: at,
      mutated_at: at,
      deleted: false,
    })
  }

  pub async fn get_response(&self, response_id: ResponseId) -> Result<Option<Response>> {
    let raw: Option<RawResponse> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT response_id, occurred_at, recorded_at, mutated_at, deleted
             FROM responses WHERE response_id = ?1",
            rusqlite::params![response_id.0],
            |row| {
              Ok(RawResponse {
                response_id: row.get(0)?,
                occurred_at: row.get(1)?,
                recorded_at: row.get(2)?,
                mutated_at:  row.get(3)?,
                deleted:     row.get(4)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawResponse::into_response).transpose()
  }

  async fn live_response(&self, response_id: ResponseId) -> Result<Response> {
    match self.get_response(response_id).await? {
      Some(r) if !r.deleted => Ok(r),
      _ => Err(Error::ResponseNotFound(response_id)),
    }
  }

  /// Move a response to `new_occurred_at`, shifting each of its live answers
  /// by the same difference. Returns the questions whose answers moved.
  pub async fn shift_response(
    &self,
    response_id: ResponseId,
    new_occurred_at: DateTime<Utc>,
    at: DateTime<Utc>,
  ) -> Result<Vec<QuestionId>> {
    let response = self.live_response(response_id).await?;
    let delta = new_occurred_at - response.occurred_at;

    let live = self.answers_of_response(response_id).await?;
    let shifted = live
      .iter()
      .map(|a| (a.answer_id.0, encode_dt(a.occurred_at + delta)))
      .collect::<Vec<_>>();
    let new_str = encode_dt(new_occurred_at);
    let at_str = encode_dt(at);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "UPDATE responses SET occurred_at = ?1, mutated_at = ?2 WHERE response_id = ?3",
          rusqlite::params![new_str, at_str, response_id.0],
        )?;
        for (answer_id, occurred_str) in shifted {
          tx.execute(
            "UPDATE answers SET occurred_at = ?1, mutated_at = ?2 WHERE answer_id = ?3",
            rusqlite::params![occurred_str, at_str, answer_id],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(distinct_questions(&live))
  }

  /// Soft-delete a response and every live answer in it. Returns the
  /// questions whose answers were deleted.
  pub async fn soft_delete_response(
    &self,
    response_id: ResponseId,
    at: DateTime<Utc>,
  ) -> Result<Vec<QuestionId>> {
    self.live_response(response_id).await?;
    let live = self.answers_of_response(response_id).await?;
    let at_str = encode_dt(at);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "UPDATE responses SET deleted = 1, mutated_at = ?1 WHERE response_id = ?2",
          rusqlite::params![at_str, response_id.0],
        )?;
        tx.execute(
          "UPDATE answers SET deleted = 1, mutated_at = ?1
           WHERE response_id = ?2 AND deleted = 0",
          rusqlite::params![at_str, response_id.0],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(distinct_questions(&live))
  }

  async fn answers_of_response(&self, response_id: ResponseId) -> Result<Vec<Answer>> {
    let raws: Vec<RawAnswer> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ANSWER_COLUMNS} FROM answers
           WHERE response_id = ?1 AND deleted = 0 ORDER BY answer_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![response_id.0], raw_answer)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAnswer::into_answer).collect()
  }

  // ── Answers ───────────────────────────────────────────────────────────────

  async fn check_kind(&self, question_id: QuestionId, value: &AnswerValue) -> Result<()> {
    let question = self
      .get_question(question_id)
      .await?
      .ok_or(Error::QuestionNotFound(question_id))?;
    if question.kind != value.kind() {
      return Err(Error::KindMismatch {
        question_id,
        expected: question.kind,
        actual: value.kind(),
      });
    }
    if let AnswerValue::Number(n) | AnswerValue::Range(n) = value
      && !n.is_finite()
    {
      return Err(Error::NonFiniteValue(question_id));
    }
    Ok(())
  }

  /// Record an answer as of `at`. The value must match the question's kind,
  /// numbers must be finite and any referenced response must be live.
  pub async fn record_answer(&self, input: NewAnswer, at: DateTime<Utc>) -> Result<Answer> {
    self.check_kind(input.question_id, &input.value).await?;
    if let Some(response_id) = input.response_id {
      self.live_response(response_id).await?;
    }

    let question_id = input.question_id.0;
    let response_id = input.response_id.map(|r| r.0);
    let answer_type = input.value.kind().as_str();
    let value_json = encode_answer_value(&input.value)?;
    let occurred_str = encode_dt(input.occurred_at);
    let at_str = encode_dt(at);

    let answer_id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO answers (
             question_id, response_id, answer_type, value_json,
             occurred_at, recorded_at, mutated_at, deleted
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 0)",
          rusqlite::params![
            question_id,
            response_id,
            answer_type,
            value_json,
            occurred_str,
            at_str,
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(Answer {
      answer_id:   AnswerId(answer_id),
      question_id: input.question_id,
      response_id: input.response_id,
      value:       input.value,
      occurred_at: input.occurred_at,
      recorded_at: at,
      mutated_at:  at,
      deleted:     false,
    })
  }

  pub async fn get_answer(&self, answer_id: AnswerId) -> Result<Option<Answer>> {
    let raw: Option<RawAnswer> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {ANSWER_COLUMNS} FROM answers WHERE answer_id = ?1"),
            rusqlite::params![answer_id.0],
            raw_answer,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawAnswer::into_answer).transpose()
  }

  async fn live_answer(&self, answer_id: AnswerId) -> Result<Answer> {
    match self.get_answer(answer_id).await? {
      Some(a) if !a.deleted => Ok(a),
      _ => Err(Error::AnswerNotFound(answer_id)),
    }
  }

  /// Answers of a question, oldest occurrence first.
  pub async fn list_answers(
    &self,
    question_id: QuestionId,
    include_deleted: bool,
  ) -> Result<Vec<Answer>> {
    let raws: Vec<RawAnswer> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ANSWER_COLUMNS} FROM answers
           WHERE question_id = ?1 AND (?2 OR deleted = 0)
           ORDER BY occurred_at, answer_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![question_id.0, include_deleted], raw_answer)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAnswer::into_answer).collect()
  }

  /// Replace a live answer's value as of `at`.
  pub async fn update_answer_value(
    &self,
    answer_id: AnswerId,
    value: AnswerValue,
    at: DateTime<Utc>,
  ) -> Result<Answer> {
    let mut answer = self.live_answer(answer_id).await?;
    self.check_kind(answer.question_id, &value).await?;

    let value_json = encode_answer_value(&value)?;
    let at_str = encode_dt(at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE answers SET value_json = ?1, mutated_at = ?2 WHERE answer_id = ?3",
          rusqlite::params![value_json, at_str, answer_id.0],
        )?;
        Ok(())
      })
      .await?;

    answer.value = value;
    answer.mutated_at = at;
    Ok(answer)
  }

  /// Soft-delete a live answer as of `at`.
  pub async fn soft_delete_answer(&self, answer_id: AnswerId, at: DateTime<Utc>) -> Result<Answer> {
    let mut answer = self.live_answer(answer_id).await?;

    let at_str = encode_dt(at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE answers SET deleted = 1, mutated_at = ?1 WHERE answer_id = ?2",
          rusqlite::params![at_str, answer_id.0],
        )?;
        Ok(())
      })
      .await?;

    answer.deleted = true;
    answer.mutated_at = at;
    Ok(answer)
  }
}

fn distinct_questions(answers: &[Answer]) -> Vec<QuestionId> {
  let mut ids: Vec<QuestionId> = answers.iter().map(|a| a.question_id).collect();
  ids.sort();
  ids.dedup();
  ids
}

// ─── MetricStore impl ────────────────────────────────────────────────────────

impl MetricStore for SqliteStore {
  type Error = Error;

  // ── Leaf data ─────────────────────────────────────────────────────────────

  async fn fetch_answers<'a>(
    &'a self,
    question_ids: &'a [QuestionId],
    range: TimeRange,
  ) -> Result<Vec<AnswerPoint>> {
    if question_ids.is_empty() {
      return Ok(Vec::new());
    }
    let (placeholders, mut params) = question_params(question_ids);
    let n = params.len();
    params.push(Value::Text(encode_dt(range.start)));
    params.push(Value::Text(encode_dt(range.end)));
    let sql = format!(
      "SELECT question_id, value_json, occurred_at, mutated_at FROM answers
       WHERE question_id IN ({placeholders})
         AND deleted = 0
         AND occurred_at >= ?{} AND occurred_at < ?{}
       ORDER BY occurred_at, answer_id",
      n + 1,
      n + 2,
    );

    let raws: Vec<RawAnswerPoint> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), |row| {
            Ok(RawAnswerPoint {
              question_id: row.get(0)?,
              value_json:  row.get(1)?,
              occurred_at: row.get(2)?,
              mutated_at:  row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAnswerPoint::into_point).collect()
  }

  async fn latest_answer_mutation<'a>(
    &'a self,
    question_ids: &'a [QuestionId],
  ) -> Result<Option<DateTime<Utc>>> {
    if question_ids.is_empty() {
      return Ok(None);
    }
    let (placeholders, params) = question_params(question_ids);
    let sql = format!("SELECT MAX(mutated_at) FROM answers WHERE question_id IN ({placeholders})");

    let latest: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(&sql, rusqlite::params_from_iter(params), |r| r.get(0))?)
      })
      .await?;

    latest.as_deref().map(decode_dt).transpose()
  }

  // ── Configuration ─────────────────────────────────────────────────────────

  async fn load_metric(&self, metric_id: MetricId) -> Result<Option<Metric>> {
    let raw = self
      .conn
      .call(move |conn| Ok(read_metric(conn, metric_id.0)?))
      .await?;

    raw.map(RawMetric::into_metric).transpose()
  }

  async fn list_metrics(&self) -> Result<Vec<Metric>> {
    let raws: Vec<RawMetric> = self
      .conn
      .call(|conn| {
        let ids = conn
          .prepare("SELECT metric_id FROM metrics ORDER BY metric_id")?
          .query_map([], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<i64>>>()?;
        let mut raws = Vec::with_capacity(ids.len());
        for id in ids {
          if let Some(raw) = read_metric(conn, id)? {
            raws.push(raw);
          }
        }
        Ok(raws)
      })
      .await?;

    raws.into_iter().map(RawMetric::into_metric).collect()
  }

  async fn create_metric(&self, input: NewMetric) -> Result<Metric> {
    let name = input.name.clone();
    let function = input.function.as_str();
    let resolution = input.resolution.as_str();
    let width = input.width.to_string();
    let questions: Vec<i64> = input.sources.questions.iter().map(|q| q.0).collect();
    let children: Vec<i64> = input.sources.child_metrics.iter().map(|m| m.0).collect();

    let metric_id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO metrics (name, function, resolution, width) VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![name, function, resolution, width],
        )?;
        let metric_id = tx.last_insert_rowid();
        write_sources(&tx, metric_id, &questions, &children)?;
        tx.commit()?;
        Ok(metric_id)
      })
      .await?;

    Ok(Metric {
      metric_id:  MetricId(metric_id),
      name:       input.name,
      function:   input.function,
      resolution: input.resolution,
      width:      input.width,
      sources:    input.sources,
    })
  }

  async fn update_metric<'a>(&'a self, metric: &'a Metric) -> Result<()> {
    let metric_id = metric.metric_id;
    let name = metric.name.clone();
    let function = metric.function.as_str();
    let resolution = metric.resolution.as_str();
    let width = metric.width.to_string();
    let questions: Vec<i64> = metric.sources.questions.iter().map(|q| q.0).collect();
    let children: Vec<i64> = metric.sources.child_metrics.iter().map(|m| m.0).collect();

    let updated = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let n = tx.execute(
          "UPDATE metrics SET name = ?1, function = ?2, resolution = ?3, width = ?4
           WHERE metric_id = ?5",
          rusqlite::params![name, function, resolution, width, metric_id.0],
        )?;
        if n == 0 {
          return Ok(false);
        }
        write_sources(&tx, metric_id.0, &questions, &children)?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    if updated { Ok(()) } else { Err(Error::MetricNotFound(metric_id)) }
  }

  async fn load_alert(&self, alert_id: AlertId) -> Result<Option<Alert>> {
    let raw: Option<RawAlert> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE alert_id = ?1"),
            rusqlite::params![alert_id.0],
            raw_alert,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawAlert::into_alert).transpose()
  }

  async fn alerts_for_metric(&self, metric_id: MetricId) -> Result<Vec<Alert>> {
    let raws: Vec<RawAlert> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ALERT_COLUMNS} FROM alerts WHERE metric_id = ?1 ORDER BY alert_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![metric_id.0], raw_alert)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAlert::into_alert).collect()
  }

  async fn create_alert(&self, input: NewAlert) -> Result<Alert> {
    let metric_id = input.metric_id.0;
    let name = input.name.clone();
    let threshold = input.threshold;
    let direction = input.direction.as_str();
    let delay = input.delay;
    let enabled = input.enabled;

    let alert_id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO alerts (metric_id, name, threshold, direction, delay, enabled)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![metric_id, name, threshold, direction, delay, enabled],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(Alert {
      alert_id:  AlertId(alert_id),
      metric_id: input.metric_id,
      name:      input.name,
      threshold: input.threshold,
      direction: input.direction,
      delay:     input.delay,
      enabled:   input.enabled,
    })
  }

  async fn update_alert<'a>(&'a self, alert: &'a Alert) -> Result<()> {
    let alert = alert.clone();
    let alert_id = alert.alert_id;

    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE alerts
           SET metric_id = ?1, name = ?2, threshold = ?3, direction = ?4, delay = ?5, enabled = ?6
           WHERE alert_id = ?7",
          rusqlite::params![
            alert.metric_id.0,
            alert.name,
            alert.threshold,
            alert.direction.as_str(),
            alert.delay,
            alert.enabled,
            alert.alert_id.0,
          ],
        )?)
      })
      .await?;

    if n == 0 { Err(Error::AlertNotFound(alert_id)) } else { Ok(()) }
  }

  // ── Series cache ──────────────────────────────────────────────────────────

  async fn load_series_cache(&self, metric_id: MetricId) -> Result<Option<SeriesCache>> {
    let raw: Option<RawSeriesCache> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT metric_id, series_json, computed_at
             FROM metric_series_caches WHERE metric_id = ?1",
            rusqlite::params![metric_id.0],
            |row| {
              Ok(RawSeriesCache {
                metric_id:   row.get(0)?,
                series_json: row.get(1)?,
                computed_at: row.get(2)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawSeriesCache::into_cache).transpose()
  }

  async fn upsert_series_cache<'a>(&'a self, cache: &'a SeriesCache) -> Result<()> {
    if cache
      .series
      .iter()
      .any(|point| point.value.is_some_and(|v| !v.is_finite()))
    {
      return Err(Error::NonFiniteSeries(cache.metric_id));
    }
    let metric_id = cache.metric_id.0;
    let series_json = serde_json::to_string(&cache.series)?;
    let computed_at = encode_dt(cache.computed_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO metric_series_caches (metric_id, series_json, computed_at)
           VALUES (?1, ?2, ?3)
           ON CONFLICT (metric_id) DO UPDATE
             SET series_json = excluded.series_json, computed_at = excluded.computed_at",
          rusqlite::params![metric_id, series_json, computed_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn delete_series_cache(&self, metric_id: MetricId) -> Result<bool> {
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM metric_series_caches WHERE metric_id = ?1",
          rusqlite::params![metric_id.0],
        )?)
      })
      .await?;
    Ok(n > 0)
  }

  // ── Alert status cache ────────────────────────────────────────────────────

  async fn load_alert_status_cache(&self, alert_id: AlertId) -> Result<Option<AlertStatusCache>> {
    let raw: Option<RawAlertStatusCache> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT alert_id, is_activated, computed_at
             FROM alert_status_caches WHERE alert_id = ?1",
            rusqlite::params![alert_id.0],
            |row| {
              Ok(RawAlertStatusCache {
                alert_id:     row.get(0)?,
                is_activated: row.get(1)?,
                computed_at:  row.get(2)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawAlertStatusCache::into_cache).transpose()
  }

  async fn upsert_alert_status_cache(&self, cache: AlertStatusCache) -> Result<()> {
    let computed_at = encode_dt(cache.computed_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO alert_status_caches (alert_id, is_activated, computed_at)
           VALUES (?1, ?2, ?3)
           ON CONFLICT (alert_id) DO UPDATE
             SET is_activated = excluded.is_activated, computed_at = excluded.computed_at",
          rusqlite::params![cache.alert_id.0, cache.is_activated, computed_at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn delete_alert_status_cache(&self, alert_id: AlertId) -> Result<bool> {
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM alert_status_caches WHERE alert_id = ?1",
          rusqlite::params![alert_id.0],
        )?)
      })
      .await?;
    Ok(n > 0)
  }
}
