//! `tally`: command-line front end for a Tally SQLite store.
//!
//! # Usage
//!
//! ```text
//! tally add-question --name weight --kind number
//! tally answer --question 1 --value 72.4
//! tally add-metric --name "weight daily" --function answer --resolution day --width 90_days --question 1
//! tally series 1
//! tally alert 1
//! ```

mod config;

use std::path::PathBuf;

use anyhow::{Context as _, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tally_core::{
  alert::{ActivationProgress, AlertId, AlertStatus, Direction, NewAlert},
  bucket::Resolution,
  engine::Engine,
  leaf::{AnswerId, AnswerValue, NewAnswer, QuestionId, QuestionKind, ResponseId},
  metric::{AggregationFunction, MetricId, NewMetric},
  width::Width,
};
use tally_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::TallyConfig;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tally", version, about = "Self-tracking metrics over a local store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "tally.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Create a question.
  AddQuestion {
    #[arg(long)]
    name: String,
    /// string | number | bool | range
    #[arg(long)]
    kind: QuestionKind,
  },

  /// Record an answer and invalidate every metric reading the question.
  Answer {
    #[arg(long)]
    question: i64,
    /// Parsed according to the question's kind.
    #[arg(long)]
    value:    String,
    /// When the answered event happened; defaults to now.
    #[arg(long)]
    at:       Option<DateTime<Utc>>,
    #[arg(long)]
    response: Option<i64>,
  },

  /// Soft-delete an answer.
  DeleteAnswer { answer: i64 },

  /// Create a metric.
  AddMetric {
    #[arg(long)]
    name:       String,
    /// answer | sum
    #[arg(long)]
    function:   AggregationFunction,
    /// five_minute | hour | day | week | month
    #[arg(long)]
    resolution: Resolution,
    /// `<count>_<unit>`, e.g. `90_days`.
    #[arg(long)]
    width:      Width,
    #[arg(long = "question")]
    questions:  Vec<i64>,
    #[arg(long = "child")]
    children:   Vec<i64>,
  },

  /// Create an alert on a metric.
  AddAlert {
    #[arg(long)]
    metric:    i64,
    #[arg(long)]
    name:      String,
    #[arg(long, allow_negative_numbers = true)]
    threshold: f64,
    /// above | below | at_or_above | at_or_below
    #[arg(long)]
    direction: Direction,
    #[arg(long, default_value_t = 1)]
    delay:     u32,
    #[arg(long)]
    disabled:  bool,
  },

  /// Print a metric's series as JSON.
  Series {
    metric: i64,
    /// Evaluation instant; defaults to now.
    #[arg(long)]
    now:    Option<DateTime<Utc>>,
  },

  /// Print an alert's status and activation progress as JSON.
  Alert {
    alert: i64,
    #[arg(long)]
    now:   Option<DateTime<Utc>>,
  },

  /// Discard every cache depending on a question.
  Invalidate { question: i64 },
}

#[derive(Serialize)]
struct AlertReport {
  alert_id: AlertId,
  status:   AlertStatus,
  #[serde(flatten)]
  progress: ActivationProgress,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let cfg = TallyConfig::load(&cli.config)?;

  let store_path = cfg.store_path();
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  tracing::debug!(path = %store_path.display(), "opened store");
  let engine = Engine::new(store.clone(), cfg.engine.clone()).context("invalid engine settings")?;

  run(cli.command, &store, &engine).await
}

async fn run(command: Command, store: &SqliteStore, engine: &Engine<SqliteStore>) -> anyhow::Result<()> {
  let now = Utc::now();

  match command {
    Command::AddQuestion { name, kind } => {
      let question = store.add_question(name, kind).await?;
      print_json(&question)
    }

    Command::Answer { question, value, at, response } => {
      let question_id = QuestionId(question);
      let kind = store
        .get_question(question_id)
        .await?
        .with_context(|| format!("question {question_id} not found"))?
        .kind;
      let input = NewAnswer {
        question_id,
        response_id: response.map(ResponseId),
        value: parse_value(kind, &value)?,
        occurred_at: at.unwrap_or(now),
      };
      let answer = store.record_answer(input, now).await?;
      engine.on_answer_changed(question_id, now).await?;
      print_json(&answer)
    }

    Command::DeleteAnswer { answer } => {
      let answer = store.soft_delete_answer(AnswerId(answer), now).await?;
      engine.on_answer_changed(answer.question_id, now).await?;
      print_json(&answer)
    }

    Command::AddMetric { name, function, resolution, width, questions, children } => {
      let input = questions.into_iter().map(QuestionId).fold(
        NewMetric::new(name, function, resolution, width),
        NewMetric::with_question,
      );
      let input = children
        .into_iter()
        .map(MetricId)
        .fold(input, NewMetric::with_child);
      let metric = engine.create_metric(input).await?;
      print_json(&metric)
    }

    Command::AddAlert { metric, name, threshold, direction, delay, disabled } => {
      let alert = engine
        .create_alert(NewAlert {
          metric_id: MetricId(metric),
          name,
          threshold,
          direction,
          delay,
          enabled: !disabled,
        })
        .await?;
      print_json(&alert)
    }

    Command::Series { metric, now: at } => {
      let series = engine.series_of(MetricId(metric), at.unwrap_or(now)).await?;
      print_json(&series)
    }

    Command::Alert { alert, now: at } => {
      let alert_id = AlertId(alert);
      let at = at.unwrap_or(now);
      let report = AlertReport {
        alert_id,
        status: engine.alert_status(alert_id, at).await?,
        progress: engine.activation_progress(alert_id, at).await?,
      };
      print_json(&report)
    }

    Command::Invalidate { question } => {
      let invalidation = engine.on_answer_changed(QuestionId(question), now).await?;
      print_json(&invalidation)
    }
  }
}

/// Interpret `raw` as a value of `kind`.
fn parse_value(kind: QuestionKind, raw: &str) -> anyhow::Result<AnswerValue> {
  let number = || {
    let n = raw
      .trim()
      .parse::<f64>()
      .with_context(|| format!("{raw:?} is not a number"))?;
    if !n.is_finite() {
      bail!("{raw:?} is not a finite number");
    }
    Ok::<_, anyhow::Error>(n)
  };
  Ok(match kind {
    QuestionKind::String => AnswerValue::String(raw.to_owned()),
    QuestionKind::Number => AnswerValue::Number(number()?),
    QuestionKind::Range => AnswerValue::Range(number()?),
    QuestionKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
      "true" | "yes" | "1" => AnswerValue::Bool(true),
      "false" | "no" | "0" => AnswerValue::Bool(false),
      other => bail!("{other:?} is not a boolean"),
    },
  })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
