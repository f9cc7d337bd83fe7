//! SQL schema for the Tally SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Timestamps are fixed-width RFC 3339 UTC strings (nanosecond precision,
/// `Z` suffix), so lexical order is chronological order.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS questions (
    question_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL    -- 'string' | 'number' | 'bool' | 'range'
);

CREATE TABLE IF NOT EXISTS responses (
    response_id INTEGER PRIMARY KEY AUTOINCREMENT,
    occurred_at TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    mutated_at  TEXT NOT NULL,
    deleted     INTEGER NOT NULL DEFAULT 0
);

-- Answers are soft-deleted only; deletion bumps mutated_at.
CREATE TABLE IF NOT EXISTS answers (
    answer_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    question_id INTEGER NOT NULL REFERENCES questions(question_id),
    response_id INTEGER REFERENCES responses(response_id),
    answer_type TEXT NOT NULL,   -- discriminant of AnswerValue
    value_json  TEXT NOT NULL,   -- JSON-encoded AnswerValue
    occurred_at TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    mutated_at  TEXT NOT NULL,
    deleted     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS metrics (
    metric_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    function   TEXT NOT NULL,    -- 'answer' | 'sum'
    resolution TEXT NOT NULL,    -- 'five_minute' | 'hour' | 'day' | 'week' | 'month'
    width      TEXT NOT NULL     -- e.g. '90_days'
);

CREATE TABLE IF NOT EXISTS metric_questions (
    metric_id   INTEGER NOT NULL REFERENCES metrics(metric_id),
    question_id INTEGER NOT NULL REFERENCES questions(question_id),
    PRIMARY KEY (metric_id, question_id)
);

CREATE TABLE IF NOT EXISTS metric_metrics (
    parent_metric_id INTEGER NOT NULL REFERENCES metrics(metric_id),
    child_metric_id  INTEGER NOT NULL REFERENCES metrics(metric_id),
    PRIMARY KEY (parent_metric_id, child_metric_id),
    CHECK (parent_metric_id != child_metric_id)
);

CREATE TABLE IF NOT EXISTS alerts (
    alert_id  INTEGER PRIMARY KEY AUTOINCREMENT,
    metric_id INTEGER NOT NULL REFERENCES metrics(metric_id),
    name      TEXT NOT NULL,
    threshold REAL NOT NULL,
    direction TEXT NOT NULL,     -- 'above' | 'below' | 'at_or_above' | 'at_or_below'
    delay     INTEGER NOT NULL,
    enabled   INTEGER NOT NULL DEFAULT 1,
    CHECK (delay > 0)
);

-- Derived data; any row may be deleted at any time.
CREATE TABLE IF NOT EXISTS metric_series_caches (
    metric_id   INTEGER PRIMARY KEY REFERENCES metrics(metric_id),
    series_json TEXT NOT NULL,
    computed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_status_caches (
    alert_id     INTEGER PRIMARY KEY REFERENCES alerts(alert_id),
    is_activated INTEGER NOT NULL,
    computed_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS answers_question_idx ON answers(question_id, occurred_at);
CREATE INDEX IF NOT EXISTS answers_response_idx ON answers(response_id);
CREATE INDEX IF NOT EXISTS alerts_metric_idx    ON alerts(metric_id);
CREATE INDEX IF NOT EXISTS metric_metrics_child ON metric_metrics(child_metric_id);

PRAGMA user_version = 1;
";
