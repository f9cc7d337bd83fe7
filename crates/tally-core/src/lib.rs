//! Core types and evaluation engine for the Tally metric store.
//!
//! Questions and answers are leaf data owned by a storage backend. Metrics
//! derive bucketed time series from them, either directly or by aggregating
//! other metrics; alerts watch a metric's trailing values. This crate holds the
//! pure computation (bucketing, materialization, alert rules), the dependency
//! graph, and the cache-aware [`engine::Engine`] that ties them to any
//! [`store::MetricStore`] backend.
//!
//! This crate is free of database dependencies.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

/// Declare a copyable integer identifier. Backends assign the values; they are
/// stable for the lifetime of the row and double as graph node keys.
macro_rules! id_type {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(
      Debug,
      Clone,
      Copy,
      PartialEq,
      Eq,
      PartialOrd,
      Ord,
      Hash,
      serde::Serialize,
      serde::Deserialize,
    )]
    #[serde(transparent)]
    pub struct $name(pub i64);

    impl std::fmt::Display for $name {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
      }
    }
  };
}

pub mod alert;
pub mod bucket;
pub mod engine;
pub mod error;
pub mod graph;
pub mod leaf;
pub mod materialize;
pub mod metric;
pub mod series;
pub mod settings;
pub mod store;
pub mod width;

pub use error::{ConfigurationError, Error, Result};
