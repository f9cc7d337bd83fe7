//! SQLite backend for the Tally metric store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Besides the
//! [`MetricStore`](tally_core::store::MetricStore) implementation the engine
//! reads through, [`SqliteStore`] owns the write side of the leaf data:
//! questions, responses and answers.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
