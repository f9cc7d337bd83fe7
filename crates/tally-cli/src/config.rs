//! Layered configuration: an optional TOML file overridden by `TALLY_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use tally_core::settings::EngineSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct TallyConfig {
  /// SQLite database file. A leading `~/` is expanded.
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,

  #[serde(default)]
  pub engine: EngineSettings,
}

fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/tally/tally.db") }

impl TallyConfig {
  /// Read `path` if it exists, then apply the environment, e.g.
  /// `TALLY_STORE_PATH` or `TALLY_ENGINE__UTC_OFFSET_MINUTES`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("TALLY")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise TallyConfig")
  }

  pub fn store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
