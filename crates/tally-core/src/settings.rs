//! Engine settings, deserialised from the binary's configuration file.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::ConfigurationError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
  /// Offset of "local" time from UTC, in minutes east. Day, week and month
  /// buckets start at local midnight.
  #[serde(default)]
  pub utc_offset_minutes: i32,
}

impl EngineSettings {
  pub fn offset(&self) -> Result<FixedOffset, ConfigurationError> {
    self
      .utc_offset_minutes
      .checked_mul(60)
      .and_then(FixedOffset::east_opt)
      .ok_or(ConfigurationError::InvalidOffset(self.utc_offset_minutes))
  }
}
