//! Error type for `afya-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] afya_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("bad decimal value: {0:?}")]
  DecimalParse(String),

  /// A stored period identifier failed to re-parse. Indicates external
  /// tampering with the fact table; never produced by our own writes.
  #[error("bad period identifier in storage: {0:?}")]
  BadStoredPeriod(String),

  #[error("validation rule not found: {0}")]
  RuleNotFound(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
