//! Error types for `afya-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A data-element name or alias collides case-insensitively with an
  /// existing element's name or alias.
  #[error("name or alias already in use: {0:?}")]
  NameCollision(String),

  /// A name contains characters that are not admitted into dynamically
  /// generated SQL (quotes, semicolons, control characters).
  #[error("name contains unsafe characters: {0:?}")]
  UnsafeName(String),

  /// An org-unit path with no segments was supplied.
  #[error("org-unit path must have at least one segment")]
  EmptyPath,

  #[error("org unit not found: {0}")]
  OrgUnitNotFound(i64),

  #[error("data element not found: {0:?}")]
  ElementNotFound(String),

  #[error("validation rule not found: {0}")]
  RuleNotFound(i64),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
