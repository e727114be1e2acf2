//! Error type for `afya-report`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("xlsx serialization failed: {0}")]
  Xlsx(#[from] rust_xlsxwriter::XlsxError),

  #[error("csv serialization failed: {0}")]
  Csv(#[from] csv::Error),

  #[error("csv buffer error: {0}")]
  CsvBuffer(#[from] std::io::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

pub(crate) fn store_err<E>(err: E) -> Error
where
  E: std::error::Error + Send + Sync + 'static,
{
  Error::Store(Box::new(err))
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
