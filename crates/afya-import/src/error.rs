//! Error type for `afya-import`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("failed to read workbook: {0}")]
  Workbook(#[from] calamine::Error),

  /// A storage-backend failure during batch application. Boxed so the
  /// driver stays generic over [`afya_core::store::HmisStore`]
  /// implementations.
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
