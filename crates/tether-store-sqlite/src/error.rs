//! Error type for `tether-store-sqlite`.

use tether_core::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown user status: {0:?}")]
  UnknownStatus(String),

  #[error("{0} not found")]
  NotFound(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  /// Whether SQLite rejected the write because a UNIQUE or PRIMARY KEY
  /// constraint already holds the value. Other constraint failures (FOREIGN
  /// KEY, NOT NULL, CHECK) are not conflicts.
  pub fn is_unique_violation(&self) -> bool {
    matches!(
      self,
      Error::Database(tokio_rusqlite::Error::Rusqlite(
        rusqlite::Error::SqliteFailure(e, _)
      )) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
  }
}

impl From<Error> for StoreError {
  fn from(err: Error) -> Self {
    if err.is_unique_violation() {
      return StoreError::Conflict(err.to_string());
    }
    match err {
      Error::NotFound(what) => StoreError::NotFound(what),
      other => StoreError::Backend(Box::new(other)),
    }
  }
}
