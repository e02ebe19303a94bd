//! Error types for `tether-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::{http::TransportError, provider::ProviderError, store::StoreError};

#[derive(Debug, Error)]
pub enum Error {
  #[error("provider not configured: {0:?}")]
  ProviderNotConfigured(String),

  #[error("{provider} returned a profile without a subject")]
  EmptyProfile { provider: String },

  #[error("{provider} returned a profile without an email address")]
  EmailMissing { provider: String },

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("identity {0} is not owned by the caller")]
  IdentityNotOwned(Uuid),

  #[error("identity belongs to {actual:?}, action requires {expected:?}")]
  IdentityProviderMismatch { expected: String, actual: String },

  #[error("invalid parameter `{field}`: {reason}")]
  InvalidParameter { field: &'static str, reason: String },

  #[error("{provider} rejected the call even after a forced token refresh")]
  UnauthorizedAfterRefresh { provider: String, identity_id: Uuid },

  #[error("{provider} {action} failed with HTTP {status}")]
  ActionFailed {
    provider: String,
    action:   &'static str,
    status:   u16,
  },

  #[error("{provider} {operation} failed: {source}")]
  Provider {
    provider:  String,
    operation: &'static str,
    #[source]
    source:    ProviderError,
  },

  #[error("{provider} {action} call failed: {source}")]
  Transport {
    provider: String,
    action:   &'static str,
    #[source]
    source:   TransportError,
  },

  #[error("failed to encode request body: {0}")]
  Encode(#[from] serde_json::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<StoreError> for Error {
  fn from(err: StoreError) -> Self {
    match err {
      StoreError::Conflict(what) => Error::Conflict(what),
      StoreError::NotFound(what) => Error::NotFound(what),
      StoreError::Backend(source) => Error::Store(source),
    }
  }
}

/// The small, stable set of failure categories callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  NotConfigured,
  BadProviderResponse,
  Conflict,
  NotFound,
  Forbidden,
  InvalidInput,
  Unauthorized,
  Upstream,
  Internal,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::ProviderNotConfigured(_) => ErrorKind::NotConfigured,
      Error::EmptyProfile { .. } | Error::EmailMissing { .. } => {
        ErrorKind::BadProviderResponse
      }
      Error::Conflict(_) => ErrorKind::Conflict,
      Error::NotFound(_) => ErrorKind::NotFound,
      Error::IdentityNotOwned(_) => ErrorKind::Forbidden,
      Error::IdentityProviderMismatch { .. } | Error::InvalidParameter { .. } => {
        ErrorKind::InvalidInput
      }
      Error::UnauthorizedAfterRefresh { .. } => ErrorKind::Unauthorized,
      Error::ActionFailed { .. } | Error::Provider { .. } | Error::Transport { .. } => {
        ErrorKind::Upstream
      }
      Error::Encode(_) | Error::Store(_) => ErrorKind::Internal,
    }
  }

  /// Shorthand for [`Error::InvalidParameter`].
  pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
    Error::InvalidParameter { field, reason: reason.into() }
  }
}
