//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::json;
use tether_core::ErrorKind;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  /// Missing, unknown or expired bearer session.
  #[error("unauthorized")]
  Unauthorized,

  #[error(transparent)]
  Core(#[from] tether_core::Error),
}

fn kind_label(kind: ErrorKind) -> &'static str {
  match kind {
    ErrorKind::NotConfigured => "not_configured",
    ErrorKind::BadProviderResponse => "bad_provider_response",
    ErrorKind::Conflict => "conflict",
    ErrorKind::NotFound => "not_found",
    ErrorKind::Forbidden => "forbidden",
    ErrorKind::InvalidInput => "invalid_input",
    ErrorKind::Unauthorized => "provider_unauthorized",
    ErrorKind::Upstream => "upstream",
    ErrorKind::Internal => "internal",
  }
}

fn kind_status(kind: ErrorKind) -> StatusCode {
  match kind {
    ErrorKind::NotConfigured | ErrorKind::NotFound => StatusCode::NOT_FOUND,
    ErrorKind::BadProviderResponse | ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
    ErrorKind::Conflict => StatusCode::CONFLICT,
    ErrorKind::Forbidden => StatusCode::FORBIDDEN,
    ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
    // The caller's session is fine; the provider refused the linked grant.
    ErrorKind::Unauthorized => StatusCode::FAILED_DEPENDENCY,
    ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    match self {
      ApiError::Unauthorized => {
        let mut res = (
          StatusCode::UNAUTHORIZED,
          Json(json!({ "error": "unauthorized", "kind": "unauthorized" })),
        )
          .into_response();
        res
          .headers_mut()
          .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        res
      }
      ApiError::Core(err) => {
        let kind = err.kind();
        let status = kind_status(kind);
        // Upstream and internal causes may carry provider bodies or database
        // details; log them and echo only the category.
        let message = match kind {
          ErrorKind::Upstream => {
            tracing::warn!(component = "api", error = %err, "upstream failure");
            "upstream provider call failed".to_owned()
          }
          ErrorKind::Internal => {
            tracing::error!(component = "api", error = %err, "internal error");
            "internal error".to_owned()
          }
          _ => err.to_string(),
        };
        (status, Json(json!({ "error": message, "kind": kind_label(kind) }))).into_response()
      }
    }
  }
}
