//! Bearer-session extractor and standalone verifier.

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use chrono::{DateTime, Utc};
use tether_core::{store::SessionStore, user::Session};
use uuid::Uuid;

use crate::{AppState, Store, error::ApiError};

/// The signed-in caller. Present in a handler means the request carried a
/// live session token.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser {
  pub user_id:    Uuid,
  pub session_id: Uuid,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
  let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
  let (scheme, token) = value.split_once(' ')?;
  let token = token.trim();
  (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolve the bearer token in `headers` to a session that is live at `now`.
pub async fn verify_session<S: SessionStore>(
  headers: &HeaderMap,
  store: &S,
  now: DateTime<Utc>,
) -> Result<Session, ApiError> {
  let token = bearer_token(headers).ok_or(ApiError::Unauthorized)?;
  let session = store
    .find_session_by_token(token)
    .await
    .map_err(tether_core::Error::from)?
    .ok_or(ApiError::Unauthorized)?;

  if session.expires_at <= now {
    tracing::debug!(session_id = %session.id, "rejected expired session");
    return Err(ApiError::Unauthorized);
  }
  Ok(session)
}

impl<S: Store> FromRequestParts<AppState<S>> for CurrentUser {
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    let session = verify_session(&parts.headers, state.store.as_ref(), state.clock.now()).await?;
    Ok(CurrentUser { user_id: session.user_id, session_id: session.id })
  }
}
