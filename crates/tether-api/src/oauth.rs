//! Handlers for `/oauth/{provider}/...` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/oauth/{provider}/authorize` | `?state&redirect_uri&scope&code_challenge`, all optional |
//! | `POST` | `/oauth/{provider}/exchange` | Body: [`ExchangeBody`]; signs the owning user in |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::{HeaderMap, header},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_core::{
  provider::{AuthorizationRequest, AuthorizationResponse, ExchangeParams},
  user::{RequestMetadata, User},
};

use crate::{AppState, Store, error::ApiError, identities::IdentitySummary};

// ─── Authorize ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeQuery {
  pub state:          Option<String>,
  pub redirect_uri:   Option<String>,
  /// Space-separated extra scopes.
  pub scope:          Option<String>,
  pub code_challenge: Option<String>,
}

impl From<AuthorizeQuery> for AuthorizationRequest {
  fn from(q: AuthorizeQuery) -> Self {
    AuthorizationRequest {
      state:          q.state,
      redirect_uri:   q.redirect_uri,
      scopes:         q
        .scope
        .as_deref()
        .map(|s| s.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default(),
      code_challenge: q.code_challenge,
    }
  }
}

/// `GET /oauth/{provider}/authorize`
pub async fn authorize<S: Store>(
  State(state): State<AppState<S>>,
  Path(provider): Path<String>,
  Query(query): Query<AuthorizeQuery>,
) -> Result<Json<AuthorizationResponse>, ApiError> {
  let response = state
    .exchange
    .providers()
    .authorize(&provider, &AuthorizationRequest::from(query))?;
  Ok(Json(response))
}

// ─── Exchange ─────────────────────────────────────────────────────────────────

/// JSON body accepted by `POST /oauth/{provider}/exchange`.
#[derive(Debug, Deserialize)]
pub struct ExchangeBody {
  pub code:          String,
  pub redirect_uri:  Option<String>,
  pub code_verifier: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
  /// Bearer token for the new session. Shown exactly once.
  pub token:      String,
  pub expires_at: DateTime<Utc>,
  pub user:       User,
  pub identity:   IdentitySummary,
}

/// Client details for the session record. Honours the first hop of
/// `X-Forwarded-For` when a proxy sets it.
fn request_metadata(headers: &HeaderMap) -> RequestMetadata {
  let header_str = |name: &str| {
    headers
      .get(name)
      .and_then(|v| v.to_str().ok())
      .map(str::trim)
      .filter(|v| !v.is_empty())
  };
  let ip = header_str("x-forwarded-for")
    .and_then(|v| v.split(',').next())
    .map(str::trim)
    .or_else(|| header_str("x-real-ip"))
    .map(str::to_owned);
  let user_agent = headers
    .get(header::USER_AGENT)
    .and_then(|v| v.to_str().ok())
    .map(str::to_owned);
  RequestMetadata { ip, user_agent }
}

/// `POST /oauth/{provider}/exchange`
pub async fn exchange<S: Store>(
  State(state): State<AppState<S>>,
  Path(provider): Path<String>,
  headers: HeaderMap,
  Json(body): Json<ExchangeBody>,
) -> Result<Json<ExchangeResponse>, ApiError> {
  let params = ExchangeParams {
    redirect_uri:  body.redirect_uri,
    code_verifier: body.code_verifier,
  };
  let (login, identity) = state
    .exchange
    .exchange(&provider, &body.code, &params, request_metadata(&headers))
    .await?;

  Ok(Json(ExchangeResponse {
    token:      login.token,
    expires_at: login.session.expires_at,
    user:       login.user,
    identity:   IdentitySummary::from(&identity),
  }))
}

#[cfg(test)]
mod tests {
  use axum::http::HeaderValue;

  use super::*;

  #[test]
  fn metadata_prefers_forwarded_for() {
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
    headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
    headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.5"));

    let meta = request_metadata(&headers);
    assert_eq!(meta.ip.as_deref(), Some("203.0.113.7"));
    assert_eq!(meta.user_agent.as_deref(), Some("curl/8.5"));
  }

  #[test]
  fn metadata_is_empty_without_headers() {
    assert_eq!(request_metadata(&HeaderMap::new()), RequestMetadata::default());
  }

  #[test]
  fn scope_query_splits_on_whitespace() {
    let req = AuthorizationRequest::from(AuthorizeQuery {
      scope: Some("meeting:write  user:read".into()),
      ..AuthorizeQuery::default()
    });
    assert_eq!(req.scopes, vec!["meeting:write", "user:read"]);
  }
}
