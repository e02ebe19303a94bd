//! [`ZoomProvider`]: the Zoom implementation of [`OAuthProvider`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, de::DeserializeOwned};
use tether_core::{
  clock::Clock,
  identity::{Identity, Profile, TokenExchange, TokenSet},
  provider::{
    AuthorizationRequest, AuthorizationResponse, ExchangeParams, OAuthProvider,
    ProviderError,
  },
};
use uuid::Uuid;

use crate::{PROVIDER, config::ZoomConfig};

// ─── Wire types ──────────────────────────────────────────────────────────────

/// Zoom's OAuth2 token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
  access_token:  String,
  #[serde(default)]
  refresh_token: Option<String>,
  #[serde(default)]
  expires_in:    Option<i64>,
  /// Space-separated granted scopes.
  #[serde(default)]
  scope:         Option<String>,
}

impl TokenResponse {
  fn into_token_set(self, now: DateTime<Utc>) -> TokenSet {
    TokenSet {
      access_token:  self.access_token,
      refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
      scopes:        self
        .scope
        .as_deref()
        .map(split_scopes)
        .unwrap_or_default(),
      expires_at:    self
        .expires_in
        .filter(|secs| *secs > 0)
        .map(|secs| now + chrono::Duration::seconds(secs)),
    }
  }
}

fn split_scopes(raw: &str) -> Vec<String> {
  raw
    .split(|c: char| c.is_whitespace() || c == ',')
    .filter(|s| !s.is_empty())
    .map(str::to_owned)
    .collect()
}

/// The subset of `GET /users/me` we need.
#[derive(Debug, Deserialize)]
struct ZoomUser {
  id:           String,
  #[serde(default)]
  email:        Option<String>,
  #[serde(default)]
  display_name: Option<String>,
  #[serde(default)]
  first_name:   Option<String>,
  #[serde(default)]
  last_name:    Option<String>,
}

impl ZoomUser {
  fn into_profile(self) -> Profile {
    let display_name = self.display_name.filter(|n| !n.trim().is_empty()).or_else(|| {
      let full = [self.first_name.as_deref(), self.last_name.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
      (!full.trim().is_empty()).then_some(full)
    });
    Profile {
      provider: PROVIDER.to_owned(),
      subject: self.id,
      email: self.email.unwrap_or_default(),
      display_name,
    }
  }
}

// ─── Provider ────────────────────────────────────────────────────────────────

/// Zoom OAuth2 client.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ZoomProvider {
  config: ZoomConfig,
  client: Client,
  clock:  Arc<dyn Clock>,
}

impl ZoomProvider {
  pub fn new(config: ZoomConfig, clock: Arc<dyn Clock>) -> Result<Self, ProviderError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(http_error)?;
    Ok(Self { config, client, clock })
  }

  pub fn config(&self) -> &ZoomConfig { &self.config }

  /// `POST` to the token endpoint with client credentials in Basic auth.
  async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, ProviderError> {
    let resp = self
      .client
      .post(&self.config.token_url)
      .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
      .form(form)
      .send()
      .await
      .map_err(http_error)?;

    let token: TokenResponse = decode(resp).await?;
    Ok(token.into_token_set(self.clock.now()))
  }

  async fn fetch_profile(&self, access_token: &str) -> Result<Profile, ProviderError> {
    let resp = self
      .client
      .get(self.config.api_url("/users/me"))
      .bearer_auth(access_token)
      .send()
      .await
      .map_err(http_error)?;

    let user: ZoomUser = decode(resp).await?;
    Ok(user.into_profile())
  }
}

#[async_trait]
impl OAuthProvider for ZoomProvider {
  fn name(&self) -> &str { PROVIDER }

  fn authorization_url(
    &self,
    request: &AuthorizationRequest,
  ) -> Result<AuthorizationResponse, ProviderError> {
    let state = request
      .state
      .clone()
      .filter(|s| !s.is_empty())
      .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let redirect_uri = request
      .redirect_uri
      .as_deref()
      .unwrap_or(&self.config.redirect_uri);

    let mut scopes: Vec<&str> = self.config.scopes.iter().map(String::as_str).collect();
    scopes.extend(request.scopes.iter().map(String::as_str));
    scopes.sort_unstable();
    scopes.dedup();
    let scope = scopes.join(" ");

    let mut params = vec![
      ("response_type", "code"),
      ("client_id", self.config.client_id.as_str()),
      ("redirect_uri", redirect_uri),
      ("state", state.as_str()),
    ];
    if !scope.is_empty() {
      params.push(("scope", scope.as_str()));
    }
    if let Some(challenge) = request.code_challenge.as_deref() {
      params.push(("code_challenge", challenge));
      params.push(("code_challenge_method", "S256"));
    }

    let url = Url::parse_with_params(&self.config.authorize_url, &params)
      .map_err(|e| ProviderError::Decode(format!("invalid authorize url: {e}")))?;

    Ok(AuthorizationResponse { url: url.into(), state })
  }

  async fn exchange(
    &self,
    code: &str,
    params: &ExchangeParams,
  ) -> Result<TokenExchange, ProviderError> {
    let redirect_uri = params
      .redirect_uri
      .as_deref()
      .unwrap_or(&self.config.redirect_uri);
    let mut form = vec![
      ("grant_type", "authorization_code"),
      ("code", code),
      ("redirect_uri", redirect_uri),
    ];
    if let Some(verifier) = params.code_verifier.as_deref() {
      form.push(("code_verifier", verifier));
    }

    let tokens = self.token_request(&form).await?;
    let profile = self.fetch_profile(&tokens.access_token).await?;
    tracing::debug!(provider = PROVIDER, subject = %profile.subject, "exchanged authorization code");

    Ok(TokenExchange { tokens, profile })
  }

  async fn refresh(&self, identity: &Identity) -> Result<TokenSet, ProviderError> {
    let refresh_token = identity
      .refresh_token
      .as_deref()
      .filter(|t| !t.is_empty())
      .ok_or(ProviderError::MissingRefreshToken)?;

    self
      .token_request(&[
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
      ])
      .await
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn http_error(err: reqwest::Error) -> ProviderError { ProviderError::Http(Box::new(err)) }

/// Decode a JSON body, turning non-2xx responses into [`ProviderError::Status`].
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ProviderError> {
  let status = resp.status();
  if !status.is_success() {
    let body = resp.text().await.unwrap_or_default();
    return Err(ProviderError::Status { status: status.as_u16(), body });
  }
  let bytes = resp.bytes().await.map_err(http_error)?;
  serde_json::from_slice(&bytes).map_err(|e| ProviderError::Decode(e.to_string()))
}
