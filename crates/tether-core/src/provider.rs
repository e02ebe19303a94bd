//! Provider capabilities and the name-keyed registry that resolves them.
//!
//! Concrete providers (e.g. `tether-zoom`) are registered once at start-up.
//! Looking up an unknown name is a typed error, never a panic.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  Error, Result,
  identity::{Identity, TokenExchange, TokenSet, normalize_provider},
};

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
  #[error("http error: {0}")]
  Http(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("unexpected status {status}: {body}")]
  Status { status: u16, body: String },

  #[error("malformed response: {0}")]
  Decode(String),

  #[error("identity has no refresh token")]
  MissingRefreshToken,
}

// ─── Request/response types ──────────────────────────────────────────────────

/// Parameters for building an authorization URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationRequest {
  /// Opaque CSRF value; generated when absent.
  pub state:          Option<String>,
  /// Overrides the provider's configured redirect URI.
  pub redirect_uri:   Option<String>,
  /// Additional scopes beyond the provider defaults.
  #[serde(default)]
  pub scopes:         Vec<String>,
  /// PKCE S256 challenge.
  pub code_challenge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
  pub url:   String,
  pub state: String,
}

/// Caller-supplied parameters forwarded to the code exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeParams {
  pub redirect_uri:  Option<String>,
  pub code_verifier: Option<String>,
}

// ─── Capability ──────────────────────────────────────────────────────────────

/// A third-party OAuth2 integration.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
  /// Lower-case registry name, e.g. `"zoom"`.
  fn name(&self) -> &str;

  fn authorization_url(
    &self,
    request: &AuthorizationRequest,
  ) -> Result<AuthorizationResponse, ProviderError>;

  /// Trade an authorization code for tokens and the account profile.
  async fn exchange(
    &self,
    code: &str,
    params: &ExchangeParams,
  ) -> Result<TokenExchange, ProviderError>;

  /// Obtain a new access token using the identity's stored refresh token.
  async fn refresh(&self, identity: &Identity) -> Result<TokenSet, ProviderError>;
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Resolves provider names to capabilities.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
  providers: HashMap<String, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
  pub fn new() -> Self { Self::default() }

  /// Register `provider` under its normalised name, replacing any previous
  /// registration for that name.
  pub fn register(&mut self, provider: Arc<dyn OAuthProvider>) {
    let name = normalize_provider(provider.name());
    tracing::debug!(provider = %name, "registered oauth provider");
    self.providers.insert(name, provider);
  }

  pub fn with(mut self, provider: Arc<dyn OAuthProvider>) -> Self {
    self.register(provider);
    self
  }

  /// Look up a provider; `name` is normalised first.
  pub fn get(&self, name: &str) -> Result<Arc<dyn OAuthProvider>> {
    let key = normalize_provider(name);
    self
      .providers
      .get(&key)
      .cloned()
      .ok_or(Error::ProviderNotConfigured(key))
  }

  pub fn names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }

  /// Build the authorization URL for `provider`.
  pub fn authorize(
    &self,
    provider: &str,
    request: &AuthorizationRequest,
  ) -> Result<AuthorizationResponse> {
    let capability = self.get(provider)?;
    capability
      .authorization_url(request)
      .map_err(|source| Error::Provider {
        provider: capability.name().to_owned(),
        operation: "authorize",
        source,
      })
  }
}

impl std::fmt::Debug for ProviderRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProviderRegistry")
      .field("providers", &self.names())
      .finish()
  }
}
