//! Zoom OAuth application settings, deserialised from the `[zoom]` table of
//! the server configuration.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ZoomConfig {
  pub client_id:     String,
  pub client_secret: String,
  pub redirect_uri:  String,
  #[serde(default = "default_authorize_url")]
  pub authorize_url: String,
  #[serde(default = "default_token_url")]
  pub token_url:     String,
  /// Base for REST calls, without a trailing slash.
  #[serde(default = "default_api_base_url")]
  pub api_base_url:  String,
  /// Requested in addition to any per-request scopes.
  #[serde(default)]
  pub scopes:        Vec<String>,
}

fn default_authorize_url() -> String { "https://zoom.us/oauth/authorize".into() }

fn default_token_url() -> String { "https://zoom.us/oauth/token".into() }

fn default_api_base_url() -> String { "https://api.zoom.us/v2".into() }

impl ZoomConfig {
  /// Point every endpoint at `base`, e.g. a mock server in tests.
  pub fn with_base_url(mut self, base: &str) -> Self {
    let base = base.trim_end_matches('/');
    self.authorize_url = format!("{base}/oauth/authorize");
    self.token_url = format!("{base}/oauth/token");
    self.api_base_url = format!("{base}/v2");
    self
  }

  pub(crate) fn api_url(&self, path: &str) -> String {
    format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
  }
}
