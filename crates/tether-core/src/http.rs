//! Minimal outbound HTTP contract used by reaction executors.
//!
//! Kept independent of any HTTP client so tests can substitute a scripted
//! transport; `tether-zoom` ships the `reqwest` implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("request timed out")]
  Timeout,

  #[error("{0}")]
  Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
  pub method:  String,
  pub url:     String,
  pub headers: Vec<(String, String)>,
  pub body:    Option<String>,
}

impl HttpRequest {
  pub fn new(method: &str, url: impl Into<String>) -> Self {
    Self {
      method:  method.to_ascii_uppercase(),
      url:     url.into(),
      headers: Vec::new(),
      body:    None,
    }
  }

  pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.push((name.to_owned(), value.into()));
    self
  }

  pub fn bearer(self, token: &str) -> Self {
    self.header("Authorization", format!("Bearer {token}"))
  }

  pub fn json_body<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, serde_json::Error> {
    self.body = Some(serde_json::to_string(body)?);
    Ok(self.header("Content-Type", "application/json"))
  }

  /// Headers with credentials masked, suitable for audit records and logs.
  pub fn redacted_headers(&self) -> Vec<(String, String)> {
    self
      .headers
      .iter()
      .map(|(name, value)| {
        if name.eq_ignore_ascii_case("authorization") {
          let scheme = value.split_whitespace().next().unwrap_or_default();
          (name.clone(), format!("{scheme} [redacted]"))
        } else {
          (name.clone(), value.clone())
        }
      })
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
  pub status:  u16,
  pub headers: Vec<(String, String)>,
  pub body:    String,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

  /// 401 and 403 are the only statuses that warrant a forced refresh.
  pub fn is_authorization_failure(&self) -> bool {
    matches!(self.status, 401 | 403)
  }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn redacts_authorization_only() {
    let req = HttpRequest::new("post", "https://api.example.com")
      .bearer("secret-token")
      .header("X-Trace", "abc");

    let headers = req.redacted_headers();
    assert_eq!(req.method, "POST");
    assert_eq!(headers[0].1, "Bearer [redacted]");
    assert_eq!(headers[1].1, "abc");
  }

  #[test]
  fn classifies_statuses() {
    let res = |status| HttpResponse { status, headers: vec![], body: String::new() };
    assert!(res(201).is_success());
    assert!(res(401).is_authorization_failure());
    assert!(res(403).is_authorization_failure());
    assert!(!res(404).is_authorization_failure());
    assert!(!res(500).is_success());
  }
}
