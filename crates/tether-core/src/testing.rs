//! Scripted collaborators for tests.
//!
//! Compiled for this crate's own tests and, through the `testing` feature,
//! for downstream crates' tests.

use std::{
  collections::VecDeque,
  sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::{
  http::{HttpRequest, HttpResponse, HttpTransport, TransportError},
  identity::{Identity, TokenExchange, TokenSet},
  provider::{
    AuthorizationRequest, AuthorizationResponse, ExchangeParams, OAuthProvider,
    ProviderError,
  },
};

pub fn at(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).unwrap() }

pub fn identity_for(user_id: Uuid, expires_at: Option<DateTime<Utc>>) -> Identity {
  Identity::new(
    user_id,
    "zoom",
    "u1",
    TokenSet {
      access_token:  "old-access".into(),
      refresh_token: Some("refresh-123".into()),
      scopes:        vec!["email".into()],
      expires_at,
    },
    at(0),
  )
}

// ─── Provider ────────────────────────────────────────────────────────────────

pub struct MockProvider {
  name:           String,
  exchanges:      Mutex<VecDeque<Result<TokenExchange, ProviderError>>>,
  refreshes:      Mutex<VecDeque<Result<TokenSet, ProviderError>>>,
  exchange_calls: AtomicUsize,
  refresh_calls:  AtomicUsize,
}

impl MockProvider {
  pub fn new(name: &str) -> Self {
    Self {
      name:           name.to_owned(),
      exchanges:      Mutex::new(VecDeque::new()),
      refreshes:      Mutex::new(VecDeque::new()),
      exchange_calls: AtomicUsize::new(0),
      refresh_calls:  AtomicUsize::new(0),
    }
  }

  pub fn push_exchange(&self, result: Result<TokenExchange, ProviderError>) {
    self.exchanges.lock().unwrap().push_back(result);
  }

  pub fn push_refresh(&self, result: Result<TokenSet, ProviderError>) {
    self.refreshes.lock().unwrap().push_back(result);
  }

  pub fn exchange_calls(&self) -> usize { self.exchange_calls.load(Ordering::SeqCst) }

  pub fn refresh_calls(&self) -> usize { self.refresh_calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl OAuthProvider for MockProvider {
  fn name(&self) -> &str { &self.name }

  fn authorization_url(
    &self,
    request: &AuthorizationRequest,
  ) -> Result<AuthorizationResponse, ProviderError> {
    let state = request.state.clone().unwrap_or_else(|| "generated".into());
    Ok(AuthorizationResponse {
      url: format!("https://auth.example.com/authorize?client_id=test&state={state}"),
      state,
    })
  }

  async fn exchange(
    &self,
    _code: &str,
    _params: &ExchangeParams,
  ) -> Result<TokenExchange, ProviderError> {
    self.exchange_calls.fetch_add(1, Ordering::SeqCst);
    self
      .exchanges
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or(Err(ProviderError::Status { status: 400, body: "invalid_grant".into() }))
  }

  async fn refresh(&self, _identity: &Identity) -> Result<TokenSet, ProviderError> {
    let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    self.refreshes.lock().unwrap().pop_front().unwrap_or_else(|| {
      Ok(TokenSet {
        access_token: format!("refreshed-{n}"),
        ..TokenSet::default()
      })
    })
  }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Answers each request with the next scripted status (200 once exhausted).
pub struct MockTransport {
  statuses: Mutex<VecDeque<Result<u16, TransportError>>>,
  sent:     Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
  pub fn new(statuses: &[u16]) -> Self {
    Self {
      statuses: Mutex::new(statuses.iter().copied().map(Ok).collect()),
      sent:     Mutex::new(Vec::new()),
    }
  }

  /// The next request times out instead of receiving a response.
  pub fn fail_next_with_timeout(&self) {
    self.statuses.lock().unwrap().push_front(Err(TransportError::Timeout));
  }

  pub fn sent(&self) -> Vec<HttpRequest> { self.sent.lock().unwrap().clone() }

  pub fn calls(&self) -> usize { self.sent.lock().unwrap().len() }
}

#[async_trait]
impl HttpTransport for MockTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    self.sent.lock().unwrap().push(request);
    let status = self.statuses.lock().unwrap().pop_front().unwrap_or(Ok(200))?;
    Ok(HttpResponse {
      status,
      headers: vec![("content-type".into(), "application/json".into())],
      body: format!("{{\"status\":{status}}}"),
    })
  }
}
