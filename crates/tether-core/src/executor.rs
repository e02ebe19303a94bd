//! Resilient Action Executor.
//!
//! Runs one authenticated call against a provider API on behalf of the owner
//! of a linked identity. An authorization failure (401/403) triggers exactly
//! one forced token refresh and one retry; a second authorization failure is
//! terminal. Any other failure is returned immediately.
//!
//! ```text
//! TokenCached → Attempt1 ─┬─ 2xx ──────────────────────────────── Success
//!                         ├─ other 4xx/5xx ───────────────────── ActionFailed
//!                         └─ 401/403 → ForcedRefresh → Attempt2 ─┬─ 2xx ── Success
//!                                          │                     ├─ 401/403 UnauthorizedAfterRefresh
//!                                          └─ error              └─ other ── ActionFailed
//! ```

use std::{collections::HashMap, sync::Arc, time::Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  clock::Clock,
  freshness::{FreshToken, TokenGuard},
  http::{HttpRequest, HttpResponse, HttpTransport},
  provider::ProviderRegistry,
  store::IdentityStore,
};

/// Forced refreshes allowed per execution.
const FORCED_REFRESH_BUDGET: u8 = 1;

// ─── Action contract ─────────────────────────────────────────────────────────

/// One external side effect for one provider, e.g. "create a Zoom meeting".
pub trait Action: Send + Sync {
  /// Validated, strongly typed form of the caller's parameters.
  type Request: Send + Sync;

  fn name(&self) -> &'static str;

  /// Provider whose identities this action accepts.
  fn provider(&self) -> &'static str;

  /// Validate raw parameters. Each malformed field yields
  /// [`Error::InvalidParameter`].
  fn parse(&self, params: &serde_json::Value) -> Result<Self::Request>;

  /// Build the outbound request for one attempt.
  fn build(&self, request: &Self::Request, access_token: &str) -> Result<HttpRequest>;
}

/// Audit record of the attempt that settled an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
  pub method:           String,
  pub url:              String,
  /// Request headers with credentials redacted.
  pub request_headers:  Vec<(String, String)>,
  pub request_body:     Option<String>,
  pub status:           u16,
  pub response_headers: Vec<(String, String)>,
  pub response_body:    String,
  /// Wall-clock time of the final attempt.
  pub duration_ms:      u64,
  pub attempts:         u8,
}

impl ExecutionRecord {
  fn new(request: &HttpRequest, response: HttpResponse, duration_ms: u64, attempts: u8) -> Self {
    Self {
      method: request.method.clone(),
      url: request.url.clone(),
      request_headers: request.redacted_headers(),
      request_body: request.body.clone(),
      status: response.status,
      response_headers: response.headers,
      response_body: response.body,
      duration_ms,
      attempts,
    }
  }
}

// ─── Executor ────────────────────────────────────────────────────────────────

/// How a settled attempt is handled by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
  Success,
  AuthorizationFailure,
  Failure,
}

impl Outcome {
  fn of(response: &HttpResponse) -> Self {
    if response.is_success() {
      Outcome::Success
    } else if response.is_authorization_failure() {
      Outcome::AuthorizationFailure
    } else {
      Outcome::Failure
    }
  }
}

pub struct Executor<S> {
  store:     Arc<S>,
  guard:     TokenGuard<S>,
  transport: Arc<dyn HttpTransport>,
  clock:     Arc<dyn Clock>,
}

impl<S: IdentityStore> Executor<S> {
  pub fn new(
    store: Arc<S>,
    providers: Arc<ProviderRegistry>,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      guard: TokenGuard::new(Arc::clone(&store), providers),
      store,
      transport,
      clock,
    }
  }

  /// Run `action` with the identity `identity_id` on behalf of `caller`.
  ///
  /// Fails before any network traffic on invalid parameters, an unknown
  /// identity, an identity owned by someone else, or an identity from a
  /// different provider.
  pub async fn execute<A: Action>(
    &self,
    action: &A,
    identity_id: Uuid,
    caller: Uuid,
    params: &serde_json::Value,
  ) -> Result<ExecutionRecord> {
    let request = action.parse(params)?;

    let identity = self
      .store
      .find_identity(identity_id)
      .await?
      .ok_or_else(|| Error::NotFound(format!("identity {identity_id}")))?;
    if identity.user_id != caller {
      return Err(Error::IdentityNotOwned(identity_id));
    }
    if identity.provider != action.provider() {
      return Err(Error::IdentityProviderMismatch {
        expected: action.provider().to_owned(),
        actual:   identity.provider,
      });
    }

    let mut token = self
      .guard
      .ensure_usable_token(identity, self.clock.now(), false)
      .await?;
    let mut refreshes_left = FORCED_REFRESH_BUDGET;
    let mut attempts: u8 = 0;

    loop {
      attempts += 1;
      let (outcome, record) = self.attempt(action, &request, &token, attempts).await?;

      if outcome == Outcome::Success {
        tracing::info!(
          component = "executor",
          provider = %token.identity.provider,
          action = action.name(),
          user_id = %caller,
          identity_id = %identity_id,
          status = record.status,
          attempts,
          "action executed"
        );
        return Ok(record);
      }

      if outcome == Outcome::Failure {
        return Err(Error::ActionFailed {
          provider: token.identity.provider,
          action:   action.name(),
          status:   record.status,
        });
      }

      if refreshes_left == 0 {
        return Err(Error::UnauthorizedAfterRefresh {
          provider: token.identity.provider,
          identity_id,
        });
      }
      refreshes_left -= 1;

      tracing::warn!(
        component = "executor",
        provider = %token.identity.provider,
        action = action.name(),
        identity_id = %identity_id,
        status = record.status,
        "authorization failure, forcing token refresh"
      );
      token = self
        .guard
        .ensure_usable_token(token.identity, self.clock.now(), true)
        .await?;
    }
  }

  async fn attempt<A: Action>(
    &self,
    action: &A,
    request: &A::Request,
    token: &FreshToken,
    attempts: u8,
  ) -> Result<(Outcome, ExecutionRecord)> {
    let outbound = action.build(request, &token.access_token)?;
    let started = Instant::now();
    let response = self
      .transport
      .send(outbound.clone())
      .await
      .map_err(|source| Error::Transport {
        provider: token.identity.provider.clone(),
        action: action.name(),
        source,
      })?;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let outcome = Outcome::of(&response);
    Ok((outcome, ExecutionRecord::new(&outbound, response, duration_ms, attempts)))
  }
}

// ─── Type-erased reactions ───────────────────────────────────────────────────

/// An [`Action`] bound to an executor, callable without knowing its type.
#[async_trait]
pub trait Reaction: Send + Sync {
  fn name(&self) -> &str;
  fn provider(&self) -> &str;
  async fn run(
    &self,
    identity_id: Uuid,
    caller: Uuid,
    params: &serde_json::Value,
  ) -> Result<ExecutionRecord>;
}

pub struct BoundAction<A, S> {
  action:   A,
  executor: Arc<Executor<S>>,
}

impl<A, S> BoundAction<A, S> {
  pub fn new(action: A, executor: Arc<Executor<S>>) -> Self { Self { action, executor } }
}

#[async_trait]
impl<A, S> Reaction for BoundAction<A, S>
where
  A: Action + 'static,
  S: IdentityStore + 'static,
{
  fn name(&self) -> &str { self.action.name() }

  fn provider(&self) -> &str { self.action.provider() }

  async fn run(
    &self,
    identity_id: Uuid,
    caller: Uuid,
    params: &serde_json::Value,
  ) -> Result<ExecutionRecord> {
    self
      .executor
      .execute(&self.action, identity_id, caller, params)
      .await
  }
}

/// Reactions registered by name at start-up.
#[derive(Clone, Default)]
pub struct ReactionTable {
  reactions: HashMap<String, Arc<dyn Reaction>>,
}

impl ReactionTable {
  pub fn new() -> Self { Self::default() }

  pub fn register(&mut self, reaction: Arc<dyn Reaction>) {
    self.reactions.insert(reaction.name().to_owned(), reaction);
  }

  pub fn with(mut self, reaction: Arc<dyn Reaction>) -> Self {
    self.register(reaction);
    self
  }

  pub fn get(&self, name: &str) -> Result<Arc<dyn Reaction>> {
    self
      .reactions
      .get(name)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("action {name:?}")))
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::{
    clock::ManualClock,
    http::TransportError,
    identity::Identity,
    memory::MemoryStore,
    provider::ProviderError,
    testing::{MockProvider, MockTransport, at, identity_for},
  };

  /// Posts a note; `text` must be 1–10 characters.
  struct PostNote;

  impl Action for PostNote {
    type Request = String;

    fn name(&self) -> &'static str { "post_note" }

    fn provider(&self) -> &'static str { "zoom" }

    fn parse(&self, params: &serde_json::Value) -> Result<String> {
      let text = params
        .get("text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::invalid("text", "required"))?;
      if text.is_empty() || text.chars().count() > 10 {
        return Err(Error::invalid("text", "must be 1-10 characters"));
      }
      Ok(text.to_owned())
    }

    fn build(&self, text: &String, access_token: &str) -> Result<HttpRequest> {
      let req = HttpRequest::new("POST", "https://api.example.com/notes")
        .bearer(access_token)
        .json_body(&json!({ "text": text }))?;
      Ok(req)
    }
  }

  struct Fixture {
    store:     Arc<MemoryStore>,
    provider:  Arc<MockProvider>,
    transport: Arc<MockTransport>,
    executor:  Executor<MemoryStore>,
    owner:     Uuid,
    identity:  Identity,
  }

  async fn fixture(statuses: &[u16]) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockProvider::new("zoom"));
    let transport = Arc::new(MockTransport::new(statuses));
    let owner = Uuid::new_v4();
    let identity = store
      .create_identity(identity_for(owner, Some(at(10_000))))
      .await
      .unwrap();
    let executor = Executor::new(
      store.clone(),
      Arc::new(ProviderRegistry::new().with(provider.clone())),
      transport.clone(),
      Arc::new(ManualClock::new(at(5_000))),
    );
    Fixture { store, provider, transport, executor, owner, identity }
  }

  async fn run(f: &Fixture) -> Result<ExecutionRecord> {
    f.executor
      .execute(&PostNote, f.identity.id, f.owner, &json!({ "text": "hello" }))
      .await
  }

  fn bearer(req: &HttpRequest) -> &str {
    req
      .headers
      .iter()
      .find(|(name, _)| name == "Authorization")
      .map(|(_, value)| value.as_str())
      .unwrap()
  }

  #[tokio::test]
  async fn success_on_first_attempt_makes_one_call() {
    let f = fixture(&[201]).await;

    let record = run(&f).await.unwrap();

    assert_eq!(record.status, 201);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.method, "POST");
    assert_eq!(record.url, "https://api.example.com/notes");
    assert_eq!(record.request_body.as_deref(), Some(r#"{"text":"hello"}"#));
    assert!(record.request_headers.contains(&(
      "Authorization".to_string(),
      "Bearer [redacted]".to_string()
    )));
    assert_eq!(f.transport.calls(), 1);
    assert_eq!(f.provider.refresh_calls(), 0);
  }

  #[tokio::test]
  async fn auth_failure_then_success_refreshes_once() {
    let f = fixture(&[401, 201]).await;

    let record = run(&f).await.unwrap();

    assert_eq!(record.status, 201);
    assert_eq!(record.attempts, 2);
    assert_eq!(f.transport.calls(), 2);
    assert_eq!(f.provider.refresh_calls(), 1);

    let sent = f.transport.sent();
    assert_eq!(bearer(&sent[0]), "Bearer old-access");
    assert_eq!(bearer(&sent[1]), "Bearer refreshed-1");

    let stored = f.store.find_identity(f.identity.id).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "refreshed-1");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-123"));
  }

  #[tokio::test]
  async fn forbidden_counts_as_auth_failure() {
    let f = fixture(&[403, 200]).await;
    run(&f).await.unwrap();
    assert_eq!(f.provider.refresh_calls(), 1);
  }

  #[tokio::test]
  async fn repeated_auth_failure_is_terminal() {
    let f = fixture(&[401, 401, 201]).await;

    let err = run(&f).await.unwrap_err();

    assert!(matches!(
      err,
      Error::UnauthorizedAfterRefresh { identity_id, .. } if identity_id == f.identity.id
    ));
    assert_eq!(f.transport.calls(), 2);
    assert_eq!(f.provider.refresh_calls(), 1);
  }

  #[tokio::test]
  async fn server_error_is_not_retried() {
    let f = fixture(&[500]).await;

    let err = run(&f).await.unwrap_err();

    assert!(matches!(err, Error::ActionFailed { status: 500, .. }));
    assert_eq!(f.transport.calls(), 1);
    assert_eq!(f.provider.refresh_calls(), 0);
  }

  #[tokio::test]
  async fn transport_failure_names_provider_and_action() {
    let f = fixture(&[]).await;
    f.transport.fail_next_with_timeout();

    let err = run(&f).await.unwrap_err();

    assert!(matches!(
      err,
      Error::Transport { ref provider, action: "post_note", source: TransportError::Timeout }
        if provider == "zoom"
    ));
    let message = err.to_string();
    assert!(message.contains("zoom"), "{message}");
    assert!(message.contains("post_note"), "{message}");
    assert_eq!(err.kind(), crate::ErrorKind::Upstream);
    assert_eq!(f.transport.calls(), 1);
    assert_eq!(f.provider.refresh_calls(), 0);
  }

  #[tokio::test]
  async fn non_auth_failure_after_refresh_is_not_retried() {
    let f = fixture(&[401, 429]).await;
    let err = run(&f).await.unwrap_err();
    assert!(matches!(err, Error::ActionFailed { status: 429, .. }));
    assert_eq!(f.transport.calls(), 2);
  }

  #[tokio::test]
  async fn failed_forced_refresh_is_terminal() {
    let f = fixture(&[401]).await;
    f.provider.push_refresh(Err(ProviderError::Status {
      status: 400,
      body:   "invalid_grant".into(),
    }));

    let err = run(&f).await.unwrap_err();

    assert!(matches!(err, Error::Provider { operation: "refresh", .. }));
    assert_eq!(f.transport.calls(), 1);
    let stored = f.store.find_identity(f.identity.id).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "old-access");
  }

  #[tokio::test]
  async fn foreign_caller_is_rejected_without_calls() {
    let f = fixture(&[201]).await;

    let err = f
      .executor
      .execute(&PostNote, f.identity.id, Uuid::new_v4(), &json!({ "text": "hello" }))
      .await
      .unwrap_err();

    assert!(matches!(err, Error::IdentityNotOwned(id) if id == f.identity.id));
    assert_eq!(f.transport.calls(), 0);
    assert_eq!(f.provider.refresh_calls(), 0);
  }

  #[tokio::test]
  async fn unknown_identity_is_not_found() {
    let f = fixture(&[201]).await;
    let err = f
      .executor
      .execute(&PostNote, Uuid::new_v4(), f.owner, &json!({ "text": "hello" }))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
  }

  #[tokio::test]
  async fn invalid_params_are_rejected_before_lookup() {
    let f = fixture(&[201]).await;
    let err = f
      .executor
      .execute(&PostNote, f.identity.id, f.owner, &json!({ "text": "far too long" }))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::InvalidParameter { field: "text", .. }));
    assert_eq!(f.transport.calls(), 0);
  }

  #[tokio::test]
  async fn provider_mismatch_is_rejected() {
    let f = fixture(&[201]).await;
    let mut other = identity_for(f.owner, None);
    other.provider = "github".into();
    let other = f.store.create_identity(other).await.unwrap();

    let err = f
      .executor
      .execute(&PostNote, other.id, f.owner, &json!({ "text": "hello" }))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::IdentityProviderMismatch { .. }));
  }

  #[tokio::test]
  async fn expired_token_is_refreshed_before_first_attempt() {
    let f = fixture(&[201]).await;
    let mut expired = f.identity.clone();
    expired.expires_at = Some(at(4_000));
    f.store.update_identity(expired).await.unwrap();

    let record = run(&f).await.unwrap();

    assert_eq!(record.attempts, 1);
    assert_eq!(f.provider.refresh_calls(), 1);
    assert_eq!(bearer(&f.transport.sent()[0]), "Bearer refreshed-1");
  }

  #[tokio::test]
  async fn reaction_table_dispatches_by_name() {
    let f = fixture(&[201]).await;
    let executor = Arc::new(f.executor);
    let table = ReactionTable::new().with(Arc::new(BoundAction::new(PostNote, executor)));

    let reaction = table.get("post_note").unwrap();
    assert_eq!(reaction.provider(), "zoom");
    let record = reaction
      .run(f.identity.id, f.owner, &json!({ "text": "hi" }))
      .await
      .unwrap();
    assert_eq!(record.status, 201);
    assert!(matches!(table.get("missing").err().unwrap(), Error::NotFound(_)));
  }
}
