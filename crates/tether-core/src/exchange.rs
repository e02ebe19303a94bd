//! OAuth Exchange Orchestrator.
//!
//! Turns an authorization code into a linked identity and a signed-in session:
//!
//! 1. resolve the provider and exchange the code;
//! 2. reject profiles without a subject;
//! 3. rotate tokens on an existing `(provider, subject)` identity, or resolve
//!    the owning user by email and create a new identity;
//! 4. issue a session and stamp the user's last login.
//!
//! Identity-creation races surface as [`Error::Conflict`]; user-creation races
//! recover by re-reading the user that won.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
  Error, Result,
  clock::Clock,
  identity::{Identity, Profile, normalize_provider},
  provider::{ExchangeParams, ProviderRegistry},
  store::{IdentityStore, SessionStore, StoreError, UserStore},
  user::{LoginResult, NewSession, RequestMetadata, User, UserStatus},
};

/// Default lifetime, in seconds, of a session issued by a successful exchange.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;

pub struct ExchangeService<S> {
  store:       Arc<S>,
  providers:   Arc<ProviderRegistry>,
  clock:       Arc<dyn Clock>,
  session_ttl: Duration,
}

impl<S> ExchangeService<S>
where
  S: IdentityStore + UserStore + SessionStore,
{
  pub fn new(store: Arc<S>, providers: Arc<ProviderRegistry>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      providers,
      clock,
      session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
    }
  }

  pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
    self.session_ttl = ttl;
    self
  }

  pub fn providers(&self) -> &ProviderRegistry { &self.providers }

  /// Exchange `code` with `provider_name` and sign the owning user in.
  pub async fn exchange(
    &self,
    provider_name: &str,
    code: &str,
    params: &ExchangeParams,
    metadata: RequestMetadata,
  ) -> Result<(LoginResult, Identity)> {
    let provider_name = normalize_provider(provider_name);
    let provider = self.providers.get(&provider_name)?;
    if code.trim().is_empty() {
      return Err(Error::invalid("code", "must not be empty"));
    }

    let grant = provider
      .exchange(code.trim(), params)
      .await
      .map_err(|source| Error::Provider {
        provider: provider_name.clone(),
        operation: "exchange",
        source,
      })?;

    if grant.profile.is_empty() {
      return Err(Error::EmptyProfile { provider: provider_name });
    }
    let profile = grant.profile;
    let subject = profile.subject.trim();
    let now = self.clock.now();

    let existing = self
      .store
      .find_identity_by_subject(&provider_name, subject)
      .await?;

    let (identity, user) = match existing {
      Some(mut identity) => {
        let user = self
          .store
          .find_user(identity.user_id)
          .await?
          .ok_or_else(|| Error::NotFound(format!("user {}", identity.user_id)))?;
        identity.absorb(grant.tokens, now);
        let identity = self.store.update_identity(identity).await?;
        tracing::debug!(
          component = "exchange",
          provider = %provider_name,
          identity_id = %identity.id,
          "rotated tokens on existing identity"
        );
        (identity, user)
      }
      None => {
        let user = self.resolve_or_create_user(&provider_name, &profile, now).await?;
        let identity = Identity::new(user.id, &provider_name, subject, grant.tokens, now);
        // A concurrent exchange for the same account may have won the race;
        // the store's uniqueness check reports it as a conflict.
        let identity = self.store.create_identity(identity).await?;
        tracing::info!(
          component = "exchange",
          provider = %provider_name,
          user_id = %user.id,
          identity_id = %identity.id,
          "linked new identity"
        );
        (identity, user)
      }
    };

    let issued = self
      .store
      .issue_session(NewSession {
        user_id: user.id,
        issued_at: now,
        expires_at: now + self.session_ttl,
        metadata,
      })
      .await?;

    let user = self.stamp_login(user, now).await;

    Ok((
      LoginResult {
        user,
        session: issued.session,
        token: issued.token,
      },
      identity,
    ))
  }

  /// All identities linked to `user_id`.
  pub async fn list_identities(&self, user_id: Uuid) -> Result<Vec<Identity>> {
    Ok(self.store.list_identities(user_id).await?)
  }

  async fn resolve_or_create_user(
    &self,
    provider: &str,
    profile: &Profile,
    now: DateTime<Utc>,
  ) -> Result<User> {
    let email = profile.normalized_email();
    if email.is_empty() {
      return Err(Error::EmailMissing { provider: provider.to_owned() });
    }

    if let Some(mut user) = self.store.find_user_by_email(&email).await? {
      if !user.is_active() {
        user.status = UserStatus::Active;
        user.updated_at = now;
        user = self.store.update_user(user).await?;
        tracing::info!(component = "exchange", user_id = %user.id, "activated pending user");
      }
      return Ok(user);
    }

    let candidate = User::new_active(&email, profile.display_name.clone(), now);
    match self.store.create_user(candidate).await {
      Ok(user) => Ok(user),
      Err(StoreError::Conflict(_)) => self
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| Error::Conflict(format!("user {email} vanished after conflict"))),
      Err(err) => Err(err.into()),
    }
  }

  /// Record the login on the user. A failed write is logged and ignored.
  async fn stamp_login(&self, mut user: User, now: DateTime<Utc>) -> User {
    user.last_login_at = Some(now);
    user.updated_at = now;
    match self.store.update_user(user.clone()).await {
      Ok(stored) => stored,
      Err(err) => {
        tracing::warn!(
          component = "exchange",
          user_id = %user.id,
          error = %err,
          "failed to stamp last login"
        );
        user
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use super::*;
  use crate::{
    clock::ManualClock,
    identity::{TokenExchange, TokenSet},
    memory::MemoryStore,
    provider::ProviderError,
    testing::{MockProvider, at, identity_for},
  };

  struct Fixture {
    store:    Arc<MemoryStore>,
    provider: Arc<MockProvider>,
    service:  ExchangeService<MemoryStore>,
  }

  fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockProvider::new("zoom"));
    let registry = Arc::new(ProviderRegistry::new().with(provider.clone()));
    let clock = Arc::new(ManualClock::new(at(1_000)));
    Fixture {
      service: ExchangeService::new(store.clone(), registry, clock),
      store,
      provider,
    }
  }

  fn grant(access: &str, refresh: Option<&str>, scopes: &[&str], email: &str) -> TokenExchange {
    TokenExchange {
      tokens:  TokenSet {
        access_token:  access.into(),
        refresh_token: refresh.map(Into::into),
        scopes:        scopes.iter().map(|s| s.to_string()).collect(),
        expires_at:    Some(at(1_000 + 3_600)),
      },
      profile: Profile {
        provider:     "zoom".into(),
        subject:      "u1".into(),
        email:        email.into(),
        display_name: Some("Test User".into()),
      },
    }
  }

  async fn exchange(f: &Fixture, provider: &str) -> Result<(LoginResult, Identity)> {
    f.service
      .exchange(provider, "code-1", &ExchangeParams::default(), RequestMetadata::default())
      .await
  }

  #[tokio::test]
  async fn first_exchange_creates_active_user_and_identity() {
    let f = fixture();
    f.provider.push_exchange(Ok(grant(
      "access-123",
      Some("refresh-123"),
      &["email", "profile"],
      "user@example.com",
    )));

    let (login, identity) = exchange(&f, "zoom").await.unwrap();

    assert_eq!(login.user.email, "user@example.com");
    assert_eq!(login.user.status, UserStatus::Active);
    assert_eq!(login.user.last_login_at, Some(at(1_000)));
    assert_eq!(login.session.user_id, login.user.id);
    assert_eq!(login.session.expires_at, at(1_000 + DEFAULT_SESSION_TTL_SECS));
    assert!(!login.token.is_empty());

    assert_eq!(identity.user_id, login.user.id);
    assert_eq!(identity.provider, "zoom");
    assert_eq!(identity.subject, "u1");
    assert_eq!(identity.access_token, "access-123");
    assert_eq!(identity.refresh_token.as_deref(), Some("refresh-123"));
    assert_eq!(
      identity.scopes,
      BTreeSet::from(["email".to_string(), "profile".to_string()])
    );
    assert_eq!(identity.expires_at, Some(at(4_600)));
  }

  #[tokio::test]
  async fn repeat_exchange_rotates_tokens_and_keeps_refresh_token() {
    let f = fixture();
    f.provider
      .push_exchange(Ok(grant("old-access", Some("refresh-123"), &["email"], "user@example.com")));
    f.provider
      .push_exchange(Ok(grant("new-access", None, &["email", "profile"], "user@example.com")));

    let (first_login, first) = exchange(&f, "zoom").await.unwrap();
    let (second_login, second) = exchange(&f, "zoom").await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first_login.user.id, second_login.user.id);
    assert_eq!(second.access_token, "new-access");
    assert_eq!(second.refresh_token.as_deref(), Some("refresh-123"));
    assert_eq!(
      second.scopes,
      BTreeSet::from(["email".to_string(), "profile".to_string()])
    );
    assert_eq!(f.store.identity_count(), 1);
    assert_eq!(f.store.user_count(), 1);
  }

  #[tokio::test]
  async fn identity_without_owner_keeps_its_tokens() {
    let f = fixture();
    let orphan = f
      .store
      .create_identity(identity_for(Uuid::new_v4(), Some(at(500))))
      .await
      .unwrap();
    f.provider
      .push_exchange(Ok(grant("new-access", Some("new-refresh"), &["email"], "user@example.com")));

    let err = exchange(&f, "zoom").await.unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    let stored = f.store.find_identity(orphan.id).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "old-access");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-123"));
    assert_eq!(f.store.user_count(), 0);
  }

  #[tokio::test]
  async fn provider_name_is_normalized() {
    let f = fixture();
    f.provider
      .push_exchange(Ok(grant("a", Some("r"), &[], "user@example.com")));
    let (_, identity) = exchange(&f, "  ZOOM ").await.unwrap();
    assert_eq!(identity.provider, "zoom");
  }

  #[tokio::test]
  async fn unknown_provider_is_rejected_before_any_call() {
    let f = fixture();
    let err = exchange(&f, "github").await.unwrap_err();
    assert!(matches!(err, Error::ProviderNotConfigured(_)));
    assert_eq!(f.provider.exchange_calls(), 0);
  }

  #[tokio::test]
  async fn empty_profile_is_rejected() {
    let f = fixture();
    let mut g = grant("a", None, &[], "user@example.com");
    g.profile.subject = String::new();
    f.provider.push_exchange(Ok(g));

    let err = exchange(&f, "zoom").await.unwrap_err();
    assert!(matches!(err, Error::EmptyProfile { .. }));
    assert_eq!(f.store.identity_count(), 0);
  }

  #[tokio::test]
  async fn missing_email_is_rejected_for_new_identity() {
    let f = fixture();
    f.provider.push_exchange(Ok(grant("a", None, &[], "   ")));
    let err = exchange(&f, "zoom").await.unwrap_err();
    assert!(matches!(err, Error::EmailMissing { .. }));
  }

  #[tokio::test]
  async fn provider_failure_is_wrapped() {
    let f = fixture();
    f.provider.push_exchange(Err(ProviderError::Status {
      status: 401,
      body:   "bad code".into(),
    }));
    let err = exchange(&f, "zoom").await.unwrap_err();
    assert!(matches!(err, Error::Provider { operation: "exchange", .. }));
  }

  #[tokio::test]
  async fn existing_email_links_to_existing_user_and_activates_it() {
    let f = fixture();
    let mut pending = User::new_active("User@Example.com", None, at(0));
    pending.status = UserStatus::Pending;
    let pending = f.store.create_user(pending).await.unwrap();
    f.provider
      .push_exchange(Ok(grant("a", Some("r"), &[], " USER@example.com ")));

    let (login, identity) = exchange(&f, "zoom").await.unwrap();

    assert_eq!(login.user.id, pending.id);
    assert_eq!(login.user.status, UserStatus::Active);
    assert_eq!(identity.user_id, pending.id);
    assert_eq!(f.store.user_count(), 1);
  }

  fn racing(f: &Fixture, store: RacingStore) -> ExchangeService<RacingStore> {
    ExchangeService::new(
      Arc::new(store),
      Arc::new(ProviderRegistry::new().with(f.provider.clone())),
      Arc::new(ManualClock::new(at(1_000))),
    )
  }

  #[tokio::test]
  async fn racing_identity_creation_surfaces_conflict() {
    let f = fixture();
    let other = f
      .store
      .create_user(User::new_active("other@example.com", None, at(0)))
      .await
      .unwrap();
    let service = racing(&f, RacingStore {
      inner:           f.store.clone(),
      identity_winner: Some(Identity::new(other.id, "zoom", "u1", TokenSet::default(), at(0))),
      user_winner:     None,
    });
    f.provider
      .push_exchange(Ok(grant("a", Some("r"), &[], "user@example.com")));

    let err = service
      .exchange("zoom", "code", &ExchangeParams::default(), RequestMetadata::default())
      .await
      .unwrap_err();

    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(f.store.identity_count(), 1);
  }

  #[tokio::test]
  async fn racing_user_creation_reuses_the_winner() {
    let f = fixture();
    let winner = User::new_active("user@example.com", None, at(0));
    let service = racing(&f, RacingStore {
      inner:           f.store.clone(),
      identity_winner: None,
      user_winner:     Some(winner.clone()),
    });
    f.provider
      .push_exchange(Ok(grant("a", Some("r"), &[], "user@example.com")));

    let (login, identity) = service
      .exchange("zoom", "code", &ExchangeParams::default(), RequestMetadata::default())
      .await
      .unwrap();

    assert_eq!(login.user.id, winner.id);
    assert_eq!(identity.user_id, winner.id);
    assert_eq!(f.store.user_count(), 1);
  }

  #[tokio::test]
  async fn list_identities_returns_only_the_users_records() {
    let f = fixture();
    f.provider
      .push_exchange(Ok(grant("a", Some("r"), &[], "user@example.com")));
    let (login, identity) = exchange(&f, "zoom").await.unwrap();

    let listed = f.service.list_identities(login.user.id).await.unwrap();
    assert_eq!(listed, vec![identity]);
    assert!(f.service.list_identities(Uuid::new_v4()).await.unwrap().is_empty());
  }

  /// Delegates to a [`MemoryStore`], inserting the configured winners right
  /// before the service's own create, as a concurrent exchange would.
  struct RacingStore {
    inner:           Arc<MemoryStore>,
    identity_winner: Option<Identity>,
    user_winner:     Option<User>,
  }

  impl IdentityStore for RacingStore {
    async fn create_identity(&self, identity: Identity) -> Result<Identity, StoreError> {
      if let Some(winner) = &self.identity_winner {
        let _ = self.inner.create_identity(winner.clone()).await;
      }
      self.inner.create_identity(identity).await
    }
    async fn update_identity(&self, identity: Identity) -> Result<Identity, StoreError> {
      self.inner.update_identity(identity).await
    }
    async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
      self.inner.find_identity(id).await
    }
    async fn find_identity_by_subject(
      &self,
      provider: &str,
      subject: &str,
    ) -> Result<Option<Identity>, StoreError> {
      self.inner.find_identity_by_subject(provider, subject).await
    }
    async fn list_identities(&self, user_id: Uuid) -> Result<Vec<Identity>, StoreError> {
      self.inner.list_identities(user_id).await
    }
  }

  impl UserStore for RacingStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
      self.inner.find_user_by_email(email).await
    }
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
      self.inner.find_user(id).await
    }
    async fn create_user(&self, user: User) -> Result<User, StoreError> {
      if let Some(winner) = &self.user_winner {
        let _ = self.inner.create_user(winner.clone()).await;
      }
      self.inner.create_user(user).await
    }
    async fn update_user(&self, user: User) -> Result<User, StoreError> {
      self.inner.update_user(user).await
    }
  }

  impl SessionStore for RacingStore {
    async fn issue_session(
      &self,
      session: NewSession,
    ) -> Result<crate::user::IssuedSession, StoreError> {
      self.inner.issue_session(session).await
    }
    async fn find_session_by_token(
      &self,
      token: &str,
    ) -> Result<Option<crate::user::Session>, StoreError> {
      self.inner.find_session_by_token(token).await
    }
  }
}
