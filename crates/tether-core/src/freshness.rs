//! Token Freshness Guard: decides whether a cached access token may be used
//! and, when it may not, refreshes it and persists the reconciled record.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
  Error, Result,
  identity::Identity,
  provider::{ProviderError, ProviderRegistry},
  store::IdentityStore,
};

/// A usable access token together with the identity it came from.
#[derive(Debug, Clone)]
pub struct FreshToken {
  pub identity:     Identity,
  pub access_token: String,
  /// `true` when the provider was called to obtain this token.
  pub refreshed:    bool,
}

pub struct TokenGuard<S> {
  store:     Arc<S>,
  providers: Arc<ProviderRegistry>,
}

impl<S> Clone for TokenGuard<S> {
  fn clone(&self) -> Self {
    Self {
      store:     Arc::clone(&self.store),
      providers: Arc::clone(&self.providers),
    }
  }
}

impl<S: IdentityStore> TokenGuard<S> {
  pub fn new(store: Arc<S>, providers: Arc<ProviderRegistry>) -> Self {
    Self { store, providers }
  }

  /// Return a token that may be used at `now`.
  ///
  /// Without `force`, a non-empty token that has no expiry or expires strictly
  /// after `now` is returned as-is: no provider call, no store write. Otherwise
  /// the provider refreshes it, the result is merged with [`Identity::absorb`]
  /// and the merged record is written back as a full-field replace.
  ///
  /// A failed refresh leaves the store untouched.
  pub async fn ensure_usable_token(
    &self,
    identity: Identity,
    now: DateTime<Utc>,
    force: bool,
  ) -> Result<FreshToken> {
    if !force && identity.has_usable_token(now) {
      return Ok(FreshToken {
        access_token: identity.access_token.clone(),
        identity,
        refreshed: false,
      });
    }

    let provider = self.providers.get(&identity.provider)?;
    let provider_error = |source| Error::Provider {
      provider: identity.provider.clone(),
      operation: "refresh",
      source,
    };

    let tokens = provider
      .refresh(&identity)
      .await
      .map_err(provider_error)?;
    if tokens.access_token.is_empty() {
      return Err(provider_error(ProviderError::Decode(
        "refresh response carried no access token".into(),
      )));
    }

    let identity_id = identity.id;
    let provider_name = identity.provider.clone();
    let mut merged = identity;
    merged.absorb(tokens, now);
    let stored = self.store.update_identity(merged).await?;

    tracing::debug!(
      component = "freshness",
      provider = %provider_name,
      identity_id = %identity_id,
      forced = force,
      "refreshed access token"
    );

    Ok(FreshToken {
      access_token: stored.access_token.clone(),
      identity:     stored,
      refreshed:    true,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use chrono::Duration;
  use uuid::Uuid;

  use super::*;
  use crate::{
    identity::TokenSet,
    memory::MemoryStore,
    testing::{MockProvider, at, identity_for},
  };

  struct Fixture {
    store:    Arc<MemoryStore>,
    provider: Arc<MockProvider>,
    guard:    TokenGuard<MemoryStore>,
  }

  fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(MockProvider::new("zoom"));
    let registry = Arc::new(ProviderRegistry::new().with(provider.clone()));
    Fixture {
      guard: TokenGuard::new(store.clone(), registry),
      store,
      provider,
    }
  }

  async fn seed(f: &Fixture, expires_at: Option<DateTime<Utc>>) -> Identity {
    f.store
      .create_identity(identity_for(Uuid::new_v4(), expires_at))
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn token_one_second_from_expiry_is_used_without_refresh() {
    let f = fixture();
    let now = at(10_000);
    let identity = seed(&f, Some(now + Duration::seconds(1))).await;

    let fresh = f.guard.ensure_usable_token(identity.clone(), now, false).await.unwrap();

    assert!(!fresh.refreshed);
    assert_eq!(fresh.access_token, "old-access");
    assert_eq!(f.provider.refresh_calls(), 0);
    let stored = f.store.find_identity(identity.id).await.unwrap().unwrap();
    assert_eq!(stored, identity);
  }

  #[tokio::test]
  async fn expired_token_is_refreshed_exactly_once() {
    let f = fixture();
    let expiry = at(10_000);
    let identity = seed(&f, Some(expiry)).await;

    let fresh = f
      .guard
      .ensure_usable_token(identity.clone(), expiry + Duration::seconds(1), false)
      .await
      .unwrap();

    assert!(fresh.refreshed);
    assert_eq!(fresh.access_token, "refreshed-1");
    assert_eq!(f.provider.refresh_calls(), 1);

    let stored = f.store.find_identity(identity.id).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "refreshed-1");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-123"));
    assert_eq!(stored.scopes, BTreeSet::from(["email".to_string()]));
  }

  #[tokio::test]
  async fn token_without_expiry_is_trusted() {
    let f = fixture();
    let identity = seed(&f, None).await;
    let fresh = f.guard.ensure_usable_token(identity, at(99_999_999), false).await.unwrap();
    assert!(!fresh.refreshed);
    assert_eq!(f.provider.refresh_calls(), 0);
  }

  #[tokio::test]
  async fn force_bypasses_expiry_check() {
    let f = fixture();
    let identity = seed(&f, None).await;
    f.provider.push_refresh(Ok(TokenSet {
      access_token:  "forced".into(),
      refresh_token: Some("refresh-456".into()),
      scopes:        vec!["meeting:write".into()],
      expires_at:    Some(at(50_000)),
    }));

    let fresh = f.guard.ensure_usable_token(identity, at(0), true).await.unwrap();

    assert_eq!(fresh.access_token, "forced");
    assert_eq!(fresh.identity.refresh_token.as_deref(), Some("refresh-456"));
    assert_eq!(fresh.identity.expires_at, Some(at(50_000)));
    assert_eq!(fresh.identity.scopes, BTreeSet::from(["meeting:write".to_string()]));
  }

  #[tokio::test]
  async fn failed_refresh_leaves_store_untouched() {
    let f = fixture();
    let identity = seed(&f, Some(at(10))).await;
    f.provider.push_refresh(Err(ProviderError::Status {
      status: 400,
      body:   "invalid_grant".into(),
    }));

    let err = f
      .guard
      .ensure_usable_token(identity.clone(), at(20), false)
      .await
      .unwrap_err();

    assert!(matches!(err, Error::Provider { operation: "refresh", .. }));
    let stored = f.store.find_identity(identity.id).await.unwrap().unwrap();
    assert_eq!(stored, identity);
  }

  #[tokio::test]
  async fn empty_refreshed_token_is_rejected() {
    let f = fixture();
    let identity = seed(&f, Some(at(10))).await;
    f.provider.push_refresh(Ok(TokenSet::default()));

    let err = f.guard.ensure_usable_token(identity, at(20), false).await.unwrap_err();
    assert!(matches!(
      err,
      Error::Provider { source: ProviderError::Decode(_), .. }
    ));
  }

  #[tokio::test]
  async fn unregistered_provider_is_reported() {
    let f = fixture();
    let mut identity = identity_for(Uuid::new_v4(), Some(at(10)));
    identity.provider = "github".into();

    let err = f.guard.ensure_usable_token(identity, at(20), false).await.unwrap_err();
    assert!(matches!(err, Error::ProviderNotConfigured(name) if name == "github"));
  }
}
