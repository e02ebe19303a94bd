//! Identity, the credential record binding a local user to one third-party
//! account, and the ephemeral token/profile data providers hand back.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Persistent record ───────────────────────────────────────────────────────

/// A stored credential record.
///
/// The pair `(provider, subject)` identifies at most one identity; stores
/// reject a second create for the same pair with a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
  pub id:            Uuid,
  pub user_id:       Uuid,
  /// Lower-cased provider name, e.g. `"zoom"`.
  pub provider:      String,
  /// The provider's stable identifier for the account.
  pub subject:       String,
  pub access_token:  String,
  pub refresh_token: Option<String>,
  pub scopes:        BTreeSet<String>,
  /// `None` means "assume valid until a call fails".
  pub expires_at:    Option<DateTime<Utc>>,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
}

impl Identity {
  /// Build a fresh identity for `user_id` from an initial token grant.
  pub fn new(
    user_id: Uuid,
    provider: &str,
    subject: &str,
    tokens: TokenSet,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      user_id,
      provider: normalize_provider(provider),
      subject: subject.to_owned(),
      access_token: tokens.access_token,
      refresh_token: tokens.refresh_token.filter(|t| !t.is_empty()),
      scopes: tokens.scopes.into_iter().filter(|s| !s.is_empty()).collect(),
      expires_at: tokens.expires_at,
      created_at: now,
      updated_at: now,
    }
  }

  /// Whether the cached access token may be used at `now` without refreshing.
  ///
  /// An empty token is never usable. A missing expiry counts as valid; an
  /// expiry is honoured strictly (`now` must be before it).
  pub fn has_usable_token(&self, now: DateTime<Utc>) -> bool {
    if self.access_token.is_empty() {
      return false;
    }
    match self.expires_at {
      None => true,
      Some(expires_at) => now < expires_at,
    }
  }

  /// Merge newly granted tokens into this record.
  ///
  /// The access token always wins. The refresh token, expiry and scope set are
  /// only replaced when the grant actually supplies a replacement, since
  /// providers do not reissue them on every refresh.
  pub fn absorb(&mut self, tokens: TokenSet, now: DateTime<Utc>) {
    self.access_token = tokens.access_token;

    if let Some(refresh) = tokens.refresh_token.filter(|t| !t.is_empty()) {
      self.refresh_token = Some(refresh);
    }
    if let Some(expires_at) = tokens.expires_at {
      self.expires_at = Some(expires_at);
    }

    let scopes: BTreeSet<String> =
      tokens.scopes.into_iter().filter(|s| !s.is_empty()).collect();
    if !scopes.is_empty() {
      self.scopes = scopes;
    }

    self.updated_at = now;
  }
}

/// Canonical form of a provider name: trimmed and lower-cased.
pub fn normalize_provider(name: &str) -> String { name.trim().to_lowercase() }

// ─── Ephemeral provider data ─────────────────────────────────────────────────

/// Tokens returned by a provider on exchange or refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
  pub access_token:  String,
  pub refresh_token: Option<String>,
  /// Possibly empty; an empty list means "unchanged" on refresh.
  pub scopes:        Vec<String>,
  /// Absolute expiry, already resolved against the provider's `expires_in`.
  pub expires_at:    Option<DateTime<Utc>>,
}

/// Account details the provider returned during an exchange. Never persisted
/// directly; only used to resolve or create the owning user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
  pub provider:     String,
  pub subject:      String,
  pub email:        String,
  pub display_name: Option<String>,
}

impl Profile {
  /// A profile without a usable subject cannot be linked.
  pub fn is_empty(&self) -> bool { self.subject.trim().is_empty() }

  /// The email in the form used for user lookups.
  pub fn normalized_email(&self) -> String { self.email.trim().to_lowercase() }
}

/// The result of an authorization-code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExchange {
  pub tokens:  TokenSet,
  pub profile: Profile,
}
