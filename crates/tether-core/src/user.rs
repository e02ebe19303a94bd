//! Owning accounts and the sessions issued to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether an account may sign in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
  Active,
  /// Registered but not yet verified. Linking an identity activates it.
  Pending,
}

/// A local account. Only the fields this crate reasons about are modelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id:            Uuid,
  /// Always stored trimmed and lower-cased.
  pub email:         String,
  pub display_name:  Option<String>,
  pub status:        UserStatus,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
  pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
  /// A new active account for `email`.
  pub fn new_active(
    email: &str,
    display_name: Option<String>,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      email: email.trim().to_lowercase(),
      display_name,
      status: UserStatus::Active,
      created_at: now,
      updated_at: now,
      last_login_at: None,
    }
  }

  pub fn is_active(&self) -> bool { self.status == UserStatus::Active }
}

// ─── Sessions ────────────────────────────────────────────────────────────────

/// Caller details captured alongside a login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
  pub ip:         Option<String>,
  pub user_agent: Option<String>,
}

/// Input to [`SessionStore::issue_session`](crate::store::SessionStore::issue_session).
#[derive(Debug, Clone)]
pub struct NewSession {
  pub user_id:    Uuid,
  pub issued_at:  DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
  pub metadata:   RequestMetadata,
}

/// A persisted session. The bearer token itself is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub id:         Uuid,
  pub user_id:    Uuid,
  pub issued_at:  DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
  pub metadata:   RequestMetadata,
}

/// A freshly issued session together with its one-time-visible bearer token.
#[derive(Debug, Clone)]
pub struct IssuedSession {
  pub session: Session,
  pub token:   String,
}

/// What a successful OAuth login hands back to the caller.
#[derive(Debug, Clone)]
pub struct LoginResult {
  pub user:    User,
  pub session: Session,
  pub token:   String,
}
