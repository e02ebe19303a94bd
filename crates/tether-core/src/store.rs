//! Persistence contracts for identities, users and sessions.
//!
//! The traits are implemented by storage backends (e.g. `tether-store-sqlite`
//! and the in-memory [`MemoryStore`](crate::memory::MemoryStore)). Services in
//! this crate depend on these abstractions, not on any concrete backend.
//!
//! Uniqueness violations and missing rows are reported through the typed
//! [`StoreError`] so callers can recover from them without inspecting
//! backend-specific messages.

use std::future::Future;

use thiserror::Error;
use uuid::Uuid;

use crate::{
  identity::Identity,
  user::{IssuedSession, NewSession, Session, User},
};

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
  /// A uniqueness constraint rejected the write.
  #[error("conflict: {0}")]
  Conflict(String),

  /// An update targeted a row that does not exist.
  #[error("not found: {0}")]
  NotFound(String),

  #[error("backend error: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

// ─── Identities ──────────────────────────────────────────────────────────────

/// Storage for [`Identity`] records, keyed by id and by `(provider, subject)`.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait IdentityStore: Send + Sync {
  /// Persist a new identity. Fails with [`StoreError::Conflict`] if another
  /// identity already holds the same `(provider, subject)` pair.
  fn create_identity(
    &self,
    identity: Identity,
  ) -> impl Future<Output = Result<Identity, StoreError>> + Send + '_;

  /// Replace the mutable token fields (`access_token`, `refresh_token`,
  /// `scopes`, `expires_at`, `updated_at`) of the identity with the same id.
  ///
  /// This is a full-field replace, so concurrent writers converge on one
  /// internally consistent token set (last write wins). Fails with
  /// [`StoreError::NotFound`] if the id is unknown.
  fn update_identity(
    &self,
    identity: Identity,
  ) -> impl Future<Output = Result<Identity, StoreError>> + Send + '_;

  /// Retrieve an identity by id. Returns `None` if not found.
  fn find_identity(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Identity>, StoreError>> + Send + '_;

  /// Retrieve the identity for a normalised provider name and subject.
  fn find_identity_by_subject<'a>(
    &'a self,
    provider: &'a str,
    subject: &'a str,
  ) -> impl Future<Output = Result<Option<Identity>, StoreError>> + Send + 'a;

  /// List every identity linked to `user_id`, oldest first.
  fn list_identities(
    &self,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Identity>, StoreError>> + Send + '_;
}

// ─── Users ───────────────────────────────────────────────────────────────────

pub trait UserStore: Send + Sync {
  /// Look up a user by (already normalised) email.
  fn find_user_by_email<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<Option<User>, StoreError>> + Send + 'a;

  fn find_user(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<User>, StoreError>> + Send + '_;

  /// Persist a new user. Fails with [`StoreError::Conflict`] if the email is
  /// already taken.
  fn create_user(
    &self,
    user: User,
  ) -> impl Future<Output = Result<User, StoreError>> + Send + '_;

  /// Replace the mutable fields of an existing user.
  fn update_user(
    &self,
    user: User,
  ) -> impl Future<Output = Result<User, StoreError>> + Send + '_;
}

// ─── Sessions ────────────────────────────────────────────────────────────────

pub trait SessionStore: Send + Sync {
  /// Persist a session and return it with a freshly generated bearer token.
  /// Durable backends retain only a digest of the token.
  fn issue_session(
    &self,
    session: NewSession,
  ) -> impl Future<Output = Result<IssuedSession, StoreError>> + Send + '_;

  /// Resolve a bearer token to its session, if the token is known. Expiry is
  /// checked by the caller.
  fn find_session_by_token<'a>(
    &'a self,
    token: &'a str,
  ) -> impl Future<Output = Result<Option<Session>, StoreError>> + Send + 'a;
}
