//! [`MemoryStore`]: an in-process implementation of every store contract.
//!
//! Records live in id-keyed maps behind a single mutex; uniqueness rules match
//! the SQLite backend. Used by tests and by embedders that do not need
//! durability.

use std::{collections::HashMap, sync::Mutex};

use uuid::Uuid;

use crate::{
  identity::Identity,
  store::{IdentityStore, SessionStore, StoreError, UserStore},
  user::{IssuedSession, NewSession, Session, User},
};

#[derive(Default)]
struct Inner {
  identities: HashMap<Uuid, Identity>,
  users:      HashMap<Uuid, User>,
  /// Keyed by bearer token.
  sessions:   HashMap<String, Session>,
}

#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut inner)
  }

  pub fn identity_count(&self) -> usize { self.with(|inner| inner.identities.len()) }

  pub fn user_count(&self) -> usize { self.with(|inner| inner.users.len()) }
}

impl IdentityStore for MemoryStore {
  async fn create_identity(&self, identity: Identity) -> Result<Identity, StoreError> {
    self.with(|inner| {
      let taken = inner.identities.values().any(|existing| {
        existing.id == identity.id
          || (existing.provider == identity.provider
            && existing.subject == identity.subject)
      });
      if taken {
        return Err(StoreError::Conflict(format!(
          "identity ({}, {}) already exists",
          identity.provider, identity.subject
        )));
      }
      inner.identities.insert(identity.id, identity.clone());
      Ok(identity)
    })
  }

  async fn update_identity(&self, identity: Identity) -> Result<Identity, StoreError> {
    self.with(|inner| {
      let stored = inner
        .identities
        .get_mut(&identity.id)
        .ok_or_else(|| StoreError::NotFound(format!("identity {}", identity.id)))?;
      stored.access_token = identity.access_token;
      stored.refresh_token = identity.refresh_token;
      stored.scopes = identity.scopes;
      stored.expires_at = identity.expires_at;
      stored.updated_at = identity.updated_at;
      Ok(stored.clone())
    })
  }

  async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
    Ok(self.with(|inner| inner.identities.get(&id).cloned()))
  }

  async fn find_identity_by_subject(
    &self,
    provider: &str,
    subject: &str,
  ) -> Result<Option<Identity>, StoreError> {
    Ok(self.with(|inner| {
      inner
        .identities
        .values()
        .find(|i| i.provider == provider && i.subject == subject)
        .cloned()
    }))
  }

  async fn list_identities(&self, user_id: Uuid) -> Result<Vec<Identity>, StoreError> {
    let mut found: Vec<Identity> = self.with(|inner| {
      inner
        .identities
        .values()
        .filter(|i| i.user_id == user_id)
        .cloned()
        .collect()
    });
    found.sort_by_key(|i| i.created_at);
    Ok(found)
  }
}

impl UserStore for MemoryStore {
  async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
    Ok(self.with(|inner| inner.users.values().find(|u| u.email == email).cloned()))
  }

  async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
    Ok(self.with(|inner| inner.users.get(&id).cloned()))
  }

  async fn create_user(&self, user: User) -> Result<User, StoreError> {
    self.with(|inner| {
      if inner.users.values().any(|u| u.id == user.id || u.email == user.email) {
        return Err(StoreError::Conflict(format!("user {} already exists", user.email)));
      }
      inner.users.insert(user.id, user.clone());
      Ok(user)
    })
  }

  async fn update_user(&self, user: User) -> Result<User, StoreError> {
    self.with(|inner| match inner.users.get_mut(&user.id) {
      Some(stored) => {
        *stored = user.clone();
        Ok(user)
      }
      None => Err(StoreError::NotFound(format!("user {}", user.id))),
    })
  }
}

impl SessionStore for MemoryStore {
  async fn issue_session(&self, input: NewSession) -> Result<IssuedSession, StoreError> {
    let session = Session {
      id:         Uuid::new_v4(),
      user_id:    input.user_id,
      issued_at:  input.issued_at,
      expires_at: input.expires_at,
      metadata:   input.metadata,
    };
    let token = Uuid::new_v4().simple().to_string();
    self.with(|inner| inner.sessions.insert(token.clone(), session.clone()));
    Ok(IssuedSession { session, token })
  }

  async fn find_session_by_token(&self, token: &str) -> Result<Option<Session>, StoreError> {
    Ok(self.with(|inner| inner.sessions.get(token).cloned()))
  }
}
