//! [`SqliteStore`]: the SQLite implementation of the Tether store contracts.

use std::path::Path;

use rand_core::{OsRng, RngCore as _};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use tether_core::{
  identity::Identity,
  store::{IdentityStore, SessionStore, StoreError, UserStore},
  user::{IssuedSession, NewSession, Session, User},
};

use crate::{
  Error, Result,
  encode::{
    IDENTITY_COLUMNS, RawIdentity, RawSession, RawUser, USER_COLUMNS, encode_dt,
    encode_scopes, encode_status, encode_uuid, hash_token,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tether store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Identities ────────────────────────────────────────────────────────────

  async fn insert_identity(&self, identity: &Identity) -> Result<()> {
    let id_str         = encode_uuid(identity.id);
    let user_id_str    = encode_uuid(identity.user_id);
    let provider       = identity.provider.clone();
    let subject        = identity.subject.clone();
    let access_token   = identity.access_token.clone();
    let refresh_token  = identity.refresh_token.clone();
    let scopes_str     = encode_scopes(&identity.scopes)?;
    let expires_at_str = identity.expires_at.map(encode_dt);
    let created_at_str = encode_dt(identity.created_at);
    let updated_at_str = encode_dt(identity.updated_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO identities (
             identity_id, user_id, provider, subject, access_token,
             refresh_token, scopes, expires_at, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            id_str,
            user_id_str,
            provider,
            subject,
            access_token,
            refresh_token,
            scopes_str,
            expires_at_str,
            created_at_str,
            updated_at_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Full replace of the token columns. Identity, owner and subject are
  /// immutable once created.
  async fn replace_identity_tokens(&self, identity: &Identity) -> Result<()> {
    let id_str         = encode_uuid(identity.id);
    let access_token   = identity.access_token.clone();
    let refresh_token  = identity.refresh_token.clone();
    let scopes_str     = encode_scopes(&identity.scopes)?;
    let expires_at_str = identity.expires_at.map(encode_dt);
    let updated_at_str = encode_dt(identity.updated_at);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE identities
           SET access_token = ?2, refresh_token = ?3, scopes = ?4,
               expires_at = ?5, updated_at = ?6
           WHERE identity_id = ?1",
          rusqlite::params![
            id_str,
            access_token,
            refresh_token,
            scopes_str,
            expires_at_str,
            updated_at_str,
          ],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::NotFound(format!("identity {}", identity.id)));
    }
    Ok(())
  }

  async fn identity_where(
    &self,
    clause: &'static str,
    params: Vec<String>,
  ) -> Result<Vec<Identity>> {
    let raws: Vec<RawIdentity> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {IDENTITY_COLUMNS} FROM identities WHERE {clause} ORDER BY created_at"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawIdentity::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawIdentity::into_identity).collect()
  }

  async fn identity_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
    let mut found = self
      .identity_where("identity_id = ?1", vec![encode_uuid(id)])
      .await?;
    Ok(found.pop())
  }

  // ── Users ─────────────────────────────────────────────────────────────────

  async fn user_where(&self, clause: &'static str, param: String) -> Result<Option<User>> {
    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {clause}");
        Ok(
          conn
            .query_row(&sql, rusqlite::params![param], RawUser::from_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawUser::into_user).transpose()
  }

  async fn insert_user(&self, user: &User) -> Result<()> {
    let id_str       = encode_uuid(user.id);
    let email        = user.email.clone();
    let display_name = user.display_name.clone();
    let status_str   = encode_status(user.status).to_owned();
    let created_str  = encode_dt(user.created_at);
    let updated_str  = encode_dt(user.updated_at);
    let login_str    = user.last_login_at.map(encode_dt);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (
             user_id, email, display_name, status, created_at, updated_at, last_login_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            id_str,
            email,
            display_name,
            status_str,
            created_str,
            updated_str,
            login_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn replace_user(&self, user: &User) -> Result<()> {
    let id_str       = encode_uuid(user.id);
    let email        = user.email.clone();
    let display_name = user.display_name.clone();
    let status_str   = encode_status(user.status).to_owned();
    let updated_str  = encode_dt(user.updated_at);
    let login_str    = user.last_login_at.map(encode_dt);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE users
           SET email = ?2, display_name = ?3, status = ?4,
               updated_at = ?5, last_login_at = ?6
           WHERE user_id = ?1",
          rusqlite::params![id_str, email, display_name, status_str, updated_str, login_str],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::NotFound(format!("user {}", user.id)));
    }
    Ok(())
  }

  // ── Sessions ──────────────────────────────────────────────────────────────

  async fn insert_session(&self, session: &Session, token_hash: String) -> Result<()> {
    let id_str      = encode_uuid(session.id);
    let user_id_str = encode_uuid(session.user_id);
    let issued_str  = encode_dt(session.issued_at);
    let expires_str = encode_dt(session.expires_at);
    let ip          = session.metadata.ip.clone();
    let user_agent  = session.metadata.user_agent.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO sessions (
             session_id, user_id, token_hash, issued_at, expires_at, ip, user_agent
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            id_str,
            user_id_str,
            token_hash,
            issued_str,
            expires_str,
            ip,
            user_agent,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn session_by_hash(&self, token_hash: String) -> Result<Option<Session>> {
    let raw: Option<RawSession> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT session_id, user_id, issued_at, expires_at, ip, user_agent
               FROM sessions WHERE token_hash = ?1",
              rusqlite::params![token_hash],
              |row| {
                Ok(RawSession {
                  session_id: row.get(0)?,
                  user_id:    row.get(1)?,
                  issued_at:  row.get(2)?,
                  expires_at: row.get(3)?,
                  ip:         row.get(4)?,
                  user_agent: row.get(5)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSession::into_session).transpose()
  }
}

/// 32 random bytes from the OS, hex encoded.
fn generate_token() -> String {
  let mut bytes = [0u8; 32];
  OsRng.fill_bytes(&mut bytes);
  hex::encode(bytes)
}

// ─── IdentityStore impl ──────────────────────────────────────────────────────

impl IdentityStore for SqliteStore {
  async fn create_identity(&self, identity: Identity) -> Result<Identity, StoreError> {
    self.insert_identity(&identity).await?;
    Ok(identity)
  }

  async fn update_identity(&self, identity: Identity) -> Result<Identity, StoreError> {
    self.replace_identity_tokens(&identity).await?;
    self
      .identity_by_id(identity.id)
      .await?
      .ok_or_else(|| StoreError::NotFound(format!("identity {}", identity.id)))
  }

  async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
    Ok(self.identity_by_id(id).await?)
  }

  async fn find_identity_by_subject(
    &self,
    provider: &str,
    subject: &str,
  ) -> Result<Option<Identity>, StoreError> {
    let mut found = self
      .identity_where(
        "provider = ?1 AND subject = ?2",
        vec![provider.to_owned(), subject.to_owned()],
      )
      .await?;
    Ok(found.pop())
  }

  async fn list_identities(&self, user_id: Uuid) -> Result<Vec<Identity>, StoreError> {
    Ok(
      self
        .identity_where("user_id = ?1", vec![encode_uuid(user_id)])
        .await?,
    )
  }
}

// ─── UserStore impl ──────────────────────────────────────────────────────────

impl UserStore for SqliteStore {
  async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
    Ok(self.user_where("email = ?1", email.to_owned()).await?)
  }

  async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
    Ok(self.user_where("user_id = ?1", encode_uuid(id)).await?)
  }

  async fn create_user(&self, user: User) -> Result<User, StoreError> {
    self.insert_user(&user).await?;
    Ok(user)
  }

  async fn update_user(&self, user: User) -> Result<User, StoreError> {
    self.replace_user(&user).await?;
    Ok(user)
  }
}

// ─── SessionStore impl ───────────────────────────────────────────────────────

impl SessionStore for SqliteStore {
  async fn issue_session(&self, input: NewSession) -> Result<IssuedSession, StoreError> {
    let session = Session {
      id:         Uuid::new_v4(),
      user_id:    input.user_id,
      issued_at:  input.issued_at,
      expires_at: input.expires_at,
      metadata:   input.metadata,
    };
    let token = generate_token();

    self.insert_session(&session, hash_token(&token)).await?;
    tracing::debug!(session_id = %session.id, user_id = %session.user_id, "issued session");

    Ok(IssuedSession { session, token })
  }

  async fn find_session_by_token(&self, token: &str) -> Result<Option<Session>, StoreError> {
    Ok(self.session_by_hash(hash_token(token)).await?)
  }
}
