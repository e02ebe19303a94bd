//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. Scope sets are stored as a
//! compact JSON array. UUIDs are stored as hyphenated lowercase strings.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tether_core::{
  identity::Identity,
  user::{RequestMetadata, Session, User, UserStatus},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── UserStatus ───────────────────────────────────────────────────────────────

pub fn encode_status(status: UserStatus) -> &'static str {
  match status {
    UserStatus::Active => "active",
    UserStatus::Pending => "pending",
  }
}

pub fn decode_status(s: &str) -> Result<UserStatus> {
  match s {
    "active" => Ok(UserStatus::Active),
    "pending" => Ok(UserStatus::Pending),
    other => Err(Error::UnknownStatus(other.to_owned())),
  }
}

// ─── Scopes ───────────────────────────────────────────────────────────────────

pub fn encode_scopes(scopes: &BTreeSet<String>) -> Result<String> {
  Ok(serde_json::to_string(scopes)?)
}

pub fn decode_scopes(s: &str) -> Result<BTreeSet<String>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Session tokens ───────────────────────────────────────────────────────────

/// Hex SHA-256 of a bearer token; the only form in which tokens are stored.
pub fn hash_token(token: &str) -> String {
  hex::encode(Sha256::digest(token.as_bytes()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const IDENTITY_COLUMNS: &str = "identity_id, user_id, provider, subject, access_token, \
   refresh_token, scopes, expires_at, created_at, updated_at";

/// Raw strings read directly from an `identities` row.
pub struct RawIdentity {
  pub identity_id:   String,
  pub user_id:       String,
  pub provider:      String,
  pub subject:       String,
  pub access_token:  String,
  pub refresh_token: Option<String>,
  pub scopes:        String,
  pub expires_at:    Option<String>,
  pub created_at:    String,
  pub updated_at:    String,
}

impl RawIdentity {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      identity_id:   row.get(0)?,
      user_id:       row.get(1)?,
      provider:      row.get(2)?,
      subject:       row.get(3)?,
      access_token:  row.get(4)?,
      refresh_token: row.get(5)?,
      scopes:        row.get(6)?,
      expires_at:    row.get(7)?,
      created_at:    row.get(8)?,
      updated_at:    row.get(9)?,
    })
  }

  pub fn into_identity(self) -> Result<Identity> {
    Ok(Identity {
      id:            decode_uuid(&self.identity_id)?,
      user_id:       decode_uuid(&self.user_id)?,
      provider:      self.provider,
      subject:       self.subject,
      access_token:  self.access_token,
      refresh_token: self.refresh_token,
      scopes:        decode_scopes(&self.scopes)?,
      expires_at:    self.expires_at.as_deref().map(decode_dt).transpose()?,
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_dt(&self.updated_at)?,
    })
  }
}

pub const USER_COLUMNS: &str =
  "user_id, email, display_name, status, created_at, updated_at, last_login_at";

/// Raw strings read directly from a `users` row.
pub struct RawUser {
  pub user_id:       String,
  pub email:         String,
  pub display_name:  Option<String>,
  pub status:        String,
  pub created_at:    String,
  pub updated_at:    String,
  pub last_login_at: Option<String>,
}

impl RawUser {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      user_id:       row.get(0)?,
      email:         row.get(1)?,
      display_name:  row.get(2)?,
      status:        row.get(3)?,
      created_at:    row.get(4)?,
      updated_at:    row.get(5)?,
      last_login_at: row.get(6)?,
    })
  }

  pub fn into_user(self) -> Result<User> {
    Ok(User {
      id:            decode_uuid(&self.user_id)?,
      email:         self.email,
      display_name:  self.display_name,
      status:        decode_status(&self.status)?,
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_dt(&self.updated_at)?,
      last_login_at: self.last_login_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

/// Raw strings read directly from a `sessions` row.
pub struct RawSession {
  pub session_id: String,
  pub user_id:    String,
  pub issued_at:  String,
  pub expires_at: String,
  pub ip:         Option<String>,
  pub user_agent: Option<String>,
}

impl RawSession {
  pub fn into_session(self) -> Result<Session> {
    Ok(Session {
      id:         decode_uuid(&self.session_id)?,
      user_id:    decode_uuid(&self.user_id)?,
      issued_at:  decode_dt(&self.issued_at)?,
      expires_at: decode_dt(&self.expires_at)?,
      metadata:   RequestMetadata {
        ip:         self.ip,
        user_agent: self.user_agent,
      },
    })
  }
}
