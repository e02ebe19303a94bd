//! Handlers for `/identities` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/identities` | The caller's linked identities, without tokens |
//! | `POST` | `/identities/{id}/actions/{action}` | Body: action parameters; returns the [`ExecutionRecord`] |

use std::collections::BTreeSet;

use axum::{
  Json,
  extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_core::{executor::ExecutionRecord, identity::Identity};
use uuid::Uuid;

use crate::{AppState, Store, auth::CurrentUser, error::ApiError};

/// Public view of an [`Identity`]. Credentials never leave the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentitySummary {
  pub id:         Uuid,
  pub provider:   String,
  pub subject:    String,
  pub scopes:     BTreeSet<String>,
  pub expires_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl From<&Identity> for IdentitySummary {
  fn from(identity: &Identity) -> Self {
    Self {
      id:         identity.id,
      provider:   identity.provider.clone(),
      subject:    identity.subject.clone(),
      scopes:     identity.scopes.clone(),
      expires_at: identity.expires_at,
      created_at: identity.created_at,
      updated_at: identity.updated_at,
    }
  }
}

/// `GET /identities`
pub async fn list<S: Store>(
  State(state): State<AppState<S>>,
  caller: CurrentUser,
) -> Result<Json<Vec<IdentitySummary>>, ApiError> {
  let identities = state.exchange.list_identities(caller.user_id).await?;
  Ok(Json(identities.iter().map(IdentitySummary::from).collect()))
}

/// `POST /identities/{id}/actions/{action}`
pub async fn execute<S: Store>(
  State(state): State<AppState<S>>,
  caller: CurrentUser,
  Path((identity_id, action)): Path<(Uuid, String)>,
  Json(params): Json<serde_json::Value>,
) -> Result<Json<ExecutionRecord>, ApiError> {
  let reaction = state.reactions.get(&action)?;
  let record = reaction.run(identity_id, caller.user_id, &params).await?;
  Ok(Json(record))
}
