//! HTTP adapter for Tether.
//!
//! Exposes an axum [`Router`] over the core services. Handlers only translate
//! between HTTP and the core; every rule lives in `tether-core`.
//!
//! | Method | Path | Auth |
//! |--------|------|------|
//! | `GET`  | `/oauth/{provider}/authorize` | none |
//! | `POST` | `/oauth/{provider}/exchange` | none |
//! | `GET`  | `/identities` | bearer session |
//! | `POST` | `/identities/{id}/actions/{action}` | bearer session |

pub mod auth;
pub mod error;
pub mod identities;
pub mod oauth;

pub use error::ApiError;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post},
};
use serde::Deserialize;
use tether_core::{
  clock::Clock,
  exchange::{DEFAULT_SESSION_TTL_SECS, ExchangeService},
  executor::ReactionTable,
  store::{IdentityStore, SessionStore, UserStore},
};
use tether_zoom::ZoomConfig;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `TETHER_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  pub host:             String,
  pub port:             u16,
  pub store_path:       PathBuf,
  #[serde(default = "default_session_ttl_secs")]
  pub session_ttl_secs: i64,
  /// Zoom is registered only when this table is present.
  #[serde(default)]
  pub zoom:             Option<ZoomConfig>,
}

fn default_session_ttl_secs() -> i64 { DEFAULT_SESSION_TTL_SECS }

// ─── Application state ────────────────────────────────────────────────────────

/// Combined store contract required by the HTTP layer.
pub trait Store: IdentityStore + UserStore + SessionStore + 'static {}

impl<T> Store for T where T: IdentityStore + UserStore + SessionStore + 'static {}

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub store:     Arc<S>,
  pub exchange:  Arc<ExchangeService<S>>,
  pub reactions: Arc<ReactionTable>,
  pub clock:     Arc<dyn Clock>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:     Arc::clone(&self.store),
      exchange:  Arc::clone(&self.exchange),
      reactions: Arc::clone(&self.reactions),
      clock:     Arc::clone(&self.clock),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

pub fn router<S: Store>(state: AppState<S>) -> Router {
  Router::new()
    .route("/oauth/{provider}/authorize", get(oauth::authorize::<S>))
    .route("/oauth/{provider}/exchange",  post(oauth::exchange::<S>))
    .route("/identities",                 get(identities::list::<S>))
    .route("/identities/{id}/actions/{action}", post(identities::execute::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
