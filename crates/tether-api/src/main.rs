//! tether-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), layers `TETHER_*`
//! environment variables on top, opens the SQLite store, registers the
//! configured providers and reactions, and serves the JSON API over HTTP.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use clap::Parser;
use tether_api::{AppState, ServerConfig};
use tether_core::{
  clock::{Clock, SystemClock},
  exchange::ExchangeService,
  executor::{BoundAction, Executor, ReactionTable},
  provider::ProviderRegistry,
};
use tether_store_sqlite::SqliteStore;
use tether_zoom::{CreateMeeting, ReqwestTransport, ZoomProvider};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Timeout for reaction calls against provider APIs.
const ACTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(author, version, about = "Tether identity-linking server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("TETHER")
        .prefix_separator("_")
        .separator("__"),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let store = Arc::new(store);

  let clock: Arc<dyn Clock> = Arc::new(SystemClock);
  let transport = Arc::new(
    ReqwestTransport::new(ACTION_TIMEOUT).context("failed to build http transport")?,
  );

  let mut providers = ProviderRegistry::new();
  let mut zoom_action = None;
  if let Some(zoom_cfg) = &server_cfg.zoom {
    let zoom = ZoomProvider::new(zoom_cfg.clone(), Arc::clone(&clock))
      .context("failed to build zoom client")?;
    providers.register(Arc::new(zoom));
    zoom_action = Some(CreateMeeting::new(zoom_cfg));
  } else {
    tracing::warn!("no [zoom] table configured; zoom is unavailable");
  }
  let providers = Arc::new(providers);

  let executor = Arc::new(Executor::new(
    Arc::clone(&store),
    Arc::clone(&providers),
    transport,
    Arc::clone(&clock),
  ));
  let mut reactions = ReactionTable::new();
  if let Some(action) = zoom_action {
    reactions.register(Arc::new(BoundAction::new(action, Arc::clone(&executor))));
  }

  let exchange = ExchangeService::new(Arc::clone(&store), providers, Arc::clone(&clock))
    .with_session_ttl(chrono::Duration::seconds(server_cfg.session_ttl_secs));

  let state = AppState {
    store,
    exchange: Arc::new(exchange),
    reactions: Arc::new(reactions),
    clock,
  };

  let app = tether_api::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
