//! HTTP server bootstrap for forward-gate.
//!
//! This module wires together:
//! - configuration
//! - the SQLite store, its migrations and the reserved entities
//! - machine keys, session validation and the app registry
//! - the file watches and graceful shutdown
//! - the Axum router

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use crate::auth::{MachineKeyStore, SessionValidator};
use crate::config::Config;
use crate::infra::{shutdown_on_signal, AuthStore, ShutdownCoordinator, SqliteAuthStore};
use crate::registry::{AppRegistry, FileManifest};

/// Time granted to background tasks once shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AuthStore>,
    pub registry: Arc<AppRegistry>,
    pub machine_keys: Arc<MachineKeyStore>,
    pub sessions: Arc<SessionValidator>,
    pub config: Arc<Config>,
}

/// Run the forward-auth server until a shutdown signal arrives.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting forward-gate v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        apps_install_dir = %config.apps_install_dir.display(),
        static_file_dir = %config.static_file_dir.display(),
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Configuration loaded"
    );

    let sqlite = SqliteAuthStore::connect(&config.database_url, config.max_connections)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;
    crate::migrations::run_sqlite(sqlite.pool())
        .await
        .context("failed to run migrations")?;
    let store: Arc<dyn AuthStore> = Arc::new(sqlite);
    crate::migrations::seed_reserved(store.as_ref(), &config.admin)
        .await
        .context("failed to seed reserved entities")?;
    info!("Database ready");

    let machine_keys = Arc::new(
        MachineKeyStore::from_files(config.keys_file.clone(), config.actions_file.clone())
            .await
            .context("failed to load machine keys")?,
    );
    let sessions = Arc::new(SessionValidator::new(config.cookie_secret.as_bytes()));

    let registry = Arc::new(AppRegistry::new(
        Arc::new(FileManifest::in_dir(&config.apps_install_dir)),
        Arc::clone(&store),
    ));
    registry
        .refresh()
        .await
        .context("failed to load installed apps")?;

    let coordinator = Arc::new(ShutdownCoordinator::new());
    for (name, handle) in machine_keys.spawn_watchers(config.poll_interval, coordinator.signal()) {
        coordinator.track(name, handle).await;
    }
    if let Some(handle) = registry
        .spawn_watcher(config.poll_interval, coordinator.signal())
        .await
    {
        coordinator.track("manifest-watch", handle).await;
    }
    coordinator
        .track("os-signal", shutdown_on_signal(Arc::clone(&coordinator)))
        .await;

    let listen_addr = config.listen_addr;
    let state = AppState {
        store,
        registry,
        machine_keys,
        sessions,
        config: Arc::new(config),
    };
    let app = build_router(state);

    info!("Listening on {}", listen_addr);
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;

    let signal = coordinator.signal();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.wait().await })
        .await?;

    coordinator.shutdown_and_join(SHUTDOWN_GRACE).await;
    info!("Shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Check routes with request tracing, bound to `state`.
pub fn build_router(state: AppState) -> Router {
    crate::api::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
