mod auth;
mod routes;
mod sse;
mod state;

pub mod args;
pub mod error;

pub use args::Cli;
pub use auth::AuthService;
pub use error::{ApiError, ApiResult};
pub use routes::build_router;
pub use state::AppState;

use agentum_core::{SessionLayout, resolve_sessions_root};
use agentum_policy::{PermissionProfile, SandboxConfig};
use agentum_runtime::{Runtime, ServiceConfig, resolve_config_dir};
use anyhow::Context;
use std::sync::{Arc, Mutex};

/// Wire the full service from configuration and serve until ctrl-c.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_dir = resolve_config_dir(cli.config_dir.as_deref())?;
    let config = ServiceConfig::load_from(&config_dir.join("api.yaml"))?;
    let profile = PermissionProfile::load_from(&config_dir.join("permissions.yaml"))?;
    let sandbox = SandboxConfig::load_from(&config_dir.join("security.yaml"))?;

    let sessions_root = resolve_sessions_root(cli.data_dir.as_deref())?;
    let layout = SessionLayout::new(&sessions_root)
        .with_context(|| format!("Opening sessions root {}", sessions_root.display()))?;

    let db_path = config.database.path.clone().unwrap_or_else(|| {
        sessions_root
            .parent()
            .unwrap_or(&sessions_root)
            .join("agentum.db")
    });
    let database = agentum_store::Database::open(&db_path)
        .with_context(|| format!("Opening database {}", db_path.display()))?;
    let store = Arc::new(Mutex::new(database));

    let port = cli.port.unwrap_or(config.api.external_port);
    let runtime = Runtime::new(config, store, layout, profile, sandbox);

    // No supervisor survives a restart; reconcile orphaned rows first
    let stale = runtime.lifecycle.cleanup_stale_sessions().await?;
    if !stale.is_empty() {
        tracing::warn!(count = stale.len(), "Marked stale running sessions as failed");
    }

    let auth = Arc::new(AuthService::load_or_generate(&config_dir)?);
    let state = AppState::new(runtime, auth);
    let app = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Binding {}", addr))?;
    tracing::info!(%addr, "agentum listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to install shutdown handler");
        return;
    }
    tracing::info!("Shutting down");
}
