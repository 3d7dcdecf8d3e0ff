mod config;
mod git;
mod health;
mod http;
mod metrics;
mod repo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::http::bridge::Bridge;
use crate::metrics::MetricsRegistry;
use crate::repo::RepoTable;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "gitbridge", about = "Serve bare git repositories over smart HTTP")]
struct Cli {
    /// Path to the YAML configuration file [default: config.yaml next to the
    /// executable].
    #[arg(short, long, env = config::CONFIG_ENV_VAR)]
    config: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// State shared by every request handler.  Built once at startup and never
/// mutated afterwards.
#[derive(Clone)]
pub struct AppState {
    pub repos: Arc<RepoTable>,
    pub bridge: Arc<Bridge>,
    pub metrics: MetricsRegistry,
}

impl AppState {
    pub fn new(config: &Config, repos: RepoTable) -> Self {
        let metrics = MetricsRegistry::new();
        metrics.metrics.record_repositories(&repos);
        Self {
            repos: Arc::new(repos),
            bridge: Arc::new(Bridge::new(config.bridge.clone(), metrics.clone())),
            metrics,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(config: &Config, state: AppState) -> Result<()> {
    let server = &config.server;
    let listener = tokio::net::TcpListener::bind((server.host.as_str(), server.port))
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", server.authority()))?;

    let listen_addr = listener.local_addr().context("listener has no local address")?;
    tracing::info!(%listen_addr, "HTTP server listening");
    for repo in state.repos.iter().filter(|r| r.is_ready()) {
        tracing::info!(
            repo = %repo.name,
            url = %format!("http://{}/{}", server.authority(), repo.name),
            "serving repository"
        );
    }

    let app = http::handler::create_router(Arc::new(state));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // ---- CLI ----
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config::default_config_path);

    // ---- Config ----
    tracing::info!(config_path = %config_path.display(), "loading configuration");
    let config = config::load_config(&config_path)?;

    // ---- Git ----
    let git = &config.bridge.git_binary;
    let version = git::git_version(git)
        .await
        .with_context(|| format!("git is required but `{}` could not be run", git.display()))?;
    tracing::info!(%version, "git available");

    // ---- Repositories ----
    let repos = repo::provision_all(git, &config.repositories).await;

    // ---- Serve ----
    let state = AppState::new(&config, repos);
    run_http_server(&config, state).await?;

    tracing::info!("gitbridge shut down cleanly");
    Ok(())
}
