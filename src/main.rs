mod config;
mod coordination;
mod dispatch;
mod envelope;
mod health;
mod http;
mod inventory;
mod metrics;
mod producer;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::task::JoinSet;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::coordination::locks::LockManager;
use crate::coordination::CoordinationStore;
use crate::dispatch::Dispatcher;
use crate::metrics::MetricsRegistry;
use crate::producer::Producer;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "orderbus", about = "Deduplicated order fan-out over KeyDB pub/sub")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/orderbus/config.yaml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Global state shared across HTTP handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn CoordinationStore>,
    pub producer: Producer,
    pub metrics: MetricsRegistry,
    pub node_id: String,
}

// ---------------------------------------------------------------------------
// Store setup
// ---------------------------------------------------------------------------

async fn build_store(config: &Config) -> Result<Arc<dyn CoordinationStore>> {
    if config.keydb.is_memory() {
        tracing::warn!("using in-process store, locks do not coordinate with other processes");
        return Ok(Arc::new(coordination::memory::MemoryStore::new()));
    }
    let store = coordination::redis::create_keydb_store(&config.keydb).await?;
    Ok(Arc::new(store))
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: AppState) -> Result<()> {
    let listen_addr: std::net::SocketAddr = state
        .config
        .http
        .listen
        .parse()
        .context("invalid http.listen address")?;

    let app = http::handler::create_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

async fn run_dispatcher(state: AppState) -> Result<()> {
    let dispatch_config = &state.config.dispatch;

    let locks = LockManager::new(
        Arc::clone(&state.store),
        state.node_id.clone(),
        Arc::clone(&state.metrics.metrics),
    );
    let handler = Arc::new(inventory::OrderUpdateHandler::new(
        dispatch_config.processing_delay(),
    ));
    let dispatcher = Dispatcher::new(
        locks,
        handler,
        dispatch_config.lock_prefix.clone(),
        dispatch_config.lock_ttl(),
        Arc::clone(&state.metrics.metrics),
    );

    // One subscription, held for the life of the process.
    let subscription = state
        .store
        .subscribe(&dispatch_config.channel)
        .await
        .with_context(|| format!("failed to subscribe to {}", dispatch_config.channel))?;

    tokio::select! {
        result = dispatcher.run(subscription) => result,
        () = shutdown_signal() => Ok(()),
    }
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
// Supervision
// ---------------------------------------------------------------------------

/// Wait for every service to finish.
///
/// The first service that fails or panics ends the process with an error;
/// dropping the `JoinSet` aborts whatever is still running.
async fn supervise(mut services: JoinSet<(&'static str, Result<()>)>) -> Result<()> {
    while let Some(joined) = services.join_next().await {
        let (service, result) = joined.context("service task panicked")?;
        if let Err(e) = result {
            tracing::error!(error = %format!("{e:#}"), service, "service failed, shutting down");
            return Err(e.context(format!("{service} stopped")));
        }
        tracing::info!(service, "service stopped");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = Arc::new(config::load_config(&cli.config)?);

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(config_path = %cli.config, service = %config.service.name, "starting orderbus");

    // ---- Infrastructure ----
    let store = build_store(&config).await?;
    let metrics = MetricsRegistry::new();

    // ---- Node ID ----
    let node_id = coordination::node::node_id(&config.service.name);
    tracing::info!(%node_id, "node identity established");

    // ---- App state ----
    let state = AppState {
        config: Arc::clone(&config),
        producer: Producer::new(Arc::clone(&store), Arc::clone(&metrics.metrics)),
        store,
        metrics,
        node_id,
    };

    // ---- Spawn services ----
    let mut services = JoinSet::new();

    if config.http.enabled {
        let s = state.clone();
        services.spawn(async move { ("HTTP server", run_http_server(s).await) });
    }

    if config.dispatch.enabled {
        let s = state.clone();
        services.spawn(async move { ("dispatcher", run_dispatcher(s).await) });
    }

    // ---- Await shutdown ----
    // Each task watches its own `shutdown_signal()` future and winds down.
    supervise(services).await?;

    tracing::info!("orderbus shut down cleanly");
    Ok(())
}
