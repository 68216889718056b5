//! Entry point for the shellsup MCP server.
//!
//! Initializes tracing (to stderr, so it doesn't interfere with MCP stdio
//! transport), loads persisted state, starts the background maintenance
//! tasks (buffer waiter sweep, dedup sweep, resource sampler, grace reaper),
//! and serves the MCP tool surface on stdin/stdout until the client
//! disconnects or a termination signal arrives.

use std::sync::Arc;

use anyhow::Result;
use rmcp::{ServiceExt, transport::stdio};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{self, EnvFilter};

use shellsup::dedup::{self, Deduplicator};
use shellsup::interactive::InteractiveManager;
use shellsup::persistence::Persistence;
use shellsup::server::ShellSupServer;
use shellsup::store::SessionStore;
use shellsup::supervisor::Supervisor;
use shellsup::{config, executor::CommandResult};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing to stderr (stdout is used for MCP JSON-RPC).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting shellsup MCP server v{}", env!("CARGO_PKG_VERSION"));

    let persistence = Arc::new(Persistence::new(config::state_root()));

    let store = Arc::new(SessionStore::new(Arc::clone(&persistence)));
    store.load_and_init().await;

    let supervisor = Arc::new(Supervisor::new(Arc::clone(&persistence)));
    supervisor.recover_orphans().await;

    let interactive = Arc::new(InteractiveManager::new());
    let dedup: Arc<Deduplicator<CommandResult>> = Arc::new(Deduplicator::with_defaults());

    let sampler_handle = tokio::spawn(Arc::clone(&supervisor).run_sampler());
    let reaper_handle = tokio::spawn(Arc::clone(&supervisor).run_grace_reaper());
    let dedup_sweeper_handle = dedup::spawn_sweeper(Arc::clone(&dedup));

    let server = ShellSupServer::new(
        Arc::clone(&store),
        Arc::clone(&supervisor),
        Arc::clone(&interactive),
        Arc::clone(&dedup),
    );
    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("serving error: {:?}", e);
    })?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        result = service.waiting() => {
            result?;
            tracing::info!("client disconnected");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            tracing::info!("received SIGINT, shutting down");
        }
    }

    sampler_handle.abort();
    reaper_handle.abort();
    dedup_sweeper_handle.abort();

    // Best-effort drain: flush pending debounced saves, release PTYs, and
    // leave running background processes supervised for the next recovery
    // pass rather than killing them outright. Never block shutdown on this.
    store.flush_all().await;
    interactive.close_all().await;
    supervisor.cleanup_all().await;

    tracing::info!("shellsup server shut down");
    Ok(())
}
