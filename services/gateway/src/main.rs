//! wildlive gateway binary.
//!
//! Reads `config.toml` (or the path given with `--config`) plus `WILDLIVE__*`
//! environment overrides, starts the feed pipeline and serves the HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use gateway::{AppState, ServerConfig, create_router};
use live_feed::{FeedPipeline, SubscriptionManager};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Live wildlife observation feed")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    tracing::info!(pull_endpoint = config.pull_endpoint, "Starting gateway");

    let mut pipeline =
        FeedPipeline::new(config.feed.clone()).context("failed to build feed pipeline")?;
    pipeline
        .start(config.drain_mode())
        .context("failed to start feed pipeline")?;

    let manager = pipeline.manager();
    let app = create_router(AppState::new(&pipeline, &config));

    let address = config.address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!("Listening on http://{address}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(manager))
        .await
        .context("server error")?;

    pipeline.stop().await;
    Ok(())
}

/// Resolves on Ctrl-C after closing every viewer connection, so open SSE
/// streams end and the server can drain.
async fn shutdown_signal(manager: Arc<SubscriptionManager>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    manager.shutdown().await;
}
