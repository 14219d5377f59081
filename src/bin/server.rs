//! HTTP server binary entry point.
//!
//! Serves the search and rerank API. Settings come from an optional TOML file
//! and the environment; models load on first use.
//!
//! ```bash
//! server --config research-finder.toml --log-level info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use research_finder::{
    config::Settings,
    keywords::KeywordExtractor,
    provider::{OpenAlexClient, WorksProvider},
    runtime::{CacheDir, ModelRegistry, Reranker},
    search::{SearchOptions, SearchService},
    server::{router, AppState},
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "server", version, about = "Serve the research finder HTTP API")]
struct Args {
    /// TOML settings file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,

    /// Logging verbosity level
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    log_level: String,
}

fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let mut settings =
        Settings::load(args.config.as_deref()).with_context(|| "Failed to load settings")?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let cache = CacheDir::new(settings.models.cache_dir.as_deref())
        .with_context(|| "Failed to prepare model cache directory")?;
    info!(
        "Model cache at {} (temporary: {})",
        cache.path().display(),
        cache.is_temporary()
    );

    let registry = Arc::new(ModelRegistry::new(&settings.models, cache.path()));
    let client = OpenAlexClient::new(&settings.openalex)
        .with_context(|| "Failed to create OpenAlex client")?;
    info!("OpenAlex base URL: {}", client.base_url());

    let provider: Arc<dyn WorksProvider> = Arc::new(client);
    let extractor: Arc<dyn KeywordExtractor> = registry.clone();
    let reranker: Arc<dyn Reranker> = registry;
    let search = SearchService::new(provider, extractor, SearchOptions::from(&settings.search));

    let app = router(AppState::new(search, reranker), &settings.server.cors_origins);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .with_context(|| "Server error")?;

    cache
        .cleanup()
        .with_context(|| "Failed to remove temporary model cache")?;
    Ok(())
}
