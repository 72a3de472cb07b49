//! Parley server entry point

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use parley_config::{load_settings, Settings};
use parley_index::QdrantIndex;
use parley_llm::{OpenAiClient, OpenAiConfig};
use parley_server::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.toml > config/default.toml > defaults.
    let env = std::env::var("PARLEY_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing is not up yet.
            eprintln!("failed to load configuration: {e}");
            if matches!(e, parley_config::ConfigError::InvalidValue { .. }) {
                return Err(e.into());
            }
            eprintln!("falling back to defaults");
            Settings::default()
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting parley-server");

    let index = Arc::new(QdrantIndex::connect(&settings.storage)?);
    tracing::info!(
        endpoint = %settings.storage.qdrant_endpoint,
        collection = %settings.storage.collection,
        "storage adapter connected"
    );

    let llm = Arc::new(OpenAiClient::new(OpenAiConfig::from(&settings.llm))?);
    tracing::info!(model = %settings.llm.model, "LLM backend configured");

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let state = AppState::new(settings, index, llm);

    let sweeper_shutdown = state.sessions.start_sweeper();
    tracing::info!("session sweeper started");

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    let _ = sweeper_shutdown.send(true);
    Ok(())
}
