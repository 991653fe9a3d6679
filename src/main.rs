use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use aml_sentinel::config::Config;
use aml_sentinel::db::{PgStore, Store};
use aml_sentinel::pipeline::AmlPipeline;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=info for output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!("AML Sentinel starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!(
        model = %config.llm.model,
        "Configuration loaded from {}",
        config_path
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| eyre::eyre!("Failed to connect to database: {}", e))?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| eyre::eyre!("Failed to run migrations: {}", e))?;

    tracing::info!("Database migrations complete");

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    // Seeds sanctioned entities and wires the LLM provider when a key is present
    let pipeline = Arc::new(AmlPipeline::init(store, &config).await?);
    tracing::info!(
        llm_enabled = pipeline.llm_enabled(),
        rules = pipeline.list_rules().len(),
        "AML pipeline initialized"
    );

    if !config.api.enabled {
        tracing::warn!("API disabled in configuration, nothing to serve");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let server = {
        let shutdown = shutdown.clone();
        let host = config.api.host.clone();
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = aml_sentinel::api::serve(pipeline, &host, port, shutdown).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    tracing::info!("AML Sentinel running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, draining API server...");
    shutdown.cancel();

    let _ = server.await;

    tracing::info!("AML Sentinel stopped gracefully");
    Ok(())
}
