//! sonara-se - Similarity Engine Microservice
//!
//! **Module Identity:**
//! - Name: sonara-se (Similarity Engine)
//! - Port: 5830 (default)
//!
//! Stores audio embeddings, answers similarity and recommendation
//! queries, and runs the asynchronous processing chain that delivers
//! results to caller-provided callback URLs.

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use sonara_common::config::TomlConfig;
use sonara_se::config::{Cli, ServiceConfig};
use sonara_se::pipeline::{CallbackClient, StageRunner, WorkerPool, WorkerSettings};
use sonara_se::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with RUST_LOG override support
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let toml = match &cli.config {
        Some(path) => TomlConfig::load(path)?,
        None => TomlConfig::load_default()?,
    };
    let config = ServiceConfig::resolve(&cli, &toml)?;

    info!("Starting sonara-se (Similarity Engine) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database_path.display());
    info!("Embedding dimension: {}", config.embedding_dim);

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::create_dir_all(&config.shared_audio_dir)?;

    let db_pool = sonara_se::db::init_database_pool(&config.database_path).await?;
    info!("Database connection established");

    let state = AppState::new(db_pool, config.clone());

    // Requeue tasks left running by an earlier shutdown
    let requeued = state.queue.requeue_stale().await?;
    if requeued > 0 {
        warn!(requeued, "Requeued tasks interrupted by a previous shutdown");
    }

    let callback = CallbackClient::new(config.callback_token.clone())?;
    let runner = StageRunner::new(
        state.store.clone(),
        state.extractor.clone(),
        state.engine.clone(),
        callback,
    );
    let settings = WorkerSettings {
        worker_count: config.worker_count,
        max_attempts: config.max_attempts,
        retry_backoff: config.retry_backoff,
        ..WorkerSettings::default()
    };
    let workers = WorkerPool::new(state.queue.clone(), runner, settings);
    let handles = workers.spawn();
    info!(workers = handles.len(), "Task pipeline workers started");

    let app = sonara_se::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
