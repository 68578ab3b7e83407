use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use flowspeak::config::ServerConfig;
use flowspeak::pipelines::fill_mask::FillMaskPipelineBuilder;
use flowspeak::server::{self, AppState};

/// Main entry point for the server.
///
/// Loads the masked language model once, before accepting traffic, shares it
/// read-only with every worker and serves until interrupted.
#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowspeak=info,actix_web=info".into()),
        )
        .init();

    let config = ServerConfig::parse();
    info!(model_dir = %config.model_dir.display(), "loading model");

    let mut builder = FillMaskPipelineBuilder::bert(&config.model_dir);
    if config.cpu {
        builder = builder.cpu();
    }
    let pipeline = builder
        .build()
        .with_context(|| format!("failed to load model from {}", config.model_dir.display()))?;
    info!(device = ?pipeline.device(), "model ready");

    let state = AppState::new(Arc::new(pipeline), config.top_k);
    server::run(&config, state).await.context("server error")?;

    info!("shut down");
    Ok(())
}
