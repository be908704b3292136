use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod annotate;
mod api;
mod config;
mod engine;
mod gallery;
mod pipeline;
mod storage;

use config::Config;
use gallery::Gallery;
use pipeline::RecognitionPipeline;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();

    let gallery = Arc::new(Gallery::open(&config.gallery_dir)?);
    tracing::info!(root = %config.gallery_dir.display(), "gallery opened");

    // Fail fast: models load before we accept a single request.
    let engine = engine::spawn_engine(&config)?;

    let pipeline = Arc::new(RecognitionPipeline::new(
        gallery.clone(),
        engine,
        config.output_dir.clone(),
    )?);

    let state = Arc::new(api::AppState { gallery, pipeline });
    let router = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "rollcalld ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
