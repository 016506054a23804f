//! Single-model inference gateway: one lazily loaded model served over HTTP.

pub mod dispatch;
pub mod error;
pub mod health;
pub mod http;
pub mod instrument;
pub mod loader;
pub mod model;
pub mod settings;

use anyhow::{Context, Result};
use instrument::TracingLog;
use loader::ModelLoader;
use serving_core::{init_tracing, ServiceMetrics};
use settings::{GatewaySettings, SERVICE_NAME};
use std::sync::Arc;
use tracing::{info, warn};

pub const METRICS_NAMESPACE: &str = "gateway";

pub async fn run() -> Result<()> {
    let settings = GatewaySettings::load().context("loading gateway settings")?;
    let guard = init_tracing(SERVICE_NAME, settings.log_dir.as_deref())?;
    info!(target: "inference-gateway", bind = %settings.bind_addr, model_path = ?settings.model_path,
        demo_enabled = settings.demo_enabled, "starting inference-gateway");

    let metrics = Arc::new(ServiceMetrics::new(METRICS_NAMESPACE)?);
    let loader = Arc::new(ModelLoader::new(settings.loader_settings()));
    let state = http::AppState::new(loader.clone(), Arc::new(TracingLog), metrics);

    if settings.preload {
        tokio::spawn(preload(loader));
    }

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    info!(target: "inference-gateway", addr = ?listener.local_addr().ok(), "http listening");
    axum::serve(listener, http::router(state)).with_graceful_shutdown(shutdown_signal()).await?;

    info!(target: "inference-gateway", "shutdown complete");
    guard.shutdown();
    Ok(())
}

/// Warms the slot so the first request does not pay for the load. A failure
/// is logged and the next request retries.
async fn preload(loader: Arc<ModelLoader>) {
    match tokio::task::spawn_blocking(move || loader.get_or_load()).await {
        Ok(Ok(handle)) => info!(target: "inference-gateway", version = handle.version(), "model preloaded"),
        Ok(Err(e)) => warn!(target: "inference-gateway", error = %e, "preload failed; will retry on first request"),
        Err(e) => warn!(target: "inference-gateway", error = %e, "preload task aborted"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: "inference-gateway", error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    info!(target: "inference-gateway", "shutdown signal received");
}
