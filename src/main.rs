use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use llm_generator::api::{self, AppState};
use llm_generator::config::Settings;
use llm_generator::inference::{LlmEngine, WorkerPool};

fn main() -> anyhow::Result<()> {
    // -----------------------------
    // Logging
    // -----------------------------
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_generator=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    // One dispatch thread; inference runs on the blocking pool.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(settings.worker_threads)
        .build()?;

    runtime.block_on(serve(settings))
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    if settings.api_key_is_default {
        warn!("API_KEY is not set; using the built-in default key");
    }

    // -----------------------------
    // Shared state / Dependencies
    // -----------------------------
    let engine = Arc::new(LlmEngine::new(settings.engine_options())?);
    info!(
        addr = %settings.bind_addr,
        model = %engine.model_id(),
        device = ?settings.device,
        workers = settings.worker_threads,
        "starting LLM-Generator (model loads on first request)"
    );

    let pool = WorkerPool::new(settings.worker_threads);
    let state = AppState::new(engine, pool, &settings.api_key);
    let app = api::router(state);

    let listener = TcpListener::bind(settings.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
