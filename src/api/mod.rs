use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::inference::{TextGenerator, WorkerPool};

pub mod auth;
pub mod handlers;
pub mod types;

pub const SERVICE_NAME: &str = "LLM-Generator";

/// Shared handler state. The generator is injected so tests can swap in a stub.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<dyn TextGenerator>,
    pub pool: WorkerPool,
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(generator: Arc<dyn TextGenerator>, pool: WorkerPool, api_key: &str) -> Self {
        Self {
            generator,
            pool,
            api_key: Arc::from(api_key),
        }
    }
}

/// `/generate` takes bodies of any size; oversized prompts are rejected by the
/// engine against the model context instead.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/generate", post(handlers::generate))
        .layer(DefaultBodyLimit::disable())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
