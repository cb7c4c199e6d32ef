use axum::{body::Bytes, extract::State, Json};
use tracing::{info, Instrument};
use uuid::Uuid;

use super::types::{GenerateRequest, GenerateResponse, HealthResponse};
use super::{AppState, SERVICE_NAME};
use crate::error::ApiError;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
    })
}

/// Validates the body, then runs generation on the worker pool. The request
/// waits for the worker; the dispatch loop does not.
pub async fn generate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<GenerateResponse>, ApiError> {
    let req = GenerateRequest::from_slice(&body)?;

    let request_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "generate",
        %request_id,
        prompt_chars = req.prompt.chars().count(),
        max_new_tokens = req.max_new_tokens
    );

    async move {
        let started = std::time::Instant::now();
        let generator = state.generator.clone();
        let GenerateRequest {
            prompt,
            max_new_tokens,
        } = req;

        let generated_text = state
            .pool
            .run(move || generator.generate(&prompt, max_new_tokens))
            .await?;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            output_chars = generated_text.chars().count(),
            "generation complete"
        );
        Ok::<_, ApiError>(Json(GenerateResponse { generated_text }))
    }
    .instrument(span)
    .await
}
