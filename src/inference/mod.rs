pub mod engine;
pub mod gpt2;
pub mod handle;
pub mod worker;

use thiserror::Error;

pub use engine::LlmEngine;
pub use handle::EngineHandle;
pub use worker::WorkerPool;

/// Failures raised by the inference provider.
///
/// The display string is exactly what callers of `/generate` see in the
/// 500 body, so it carries the raw message without a prefix.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    ModelLoad(String),

    #[error("{0}")]
    Inference(String),

    #[error("{0}")]
    Worker(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ModelLoad(_) => "model_load",
            EngineError::Inference(_) => "inference",
            EngineError::Worker(_) => "worker",
        }
    }
}

/// Blocking text generation. Called from a worker thread, never from the
/// dispatch loop.
pub trait TextGenerator: Send + Sync + 'static {
    /// Returns the prompt followed by up to `max_new_tokens` sampled tokens,
    /// decoded as one string.
    fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, EngineError>;
}
