//! Inference backend seam.
//!
//! The engine treats the backend as an untrusted oracle: everything it
//! returns is sanitized, parsed leniently, then verified against
//! source text. Clients are blocking and `Send + Sync` so the runner can
//! drive them from the blocking pool under a concurrency ceiling.

pub mod gate;
pub mod mock;
pub mod ollama;
pub mod sanitize;

pub use gate::InferenceGate;
pub use mock::MockLlmClient;
pub use ollama::OllamaClient;
pub use sanitize::{extract_json_block, sanitize_llm_output};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Backend not reachable at {0}")]
    Connection(String),

    #[error("Backend returned error (status {status}): {body}")]
    Backend { status: u16, body: String },

    #[error("Inference call timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("Model not available: {0}")]
    NoModelAvailable(String),

    #[error("Inference task failed: {0}")]
    Task(String),
}

impl InferenceError {
    /// Transient failures worth another attempt. Status errors from the
    /// backend are retried only when they look like overload.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) | Self::HttpClient(_) => true,
            Self::Backend { status, .. } => *status == 429 || *status >= 500,
            Self::MalformedResponse(_) | Self::NoModelAvailable(_) | Self::Task(_) => false,
        }
    }
}

/// Abstraction over the language-model backend.
pub trait LlmClient: Send + Sync {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, InferenceError>;

    fn is_model_available(&self, model: &str) -> Result<bool, InferenceError>;

    fn list_models(&self) -> Result<Vec<String>, InferenceError>;
}
