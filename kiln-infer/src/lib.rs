use async_trait::async_trait;
use thiserror::Error;

pub mod ollama;
pub use ollama::OllamaClient;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("HTTP status: {0}")]
    Status(u16),
    #[error("malformed backend payload: {0}")]
    Payload(String),
    #[error("backend request timed out")]
    Timeout,
}

/// Contract with the local model server.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Names of the models the backend can serve, in backend order.
    async fn list_models(&self) -> Result<Vec<String>, InferenceError>;

    /// One non-streamed completion for `prompt`.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, InferenceError>;
}

/// Dummy implementation: no models, empty completions.
pub struct NullInferenceClient;

#[async_trait]
impl InferenceClient for NullInferenceClient {
    async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        Ok(Vec::new())
    }

    async fn generate(&self, _model: &str, _prompt: &str) -> Result<String, InferenceError> {
        Ok(String::new())
    }
}
