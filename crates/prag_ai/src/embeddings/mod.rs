use prag_core::error::AppError;

/// Turns text into fixed-length vectors. Implementations must be deterministic for a given
/// model so that identical text always maps to the same vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError>;

    /// One vector per input, in input order.
    fn embed_batch(&self, model: &str, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
        inputs.iter().map(|t| self.embed(model, t)).collect()
    }

    /// Fails with `EMBEDDING_UNAVAILABLE` (or `PROVIDER_TIMEOUT`) when `model` cannot be used.
    fn check_available(&self, model: &str) -> Result<(), AppError> {
        self.embed(model, "ping").map(|_| ())
    }
}

pub mod ollama_embed;

pub use ollama_embed::OllamaEmbedder;
