use prag_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::ollama::{call_error, OllamaClient, EMBEDDING_CODES};

// Chunking keeps inputs far below this; the cap only bounds request size.
const MAX_INPUT_CHARS: usize = 12_000;

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

fn bounded(input: &str) -> &str {
    match input.char_indices().nth(MAX_INPUT_CHARS) {
        Some((byte, _)) => &input[..byte],
        None => input,
    }
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        let mut out = self.embed_batch(model, &[input])?;
        out.pop()
            .ok_or_else(|| AppError::new(codes::EMBEDDING_FAILED, "Embeddings response was empty"))
    }

    fn embed_batch(&self, model: &str, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embed", self.client.base_url());
        let req = EmbedRequest {
            model,
            input: inputs.iter().map(|t| bounded(t)).collect(),
        };
        let body = serde_json::to_value(req).map_err(|e| {
            AppError::new(codes::EMBEDDING_FAILED, "Failed to encode embeddings request")
                .with_details(e.to_string())
        })?;

        let resp = ureq::post(&url)
            .timeout(self.client.timeout())
            .send_json(body)
            .map_err(|e| call_error(e, EMBEDDING_CODES, model, "Embedding"))?;

        let v: EmbedResponse = resp.into_json().map_err(|e| {
            AppError::new(codes::EMBEDDING_FAILED, "Failed to decode embeddings response")
                .with_details(e.to_string())
        })?;
        if v.embeddings.len() != inputs.len() {
            return Err(AppError::new(
                codes::EMBEDDING_FAILED,
                "Embeddings response does not match the request",
            )
            .with_details(format!("inputs={}; embeddings={}", inputs.len(), v.embeddings.len())));
        }
        if v.embeddings.iter().any(|e| e.is_empty()) {
            return Err(AppError::new(codes::EMBEDDING_FAILED, "Embeddings response contained an empty vector"));
        }
        tracing::debug!(model, batch = inputs.len(), "embedded batch");
        Ok(v.embeddings)
    }

    fn check_available(&self, model: &str) -> Result<(), AppError> {
        self.client.health_check().map_err(|e| {
            AppError::new(codes::EMBEDDING_UNAVAILABLE, "Embedding service is unreachable")
                .with_details(e.reason())
                .with_retryable(true)
        })?;
        let installed = self.client.list_models().map_err(|e| {
            AppError::new(codes::EMBEDDING_UNAVAILABLE, "Embedding service is unreachable")
                .with_details(e.reason())
                .with_retryable(true)
        })?;
        if !crate::ollama::model_installed(&installed, model) {
            return Err(AppError::new(
                codes::EMBEDDING_UNAVAILABLE,
                format!("Embedding model `{model}` is not installed; run `personalrag setup`"),
            ));
        }
        Ok(())
    }
}
