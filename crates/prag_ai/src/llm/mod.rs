use prag_core::error::AppError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { temperature: 0.1 }
    }
}

pub trait Llm: Send + Sync {
    fn generate(&self, model: &str, prompt: &str, options: &GenerationOptions) -> Result<String, AppError>;
}

pub mod ollama_llm;

pub use ollama_llm::OllamaLlm;
