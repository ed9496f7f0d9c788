use prag_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use super::{GenerationOptions, Llm};
use crate::ollama::{call_error, OllamaClient, GENERATION_CODES};

#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
}

impl OllamaLlm {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: RequestOptions,
}

#[derive(Debug, Clone, Serialize)]
struct RequestOptions {
    temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl Llm for OllamaLlm {
    fn generate(&self, model: &str, prompt: &str, options: &GenerationOptions) -> Result<String, AppError> {
        let url = format!("{}/api/generate", self.client.base_url());
        let req = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: RequestOptions {
                temperature: options.temperature,
            },
        };
        let body = serde_json::to_value(req).map_err(|e| {
            AppError::new(codes::GENERATION_FAILED, "Failed to encode generation request")
                .with_details(e.to_string())
        })?;

        let resp = ureq::post(&url)
            .timeout(self.client.timeout())
            .send_json(body)
            .map_err(|e| call_error(e, GENERATION_CODES, model, "Generation"))?;

        let v: GenerateResponse = resp.into_json().map_err(|e| {
            AppError::new(codes::GENERATION_FAILED, "Failed to decode generation response")
                .with_details(e.to_string())
        })?;
        if v.response.trim().is_empty() {
            return Err(AppError::new(codes::GENERATION_FAILED, "Generation response was empty"));
        }
        Ok(v.response)
    }
}
