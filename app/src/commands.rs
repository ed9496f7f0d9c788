use std::path::PathBuf;

use prag_ai::ollama::OllamaClient;
use prag_ai::provision::ensure_models;
use prag_ai::{QueryOutcome, RagEngine};
use prag_core::config::RagConfig;
use prag_core::error::{codes, AppError};
use serde::Serialize;

use crate::output;

/// What a command prints to stdout, and whether the process should exit successfully.
#[derive(Debug)]
pub struct CommandOutput {
    pub text: String,
    pub success: bool,
}

impl CommandOutput {
    fn ok(text: String) -> Self {
        Self { text, success: true }
    }

    fn failed(text: String) -> Self {
        Self { text, success: false }
    }
}

pub fn setup(config: &RagConfig) -> Result<CommandOutput, AppError> {
    let client = OllamaClient::new(&config.ollama_base_url)?;
    let provisioned = ensure_models(
        &client,
        &[config.embedding_model.as_str(), config.generation_model.as_str()],
    )?;
    Ok(CommandOutput::ok(output::render_setup(client.base_url(), &provisioned)))
}

pub fn health(config: &RagConfig) -> Result<CommandOutput, AppError> {
    let client = OllamaClient::new(&config.ollama_base_url)?;
    client.health_check()?;
    Ok(CommandOutput::ok(format!("Ollama reachable at {}", client.base_url())))
}

pub fn status(config: RagConfig) -> Result<CommandOutput, AppError> {
    let engine = RagEngine::with_ollama(config)?;
    Ok(CommandOutput::ok(to_json(&engine.status())?))
}

pub fn index(config: RagConfig, dir: Option<PathBuf>, rebuild: bool) -> Result<CommandOutput, AppError> {
    let dir = dir.unwrap_or_else(|| config.documents_dir.clone());
    let engine = RagEngine::with_ollama(config)?;
    let report = if rebuild {
        engine.rebuild(&dir)?
    } else {
        engine.index(&dir)?
    };
    let text = output::render_index_report(&report);
    Ok(if report.has_failures() {
        CommandOutput::failed(text)
    } else {
        CommandOutput::ok(text)
    })
}

pub fn query(
    config: RagConfig,
    question: &str,
    top_k: Option<usize>,
    json: bool,
) -> Result<CommandOutput, AppError> {
    let top_k = top_k.unwrap_or(config.top_k);
    let engine = RagEngine::with_ollama(config)?;
    let response = match engine.query_with_top_k(question, top_k) {
        Ok(r) => r,
        Err(e) if e.is(codes::INDEX_EMPTY) => {
            return Ok(CommandOutput::failed(output::INDEX_EMPTY_HINT.to_string()));
        }
        Err(e) => return Err(e),
    };

    let success = !matches!(response.outcome, QueryOutcome::GenerationFailed { .. });
    let text = if json {
        to_json(&response)?
    } else {
        output::render_query(&response)
    };
    Ok(CommandOutput { text, success })
}

pub fn clear(config: RagConfig) -> Result<CommandOutput, AppError> {
    let engine = RagEngine::with_ollama(config)?;
    let removed = engine.clear()?;
    Ok(CommandOutput::ok(format!("Index cleared ({removed} passages removed)")))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, AppError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| AppError::new(codes::OUTPUT_FAILED, "Failed to serialize output").with_details(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::ser::Error as _;

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("not representable"))
        }
    }

    #[test]
    fn serialization_failure_uses_the_output_code() {
        let err = to_json(&Unserializable).unwrap_err();
        assert_eq!(err.code, codes::OUTPUT_FAILED);
        assert!(err.details.unwrap_or_default().contains("not representable"));
    }

    #[test]
    fn json_output_is_pretty_printed() {
        let text = to_json(&serde_json::json!({ "documents": 2 })).expect("json");
        assert_eq!(text, "{\n  \"documents\": 2\n}");
    }
}
