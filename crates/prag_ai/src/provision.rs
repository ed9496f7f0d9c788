use prag_core::error::AppError;
use serde::{Deserialize, Serialize};

use crate::ollama::{model_installed, OllamaClient};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    AlreadyInstalled,
    Pulled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelProvision {
    pub model: String,
    pub state: ModelState,
}

/// Make sure every model in `models` is installed locally, pulling the missing ones in order.
/// Stops at the first failed pull.
pub fn ensure_models(client: &OllamaClient, models: &[&str]) -> Result<Vec<ModelProvision>, AppError> {
    client.health_check()?;
    let installed = client.list_models()?;

    let mut out = Vec::with_capacity(models.len());
    for model in models {
        if out.iter().any(|p: &ModelProvision| p.model == *model) {
            continue;
        }
        let state = if model_installed(&installed, model) {
            tracing::info!(model, "model already installed");
            ModelState::AlreadyInstalled
        } else {
            tracing::info!(model, "pulling model; this can take a while");
            client.pull_model(model)?;
            tracing::info!(model, "model pulled");
            ModelState::Pulled
        };
        out.push(ModelProvision {
            model: model.to_string(),
            state,
        });
    }
    Ok(out)
}
